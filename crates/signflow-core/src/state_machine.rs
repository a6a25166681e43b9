use crate::error::SigningError;
use crate::types::DocumentStatus;

/// Validates a document status transition.
///
/// Progress is monotonic: `pending -> partially_signed -> signed`, with
/// `cancelled` reachable only before the document is signed. Both `signed`
/// and `cancelled` are absorbing.
pub fn validate_transition(from: DocumentStatus, to: DocumentStatus) -> Result<(), SigningError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(SigningError::InvalidTransition { from, to })
    }
}

pub fn allowed_transitions(from: DocumentStatus) -> Vec<DocumentStatus> {
    use DocumentStatus::*;
    match from {
        Pending => vec![PartiallySigned, Signed, Cancelled],
        PartiallySigned => vec![Signed, Cancelled],
        Signed => vec![],
        Cancelled => vec![],
    }
}

/// Position along the signing progression; `cancelled` sits outside it.
pub fn progress_rank(status: DocumentStatus) -> Option<u8> {
    match status {
        DocumentStatus::Pending => Some(0),
        DocumentStatus::PartiallySigned => Some(1),
        DocumentStatus::Signed => Some(2),
        DocumentStatus::Cancelled => None,
    }
}

fn allowed(from: DocumentStatus, to: DocumentStatus) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
