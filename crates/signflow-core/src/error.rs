//! Error types for signflow core
//!
//! Provides error handling for:
//! - Document lookups and state machine violations
//! - Storage failures

use crate::types::{DocumentId, DocumentStatus, EnvelopeId, SignerId};

/// Document and signer operation errors
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// No document with this id
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    /// Document is cancelled; distinct from not-found
    #[error("document cancelled: {0}")]
    DocumentCancelled(DocumentId),

    /// Signer does not belong to the document
    #[error("signer {signer} not found on document {document}")]
    SignerNotFound {
        document: DocumentId,
        signer: SignerId,
    },

    /// Transition rejected by the state machine
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    /// A different envelope is already attached
    #[error("envelope {existing} already attached, refusing {requested}")]
    EnvelopeConflict {
        existing: EnvelopeId,
        requested: EnvelopeId,
    },

    /// Creation request failed validation
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Storage error
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl SigningError {
    /// Check if the caller caused this error (4xx class)
    #[inline]
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Store(_))
    }

    /// Check if the error is a state machine rejection
    #[inline]
    #[must_use]
    pub fn is_state_violation(&self) -> bool {
        matches!(
            self,
            Self::DocumentCancelled(_) | Self::InvalidTransition { .. } | Self::EnvelopeConflict { .. }
        )
    }
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Document id already present
    #[error("duplicate document: {0}")]
    Duplicate(DocumentId),

    /// Envelope already indexed to another document
    #[error("envelope {envelope} already belongs to document {owner}")]
    EnvelopeTaken {
        envelope: EnvelopeId,
        owner: DocumentId,
    },

    /// Backend unavailable
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
