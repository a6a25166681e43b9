//! Sync and ingest errors

use signflow_core::{SigningError, StoreError};
use signflow_provider::ProviderError;

/// Webhook ingest errors
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Payload is not the expected JSON or form shape
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Required field missing or empty
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Dispatcher is gone
    #[error("ingest queue closed")]
    QueueClosed,

    /// Applying the event failed
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// Message log write failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Check if the sender's payload is at fault
    #[inline]
    #[must_use]
    pub fn is_payload_error(&self) -> bool {
        matches!(self, Self::Malformed(_) | Self::MissingField(_))
    }
}

/// Reconciliation errors
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Provider lookup failed; nothing was applied
    #[error("provider fetch failed: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Signing(#[from] SigningError),
}
