//! Document lifecycle events
//!
//! Events are published only when a mutation actually changed state, so a
//! subscriber sees `Completed` exactly once per document no matter how many
//! times the final signature is redelivered.

use crate::types::{DocumentId, DocumentStatus, EnvelopeId, OwnerId};
use tokio::sync::broadcast;

/// Default broadcast capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something that happened to a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    Created {
        document_id: DocumentId,
        owner_id: OwnerId,
    },
    /// Document linked to a provider envelope; wakes the reconciliation loop
    EnvelopeAttached {
        document_id: DocumentId,
        envelope_id: EnvelopeId,
    },
    StatusChanged {
        document_id: DocumentId,
        from: DocumentStatus,
        to: DocumentStatus,
    },
    /// Every signer signed
    Completed { document_id: DocumentId },
    Cancelled { document_id: DocumentId },
}

impl DocumentEvent {
    #[must_use]
    pub fn document_id(&self) -> DocumentId {
        match self {
            Self::Created { document_id, .. }
            | Self::EnvelopeAttached { document_id, .. }
            | Self::StatusChanged { document_id, .. }
            | Self::Completed { document_id }
            | Self::Cancelled { document_id } => *document_id,
        }
    }
}

/// Fan-out of document events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DocumentEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish; having no subscribers is not an error
    pub fn publish(&self, event: DocumentEvent) {
        tracing::trace!(document_id = %event.document_id(), ?event, "document event");
        let _ = self.sender.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
        self.sender.subscribe()
    }

    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
