//! Document storage
//!
//! [`DocumentStore`] is the persistence seam for documents. Mutations are
//! applied by the store itself so that the read of the signer set, the
//! recompute and the write of `status`/`signed_count` happen under one
//! per-document lock.

use crate::document::{DocumentRecord, Mutation, MutationOutcome};
use crate::error::{SigningError, StoreError};
use crate::types::{DocumentId, EnvelopeId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Persistence for documents and their signers
#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    /// Insert a freshly created document
    async fn insert(&self, record: DocumentRecord) -> Result<(), StoreError>;

    /// Consistent snapshot of a document and its signers
    async fn get(&self, id: DocumentId) -> Result<Option<DocumentRecord>, StoreError>;

    /// Apply a mutation atomically with respect to other writers of `id`
    async fn mutate(
        &self,
        id: DocumentId,
        mutation: Mutation,
        now: DateTime<Utc>,
    ) -> Result<MutationOutcome, SigningError>;

    /// Resolve an envelope to its document
    async fn find_by_envelope(&self, envelope: &EnvelopeId)
        -> Result<Option<DocumentId>, StoreError>;

    /// Documents with a non-final status and a known envelope
    async fn awaiting_provider(&self) -> Result<Vec<(DocumentId, EnvelopeId)>, StoreError>;
}

/// In-process document store
///
/// Each record sits behind its own async mutex; the map only hands out the
/// `Arc`, so no map shard lock is held across an await.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: DashMap<DocumentId, Arc<Mutex<DocumentRecord>>>,
    envelopes: DashMap<EnvelopeId, DocumentId>,
}

impl InMemoryDocumentStore {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn entry(&self, id: DocumentId) -> Option<Arc<Mutex<DocumentRecord>>> {
        self.documents.get(&id).map(|e| Arc::clone(e.value()))
    }

    fn claim_envelope(&self, envelope: &EnvelopeId, id: DocumentId) -> Result<(), StoreError> {
        let owner = *self.envelopes.entry(envelope.clone()).or_insert(id);
        if owner == id {
            Ok(())
        } else {
            Err(StoreError::EnvelopeTaken {
                envelope: envelope.clone(),
                owner,
            })
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert(&self, record: DocumentRecord) -> Result<(), StoreError> {
        let id = record.id();
        match self.documents.entry(id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(id)),
            Entry::Vacant(slot) => {
                if let Some(envelope) = &record.document.provider_envelope_id {
                    self.claim_envelope(envelope, id)?;
                }
                slot.insert(Arc::new(Mutex::new(record)));
                Ok(())
            }
        }
    }

    async fn get(&self, id: DocumentId) -> Result<Option<DocumentRecord>, StoreError> {
        match self.entry(id) {
            Some(entry) => Ok(Some(entry.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn mutate(
        &self,
        id: DocumentId,
        mutation: Mutation,
        now: DateTime<Utc>,
    ) -> Result<MutationOutcome, SigningError> {
        let entry = self.entry(id).ok_or(SigningError::DocumentNotFound(id))?;
        let mut guard = entry.lock().await;

        let attaching = match &mutation {
            Mutation::AttachEnvelope(envelope) => Some(envelope.clone()),
            _ => None,
        };

        // Work on a copy so a rejected mutation leaves no partial write
        let mut next = guard.clone();
        let outcome = next.apply(mutation, now)?;
        if outcome.changed {
            if let Some(envelope) = &attaching {
                self.claim_envelope(envelope, id)?;
            }
            *guard = next;
        }
        Ok(outcome)
    }

    async fn find_by_envelope(
        &self,
        envelope: &EnvelopeId,
    ) -> Result<Option<DocumentId>, StoreError> {
        Ok(self.envelopes.get(envelope).map(|e| *e.value()))
    }

    async fn awaiting_provider(&self) -> Result<Vec<(DocumentId, EnvelopeId)>, StoreError> {
        let entries: Vec<Arc<Mutex<DocumentRecord>>> = self
            .documents
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut awaiting = Vec::new();
        for entry in entries {
            let record = entry.lock().await;
            if record.document.is_awaiting_provider() {
                if let Some(envelope) = &record.document.provider_envelope_id {
                    awaiting.push((record.id(), envelope.clone()));
                }
            }
        }
        awaiting.sort_by_key(|(id, _)| *id);
        Ok(awaiting)
    }
}
