//! Document service
//!
//! Entry point for every document operation, whether it comes from the
//! HTTP surface, webhook ingest or reconciliation. Combines the store, the
//! quota ledger and the event bus.

use crate::document::{DocumentRecord, Mutation, MutationOutcome};
use crate::error::SigningError;
use crate::events::{DocumentEvent, EventBus};
use crate::provider_status::ProviderReport;
use crate::quota::{LimitStatus, QuotaLedger};
use crate::store::DocumentStore;
use crate::types::{DocumentId, DocumentStatus, EnvelopeId, NewDocument, OwnerId, SignerId};
use chrono::Utc;
use std::sync::Arc;

/// Result of a creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(DocumentRecord),
    /// Monthly limit reached; nothing was written
    QuotaExceeded(LimitStatus),
}

/// Document operations
#[derive(Debug, Clone)]
pub struct DocumentService {
    store: Arc<dyn DocumentStore>,
    quota: QuotaLedger,
    events: EventBus,
}

impl DocumentService {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, quota: QuotaLedger, events: EventBus) -> Self {
        Self {
            store,
            quota,
            events,
        }
    }

    #[inline]
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    #[inline]
    #[must_use]
    pub fn quota(&self) -> &QuotaLedger {
        &self.quota
    }

    /// Create a document after the quota check passes
    ///
    /// The request is validated before a quota slot is reserved, so a
    /// malformed request never consumes quota.
    ///
    /// # Errors
    /// - `SigningError::InvalidDocument` for a malformed request
    /// - `SigningError::Store` on storage failure
    #[tracing::instrument(skip(self, request), fields(owner_id = %owner))]
    pub async fn create_document(
        &self,
        owner: OwnerId,
        request: NewDocument,
    ) -> Result<CreateOutcome, SigningError> {
        let record = DocumentRecord::create(owner.clone(), request, Utc::now())?;

        let (decision, plan) = self.quota.reserve(&owner).await?;
        if !decision.allowed {
            return Ok(CreateOutcome::QuotaExceeded(LimitStatus::new(
                &plan,
                decision.current,
            )));
        }

        self.store.insert(record.clone()).await?;
        tracing::info!(
            document_id = %record.id(),
            signers = record.signers.len(),
            "document created"
        );

        self.events.publish(DocumentEvent::Created {
            document_id: record.id(),
            owner_id: owner,
        });
        if let Some(envelope) = &record.document.provider_envelope_id {
            self.events.publish(DocumentEvent::EnvelopeAttached {
                document_id: record.id(),
                envelope_id: envelope.clone(),
            });
        }
        Ok(CreateOutcome::Created(record))
    }

    /// Fetch a live document
    ///
    /// # Errors
    /// - `SigningError::DocumentNotFound` for an unknown id
    /// - `SigningError::DocumentCancelled` for a cancelled document
    pub async fn get_document(&self, id: DocumentId) -> Result<DocumentRecord, SigningError> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or(SigningError::DocumentNotFound(id))?;
        if record.document.status == DocumentStatus::Cancelled {
            return Err(SigningError::DocumentCancelled(id));
        }
        Ok(record)
    }

    /// Raw lookup; cancelled documents included
    pub async fn find(&self, id: DocumentId) -> Result<Option<DocumentRecord>, SigningError> {
        Ok(self.store.get(id).await?)
    }

    /// Record a signature from a signer
    #[tracing::instrument(skip(self, identity_number), fields(document_id = %id, signer_id = %signer_id))]
    pub async fn record_signature(
        &self,
        id: DocumentId,
        signer_id: SignerId,
        identity_number: Option<String>,
    ) -> Result<MutationOutcome, SigningError> {
        self.mutate(
            id,
            Mutation::RecordSignature {
                signer_id,
                identity_number,
            },
        )
        .await
    }

    /// Cancel a document
    #[tracing::instrument(skip(self), fields(document_id = %id))]
    pub async fn cancel(&self, id: DocumentId) -> Result<MutationOutcome, SigningError> {
        self.mutate(id, Mutation::Cancel).await
    }

    /// Link a document to its provider envelope
    #[tracing::instrument(skip(self), fields(document_id = %id, envelope_id = %envelope))]
    pub async fn attach_envelope(
        &self,
        id: DocumentId,
        envelope: EnvelopeId,
    ) -> Result<MutationOutcome, SigningError> {
        self.mutate(id, Mutation::AttachEnvelope(envelope)).await
    }

    /// Apply a provider report to a known document
    pub async fn apply_provider_report(
        &self,
        id: DocumentId,
        report: ProviderReport,
    ) -> Result<MutationOutcome, SigningError> {
        self.mutate(id, Mutation::ApplyProviderStatus(report)).await
    }

    /// Apply a provider report, resolving the document by envelope
    ///
    /// Returns `Ok(None)` when no document carries the envelope.
    #[tracing::instrument(skip(self, report), fields(envelope_id = %report.envelope_id, provider_status = %report.status))]
    pub async fn apply_provider_report_for_envelope(
        &self,
        report: ProviderReport,
    ) -> Result<Option<MutationOutcome>, SigningError> {
        let Some(id) = self.store.find_by_envelope(&report.envelope_id).await? else {
            tracing::warn!("provider report for unknown envelope");
            return Ok(None);
        };
        self.apply_provider_report(id, report).await.map(Some)
    }

    /// Documents awaiting the provider, with their envelopes
    pub async fn awaiting_provider(&self) -> Result<Vec<(DocumentId, EnvelopeId)>, SigningError> {
        Ok(self.store.awaiting_provider().await?)
    }

    /// Read-only limit check for the owner's plan
    pub async fn document_limit(&self, owner: &OwnerId) -> Result<LimitStatus, SigningError> {
        Ok(self.quota.check(owner).await?)
    }

    async fn mutate(
        &self,
        id: DocumentId,
        mutation: Mutation,
    ) -> Result<MutationOutcome, SigningError> {
        let kind = mutation.kind();
        let attaching = match &mutation {
            Mutation::AttachEnvelope(envelope) => Some(envelope.clone()),
            _ => None,
        };

        let outcome = match self.store.mutate(id, mutation, Utc::now()).await {
            Ok(outcome) => outcome,
            Err(err) => {
                if err.is_client_error() {
                    tracing::debug!(document_id = %id, mutation = kind, error = %err, "mutation rejected");
                } else {
                    tracing::error!(document_id = %id, mutation = kind, error = %err, "mutation failed");
                }
                return Err(err);
            }
        };

        if outcome.changed {
            tracing::debug!(
                document_id = %id,
                mutation = kind,
                from = %outcome.previous,
                to = %outcome.document.status,
                signed = outcome.document.signed_count,
                total = outcome.document.total_signers,
                "document updated"
            );
            self.publish_changes(&outcome, attaching);
        }
        Ok(outcome)
    }

    fn publish_changes(&self, outcome: &MutationOutcome, attached: Option<EnvelopeId>) {
        let document_id = outcome.document.id;

        if let Some(envelope_id) = attached {
            self.events.publish(DocumentEvent::EnvelopeAttached {
                document_id,
                envelope_id,
            });
        }
        if !outcome.status_changed() {
            return;
        }

        self.events.publish(DocumentEvent::StatusChanged {
            document_id,
            from: outcome.previous,
            to: outcome.document.status,
        });
        match outcome.document.status {
            DocumentStatus::Signed => {
                tracing::info!(document_id = %document_id, "document fully signed");
                self.events.publish(DocumentEvent::Completed { document_id });
            }
            DocumentStatus::Cancelled => {
                tracing::info!(document_id = %document_id, "document cancelled");
                self.events.publish(DocumentEvent::Cancelled { document_id });
            }
            DocumentStatus::Pending | DocumentStatus::PartiallySigned => {}
        }
    }
}
