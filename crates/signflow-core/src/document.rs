//! Document aggregate
//!
//! A [`DocumentRecord`] is one document plus its full signer set. Every
//! mutation goes through [`DocumentRecord::apply`], which:
//! - rejects anything touching a cancelled document
//! - recomputes `signed_count` from the signer set instead of incrementing
//! - only moves the status forward through the transition table
//!
//! Mutations are idempotent, so webhook redeliveries and poll results can be
//! applied in any order and converge on the same state.

use crate::error::SigningError;
use crate::provider_status::{ProviderEffect, ProviderReport};
use crate::state_machine::{progress_rank, validate_transition};
use crate::types::{
    Document, DocumentId, DocumentStatus, EnvelopeId, NewDocument, OwnerId, Signer, SignerId,
    SignerStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A document and its signer set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document: Document,
    pub signers: Vec<Signer>,
}

/// State change requested against one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// A signer signed in-app or through a webhook
    RecordSignature {
        signer_id: SignerId,
        identity_number: Option<String>,
    },
    /// Withdraw the document
    Cancel,
    /// Envelope status reported by the provider
    ApplyProviderStatus(ProviderReport),
    /// Link the document to a provider envelope
    AttachEnvelope(EnvelopeId),
}

impl Mutation {
    /// Short name for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::RecordSignature { .. } => "record_signature",
            Mutation::Cancel => "cancel",
            Mutation::ApplyProviderStatus(_) => "apply_provider_status",
            Mutation::AttachEnvelope(_) => "attach_envelope",
        }
    }
}

/// Result of applying a mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationOutcome {
    /// Status before the mutation
    pub previous: DocumentStatus,
    /// Document after the mutation
    pub document: Document,
    /// Whether anything was written
    pub changed: bool,
}

impl MutationOutcome {
    /// Check if the document status moved
    #[inline]
    #[must_use]
    pub fn status_changed(&self) -> bool {
        self.previous != self.document.status
    }

    /// Check if this mutation is the one that finished the document
    #[inline]
    #[must_use]
    pub fn completed(&self) -> bool {
        self.status_changed() && self.document.status == DocumentStatus::Signed
    }
}

impl DocumentRecord {
    /// Build a new `pending` document from a creation request
    ///
    /// # Errors
    /// - `SigningError::InvalidDocument` for an empty name, no signers, a
    ///   malformed email, a duplicate signer or a blank envelope id
    pub fn create(
        owner_id: OwnerId,
        request: NewDocument,
        now: DateTime<Utc>,
    ) -> Result<Self, SigningError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(SigningError::InvalidDocument("name is empty".into()));
        }
        if request.signers.is_empty() {
            return Err(SigningError::InvalidDocument("at least one signer is required".into()));
        }

        let envelope = match request.provider_envelope_id.as_ref().map(|e| e.as_str().trim()) {
            None => None,
            Some("") => {
                return Err(SigningError::InvalidDocument("providerEnvelopeId is blank".into()))
            }
            Some(envelope) => Some(EnvelopeId::new(envelope)),
        };

        let mut seen = HashSet::new();
        for signer in &request.signers {
            let email = signer.email.trim().to_ascii_lowercase();
            if email.is_empty() || !email.contains('@') {
                return Err(SigningError::InvalidDocument(format!(
                    "invalid signer email: '{}'",
                    signer.email
                )));
            }
            if !seen.insert(email) {
                return Err(SigningError::InvalidDocument(format!(
                    "duplicate signer: {}",
                    signer.email
                )));
            }
        }

        let id = DocumentId::new();
        let mut ordered = request.signers;
        // Stable: keeps request order within each group
        ordered.sort_by_key(|s| !s.is_organization_signer);

        let signers: Vec<Signer> = ordered
            .into_iter()
            .map(|s| Signer {
                id: SignerId::new(),
                document_id: id,
                email: s.email.trim().to_string(),
                is_organization_signer: s.is_organization_signer,
                status: SignerStatus::Pending,
                signed_at: None,
                identity_number: None,
            })
            .collect();

        let document = Document {
            id,
            owner_id,
            name: name.to_string(),
            status: DocumentStatus::Pending,
            signed_count: 0,
            total_signers: signers.len() as u32,
            provider_envelope_id: envelope,
            created_at: now,
            updated_at: now,
        };

        Ok(Self { document, signers })
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> DocumentId {
        self.document.id
    }

    #[inline]
    #[must_use]
    pub fn signer(&self, signer_id: SignerId) -> Option<&Signer> {
        self.signers.iter().find(|s| s.id == signer_id)
    }

    /// Apply a mutation and report what happened
    ///
    /// On error the record may be partially modified; callers that need
    /// all-or-nothing semantics apply to a copy and commit on success.
    pub fn apply(
        &mut self,
        mutation: Mutation,
        now: DateTime<Utc>,
    ) -> Result<MutationOutcome, SigningError> {
        let previous = self.document.status;

        let changed = match mutation {
            Mutation::RecordSignature {
                signer_id,
                identity_number,
            } => self.record_signature(signer_id, identity_number, now)?,
            Mutation::Cancel => self.cancel()?,
            Mutation::ApplyProviderStatus(report) => self.apply_provider_status(&report, now)?,
            Mutation::AttachEnvelope(envelope) => self.attach_envelope(envelope)?,
        };

        if changed {
            self.document.updated_at = now;
        }
        debug_assert!(self.invariants_hold(), "document invariants violated");

        Ok(MutationOutcome {
            previous,
            document: self.document.clone(),
            changed,
        })
    }

    /// Mark a signer as signed
    ///
    /// Re-applying an existing signature is a no-op returning `Ok(false)`.
    ///
    /// # Errors
    /// - `SigningError::DocumentCancelled` if the document is cancelled
    /// - `SigningError::SignerNotFound` if the signer is not on this document
    pub fn record_signature(
        &mut self,
        signer_id: SignerId,
        identity_number: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, SigningError> {
        if self.document.status == DocumentStatus::Cancelled {
            return Err(SigningError::DocumentCancelled(self.id()));
        }

        let idx = self
            .signers
            .iter()
            .position(|s| s.id == signer_id)
            .ok_or(SigningError::SignerNotFound {
                document: self.id(),
                signer: signer_id,
            })?;

        if self.signers[idx].is_signed() {
            tracing::debug!(
                document_id = %self.id(),
                signer_id = %signer_id,
                "signature already recorded"
            );
            return Ok(false);
        }

        self.sign(idx, identity_number, at);
        self.recompute()?;
        Ok(true)
    }

    /// Cancel the document; signer statuses are left untouched
    ///
    /// Cancelling a cancelled document is a no-op.
    ///
    /// # Errors
    /// - `SigningError::InvalidTransition` if the document is already signed
    pub fn cancel(&mut self) -> Result<bool, SigningError> {
        if self.document.status == DocumentStatus::Cancelled {
            return Ok(false);
        }
        validate_transition(self.document.status, DocumentStatus::Cancelled)?;
        self.document.status = DocumentStatus::Cancelled;
        Ok(true)
    }

    /// Fold a provider report into the document
    ///
    /// Signer-level progress is applied first, then the envelope status.
    /// Reports never move the document backward; regressions and unknown
    /// codes are logged and dropped.
    ///
    /// # Errors
    /// - `SigningError::EnvelopeConflict` if the report is for another envelope
    pub fn apply_provider_status(
        &mut self,
        report: &ProviderReport,
        now: DateTime<Utc>,
    ) -> Result<bool, SigningError> {
        if self.document.status == DocumentStatus::Cancelled {
            tracing::debug!(
                document_id = %self.id(),
                provider_status = %report.status,
                "document cancelled, provider report ignored"
            );
            return Ok(false);
        }

        if let Some(existing) = &self.document.provider_envelope_id {
            if existing != &report.envelope_id {
                return Err(SigningError::EnvelopeConflict {
                    existing: existing.clone(),
                    requested: report.envelope_id.clone(),
                });
            }
        }

        let mut changed = false;

        for signer_report in report.signers.iter().filter(|s| s.signed) {
            match self
                .signers
                .iter()
                .position(|s| s.matches_email(&signer_report.email))
            {
                Some(idx) if !self.signers[idx].is_signed() => {
                    self.sign(
                        idx,
                        signer_report.identity_number.clone(),
                        signer_report.signed_at.unwrap_or(now),
                    );
                    changed = true;
                }
                Some(_) => {}
                None => tracing::warn!(
                    document_id = %self.id(),
                    envelope_id = %report.envelope_id,
                    email = %signer_report.email,
                    "provider reported a signer unknown to this document"
                ),
            }
        }
        if changed {
            self.recompute()?;
        }

        match report.status.effect() {
            ProviderEffect::InProgress => {
                if progress_rank(self.document.status) > Some(0) && !changed {
                    tracing::debug!(
                        document_id = %self.id(),
                        local_status = %self.document.status,
                        provider_status = %report.status,
                        "provider lags local state, nothing to apply"
                    );
                }
            }
            ProviderEffect::Complete => {
                let pending: Vec<usize> = self
                    .signers
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| !s.is_signed())
                    .map(|(idx, _)| idx)
                    .collect();
                if !pending.is_empty() {
                    for idx in pending {
                        self.sign(idx, None, now);
                    }
                    self.recompute()?;
                    changed = true;
                }
            }
            ProviderEffect::Cancel => {
                if self.document.status == DocumentStatus::Signed {
                    tracing::warn!(
                        document_id = %self.id(),
                        provider_status = %report.status,
                        "provider reports withdrawal of a signed document, regression discarded"
                    );
                } else {
                    validate_transition(self.document.status, DocumentStatus::Cancelled)?;
                    self.document.status = DocumentStatus::Cancelled;
                    changed = true;
                }
            }
            ProviderEffect::Unrecognized => {
                tracing::warn!(
                    document_id = %self.id(),
                    envelope_id = %report.envelope_id,
                    provider_status = %report.status,
                    "unmapped provider status"
                );
            }
        }

        Ok(changed)
    }

    /// Link to a provider envelope; set at most once
    ///
    /// # Errors
    /// - `SigningError::DocumentCancelled` if the document is cancelled
    /// - `SigningError::EnvelopeConflict` if another envelope is attached
    pub fn attach_envelope(&mut self, envelope: EnvelopeId) -> Result<bool, SigningError> {
        if self.document.status == DocumentStatus::Cancelled {
            return Err(SigningError::DocumentCancelled(self.id()));
        }
        match &self.document.provider_envelope_id {
            Some(existing) if existing == &envelope => Ok(false),
            Some(existing) => Err(SigningError::EnvelopeConflict {
                existing: existing.clone(),
                requested: envelope,
            }),
            None => {
                self.document.provider_envelope_id = Some(envelope);
                Ok(true)
            }
        }
    }

    /// `signed_count` matches the signer set and `signed` iff all signed
    #[must_use]
    pub fn invariants_hold(&self) -> bool {
        let signed = self.signers.iter().filter(|s| s.is_signed()).count() as u32;
        let stamps_ok = self
            .signers
            .iter()
            .all(|s| !s.is_signed() || s.signed_at.is_some());
        let all_signed = signed == self.document.total_signers;

        signed == self.document.signed_count
            && self.document.total_signers as usize == self.signers.len()
            && stamps_ok
            && (all_signed == (self.document.status == DocumentStatus::Signed))
    }

    fn sign(&mut self, idx: usize, identity_number: Option<String>, at: DateTime<Utc>) {
        let signer = &mut self.signers[idx];
        signer.status = SignerStatus::Signed;
        signer.signed_at = Some(at);
        if identity_number.is_some() {
            signer.identity_number = identity_number;
        }
    }

    /// Derive count and status from the signer set
    fn recompute(&mut self) -> Result<(), SigningError> {
        let signed = self.signers.iter().filter(|s| s.is_signed()).count() as u32;
        let next = if signed == self.document.total_signers {
            DocumentStatus::Signed
        } else if signed > 0 {
            DocumentStatus::PartiallySigned
        } else {
            DocumentStatus::Pending
        };

        if next != self.document.status {
            validate_transition(self.document.status, next)?;
            self.document.status = next;
        }
        self.document.signed_count = signed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider_status::{ProviderSignerReport, ProviderStatus};
    use crate::types::NewSigner;
    use pretty_assertions::assert_eq;

    fn two_signer_record() -> DocumentRecord {
        let request = NewDocument::new("Lease agreement")
            .with_signer(NewSigner::new("tenant@example.com"))
            .with_signer(NewSigner::new("owner@acme.io").organization())
            .with_envelope(EnvelopeId::new("env-42"));
        DocumentRecord::create(OwnerId::new("acme"), request, Utc::now()).unwrap()
    }

    fn sign(record: &mut DocumentRecord, idx: usize) -> MutationOutcome {
        let signer_id = record.signers[idx].id;
        record
            .apply(
                Mutation::RecordSignature {
                    signer_id,
                    identity_number: Some("123".into()),
                },
                Utc::now(),
            )
            .unwrap()
    }

    #[test]
    fn create_orders_organization_signers_first() {
        let record = two_signer_record();
        assert_eq!(record.signers[0].email, "owner@acme.io");
        assert_eq!(record.document.status, DocumentStatus::Pending);
        assert_eq!(record.document.total_signers, 2);
        assert!(record.invariants_hold());
    }

    #[test]
    fn create_rejects_bad_requests() {
        let now = Utc::now();
        let owner = OwnerId::new("acme");

        let no_signers = NewDocument::new("x");
        assert!(matches!(
            DocumentRecord::create(owner.clone(), no_signers, now),
            Err(SigningError::InvalidDocument(_))
        ));

        let duplicate = NewDocument::new("x")
            .with_signer(NewSigner::new("a@b.c"))
            .with_signer(NewSigner::new("A@B.C"));
        assert!(DocumentRecord::create(owner.clone(), duplicate, now).is_err());

        let blank_name = NewDocument::new("  ").with_signer(NewSigner::new("a@b.c"));
        assert!(DocumentRecord::create(owner, blank_name, now).is_err());
    }

    #[test]
    fn create_rejects_blank_envelope_and_trims_the_rest() {
        let now = Utc::now();
        let owner = OwnerId::new("acme");

        let blank: NewDocument = serde_json::from_str(
            r#"{"name":"x","signers":[{"email":"a@b.c"}],"providerEnvelopeId":"  "}"#,
        )
        .unwrap();
        assert!(matches!(
            DocumentRecord::create(owner.clone(), blank, now),
            Err(SigningError::InvalidDocument(_))
        ));

        let padded = NewDocument::new("x")
            .with_signer(NewSigner::new("a@b.c"))
            .with_envelope(EnvelopeId::new(" env-7 "));
        let record = DocumentRecord::create(owner, padded, now).unwrap();
        assert_eq!(
            record.document.provider_envelope_id,
            Some(EnvelopeId::new("env-7"))
        );
        assert!(record.document.is_awaiting_provider());
    }

    #[test]
    fn signatures_drive_status() {
        let mut record = two_signer_record();

        let first = sign(&mut record, 0);
        assert!(first.changed);
        assert_eq!(first.document.status, DocumentStatus::PartiallySigned);
        assert_eq!(first.document.signed_count, 1);
        assert!(!first.completed());

        let second = sign(&mut record, 1);
        assert_eq!(second.document.status, DocumentStatus::Signed);
        assert_eq!(second.document.signed_count, 2);
        assert!(second.completed());
    }

    #[test]
    fn duplicate_signature_is_noop() {
        let mut record = two_signer_record();
        sign(&mut record, 0);
        let snapshot = record.clone();

        let again = sign(&mut record, 0);
        assert!(!again.changed);
        assert_eq!(record, snapshot);
    }

    #[test]
    fn cancelled_document_rejects_signature() {
        let mut record = two_signer_record();
        record.apply(Mutation::Cancel, Utc::now()).unwrap();

        let signer_id = record.signers[0].id;
        let err = record
            .apply(
                Mutation::RecordSignature {
                    signer_id,
                    identity_number: None,
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, SigningError::DocumentCancelled(_)));
    }

    #[test]
    fn cancel_preserves_signers_and_rejects_signed() {
        let mut record = two_signer_record();
        sign(&mut record, 0);
        let outcome = record.apply(Mutation::Cancel, Utc::now()).unwrap();
        assert_eq!(outcome.document.status, DocumentStatus::Cancelled);
        assert!(record.signers[0].is_signed());
        assert_eq!(record.document.signed_count, 1);

        let mut signed = two_signer_record();
        sign(&mut signed, 0);
        sign(&mut signed, 1);
        assert!(matches!(
            signed.apply(Mutation::Cancel, Utc::now()),
            Err(SigningError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn unknown_signer_is_rejected() {
        let mut record = two_signer_record();
        let err = record
            .record_signature(SignerId::new(), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, SigningError::SignerNotFound { .. }));
    }

    #[test]
    fn provider_signer_progress_is_applied() {
        let mut record = two_signer_record();
        let report = ProviderReport::new(EnvelopeId::new("env-42"), ProviderStatus::Processing)
            .with_signer(ProviderSignerReport::signed("TENANT@example.com", Utc::now()));

        let outcome = record
            .apply(Mutation::ApplyProviderStatus(report), Utc::now())
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.document.status, DocumentStatus::PartiallySigned);
    }

    #[test]
    fn provider_completion_signs_remaining() {
        let mut record = two_signer_record();
        let report = ProviderReport::new(EnvelopeId::new("env-42"), ProviderStatus::Issued);
        let outcome = record
            .apply(Mutation::ApplyProviderStatus(report), Utc::now())
            .unwrap();
        assert!(outcome.completed());
        assert!(record.signers.iter().all(Signer::is_signed));
        assert!(record.invariants_hold());
    }

    #[test]
    fn provider_never_moves_signed_backward() {
        let mut record = two_signer_record();
        sign(&mut record, 0);
        sign(&mut record, 1);

        for code in ["pending", "processing", "rejected", "revoked", "mystery"] {
            let report =
                ProviderReport::new(EnvelopeId::new("env-42"), ProviderStatus::from_code(code));
            let outcome = record
                .apply(Mutation::ApplyProviderStatus(report), Utc::now())
                .unwrap();
            assert!(!outcome.changed, "code {code} changed a signed document");
            assert_eq!(outcome.document.status, DocumentStatus::Signed);
        }
    }

    #[test]
    fn provider_rejection_cancels_unsigned() {
        let mut record = two_signer_record();
        let report = ProviderReport::new(EnvelopeId::new("env-42"), ProviderStatus::Rejected);
        let outcome = record
            .apply(Mutation::ApplyProviderStatus(report), Utc::now())
            .unwrap();
        assert_eq!(outcome.document.status, DocumentStatus::Cancelled);

        let late = ProviderReport::new(EnvelopeId::new("env-42"), ProviderStatus::Issued);
        let outcome = record
            .apply(Mutation::ApplyProviderStatus(late), Utc::now())
            .unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.document.status, DocumentStatus::Cancelled);
    }

    #[test]
    fn provider_report_for_other_envelope_is_rejected() {
        let mut record = two_signer_record();
        let report = ProviderReport::new(EnvelopeId::new("env-99"), ProviderStatus::Issued);
        assert!(matches!(
            record.apply(Mutation::ApplyProviderStatus(report), Utc::now()),
            Err(SigningError::EnvelopeConflict { .. })
        ));
    }

    #[test]
    fn envelope_is_set_once() {
        let request = NewDocument::new("NDA").with_signer(NewSigner::new("a@b.c"));
        let mut record = DocumentRecord::create(OwnerId::new("acme"), request, Utc::now()).unwrap();

        assert!(record.attach_envelope(EnvelopeId::new("e1")).unwrap());
        assert!(!record.attach_envelope(EnvelopeId::new("e1")).unwrap());
        assert!(matches!(
            record.attach_envelope(EnvelopeId::new("e2")),
            Err(SigningError::EnvelopeConflict { .. })
        ));
        assert_eq!(
            record.document.provider_envelope_id,
            Some(EnvelopeId::new("e1"))
        );
    }
}
