//! Testing utilities for signflow workspace
//!
//! Shared fixtures for services, documents and provider reports.

#![allow(missing_docs)]

use chrono::Utc;
use signflow_core::{
    CreateOutcome, DocumentLimit, DocumentRecord, DocumentService, EnvelopeId, EventBus,
    InMemoryDocumentStore, InMemoryUsageStore, NewDocument, NewSigner, OwnerId, Plan,
    ProviderReport, ProviderSignerReport, ProviderStatus, QuotaConfig, QuotaLedger,
    StaticPlanDirectory,
};
use std::sync::Arc;

pub const TEST_OWNER: &str = "acme";

/// Service over in-memory stores with the default plans
pub fn setup_test_service() -> DocumentService {
    setup_test_service_with(QuotaConfig::default())
}

/// Service whose default plan allows `limit` documents a month
pub fn setup_test_service_with_limit(limit: DocumentLimit) -> DocumentService {
    setup_test_service_with(QuotaConfig {
        default_plan: "test".to_string(),
        plans: vec![Plan::new("test", limit)],
        ..QuotaConfig::default()
    })
}

pub fn setup_test_service_with(config: QuotaConfig) -> DocumentService {
    let quota = QuotaLedger::new(
        Arc::new(InMemoryUsageStore::new()),
        Arc::new(StaticPlanDirectory::from_config(&config)),
    );
    DocumentService::new(
        Arc::new(InMemoryDocumentStore::new()),
        quota,
        EventBus::default(),
    )
}

/// Two external signers, optionally on a provider envelope
pub fn two_signer_request(envelope: Option<&str>) -> NewDocument {
    let request = NewDocument::new("Master services agreement")
        .with_signer(NewSigner::new("alice@example.com"))
        .with_signer(NewSigner::new("bob@example.com"));
    match envelope {
        Some(envelope) => request.with_envelope(EnvelopeId::new(envelope)),
        None => request,
    }
}

/// Create a document for [`TEST_OWNER`], panicking on quota denial
pub async fn create_test_document(service: &DocumentService, request: NewDocument) -> DocumentRecord {
    match service
        .create_document(OwnerId::new(TEST_OWNER), request)
        .await
        .unwrap()
    {
        CreateOutcome::Created(record) => record,
        CreateOutcome::QuotaExceeded(status) => panic!("test document denied by quota: {status:?}"),
    }
}

pub fn provider_report(envelope: &str, code: &str) -> ProviderReport {
    ProviderReport::new(EnvelopeId::new(envelope), ProviderStatus::from_code(code))
}

/// Report with the given signers marked signed
pub fn provider_report_signed(envelope: &str, code: &str, signed: &[&str]) -> ProviderReport {
    signed.iter().fold(provider_report(envelope, code), |report, email| {
        report.with_signer(ProviderSignerReport::signed(*email, Utc::now()))
    })
}
