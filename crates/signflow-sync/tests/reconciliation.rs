use pretty_assertions::assert_eq;
use signflow_core::{
    DocumentEvent, DocumentId, DocumentService, DocumentStatus, EnvelopeId, ProviderReport,
};
use signflow_provider::{MockSigningProvider, ProviderError};
use signflow_sync::{
    IngestAck, IngestDispatcher, InMemoryMessageLog, MessageLog, MessageStatus,
    ReconciliationEngine, SyncConfig, TickOutcome, WebhookIngest,
};
use signflow_test_utils::{
    create_test_document, provider_report, provider_report_signed, setup_test_service,
    two_signer_request,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

const INTERVAL: Duration = Duration::from_secs(30);

fn reports_for(
    envelopes: &[EnvelopeId],
    build: impl Fn(&EnvelopeId) -> ProviderReport,
) -> HashMap<EnvelopeId, ProviderReport> {
    envelopes.iter().map(|e| (e.clone(), build(e))).collect()
}

fn engine(service: &DocumentService, provider: MockSigningProvider) -> Arc<ReconciliationEngine> {
    Arc::new(ReconciliationEngine::new(
        service.clone(),
        Arc::new(provider),
        INTERVAL,
    ))
}

async fn wait_for_status(
    events: &mut broadcast::Receiver<DocumentEvent>,
    id: DocumentId,
    status: DocumentStatus,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(DocumentEvent::StatusChanged { document_id, to, .. }) = events.recv().await {
                if document_id == id && to == status {
                    return;
                }
            }
        }
    })
    .await
    .expect("status change not observed");
}

#[tokio::test]
async fn tick_with_guard_held_makes_no_provider_calls() {
    let service = setup_test_service();
    create_test_document(&service, two_signer_request(Some("env-1"))).await;

    let mut provider = MockSigningProvider::new();
    provider.expect_fetch_status_batch().times(0);
    let engine = engine(&service, provider);

    let guard = engine.try_acquire().unwrap();
    assert!(matches!(engine.tick().await, TickOutcome::Skipped));
    assert!(engine.is_busy());
    drop(guard);
    assert!(!engine.is_busy());
}

#[tokio::test]
async fn tick_is_idle_without_awaiting_documents() {
    let service = setup_test_service();
    create_test_document(&service, two_signer_request(None)).await;

    let mut provider = MockSigningProvider::new();
    provider.expect_fetch_status_batch().times(0);
    let engine = engine(&service, provider);

    assert!(matches!(engine.tick().await, TickOutcome::Idle));
    assert_eq!(engine.tick_count(), 0);
}

#[tokio::test]
async fn failed_fetch_applies_nothing_and_releases_guard() {
    let service = setup_test_service();
    let doc = create_test_document(&service, two_signer_request(Some("env-1"))).await;

    let mut provider = MockSigningProvider::new();
    let mut seq = mockall::Sequence::new();
    provider
        .expect_fetch_status_batch()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(ProviderError::Transport("connection reset".into())));
    provider
        .expect_fetch_status_batch()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|envelopes| Ok(reports_for(envelopes, |e| provider_report(e.as_str(), "issued"))));
    let engine = engine(&service, provider);

    assert!(matches!(engine.tick().await, TickOutcome::Failed(_)));
    assert!(!engine.is_busy());
    assert_eq!(
        service.find(doc.id()).await.unwrap().unwrap().document.status,
        DocumentStatus::Pending
    );

    match engine.tick().await {
        TickOutcome::Completed { checked, changed } => {
            assert_eq!(checked, 1);
            assert_eq!(changed, vec![doc.id()]);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn one_notification_per_tick() {
    let service = setup_test_service();
    let a = create_test_document(&service, two_signer_request(Some("env-a"))).await;
    let b = create_test_document(&service, two_signer_request(Some("env-b"))).await;
    create_test_document(&service, two_signer_request(Some("env-c"))).await;

    let mut provider = MockSigningProvider::new();
    provider.expect_fetch_status_batch().times(1).returning(|envelopes| {
        Ok(reports_for(envelopes, |e| {
            let code = if e.as_str() == "env-c" { "processing" } else { "approved" };
            provider_report(e.as_str(), code)
        }))
    });
    let engine = engine(&service, provider);
    let mut notifications = engine.subscribe();

    let TickOutcome::Completed { checked, mut changed } = engine.tick().await else {
        panic!("tick did not complete");
    };
    changed.sort();
    let mut expected = vec![a.id(), b.id()];
    expected.sort();
    assert_eq!(checked, 3);
    assert_eq!(changed, expected);

    let note = notifications.try_recv().unwrap();
    assert_eq!(note.tick, 1);
    assert_eq!(note.changed.len(), 2);
    assert!(notifications.try_recv().is_err());
}

#[tokio::test]
async fn poll_answers_busy_while_pass_in_flight() {
    let service = setup_test_service();
    let doc = create_test_document(&service, two_signer_request(Some("env-1"))).await;

    let mut provider = MockSigningProvider::new();
    provider.expect_fetch_status_batch().times(0);
    let engine = engine(&service, provider);

    let _guard = engine.try_acquire().unwrap();
    let response = engine.poll(&[doc.id()]).await.unwrap();
    assert!(response.busy);
    let entry = response.results[&doc.id()];
    assert!(!entry.changed);
    assert_eq!(entry.new_status, Some(DocumentStatus::Pending));
}

#[tokio::test]
async fn poll_reconciles_requested_documents() {
    let service = setup_test_service();
    let doc = create_test_document(&service, two_signer_request(Some("env-1"))).await;
    let unknown = DocumentId::new();

    let mut provider = MockSigningProvider::new();
    provider
        .expect_fetch_status_batch()
        .withf(|envelopes| envelopes.len() == 1 && envelopes[0] == EnvelopeId::new("env-1"))
        .times(1)
        .returning(|envelopes| {
            Ok(reports_for(envelopes, |e| {
                provider_report_signed(e.as_str(), "processing", &["alice@example.com"])
            }))
        });
    let engine = engine(&service, provider);

    let response = engine.poll(&[doc.id(), unknown]).await.unwrap();
    assert!(!response.busy);
    assert!(response.results[&doc.id()].changed);
    assert_eq!(
        response.results[&doc.id()].new_status,
        Some(DocumentStatus::PartiallySigned)
    );
    assert_eq!(response.results[&unknown].new_status, None);
    assert!(!engine.is_busy());
}

#[tokio::test]
async fn two_signers_across_webhook_and_tick() {
    let service = setup_test_service();
    let doc = create_test_document(&service, two_signer_request(Some("env-42"))).await;
    let mut events = service.events().subscribe();

    let (ingest, receiver) = WebhookIngest::channel(&SyncConfig::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = tokio::spawn(
        IngestDispatcher::new(
            receiver,
            service.clone(),
            Arc::new(InMemoryMessageLog::new()),
            shutdown_rx,
        )
        .run(),
    );

    // Signer A arrives by webhook
    let signer_a = br#"{"envelopeId":"env-42","status":"processing","signers":[{"email":"alice@example.com","signed":true}]}"#;
    assert_eq!(ingest.provider(signer_a).await, IngestAck::Accepted);
    wait_for_status(&mut events, doc.id(), DocumentStatus::PartiallySigned).await;

    // Signer B is discovered by the next tick
    let mut provider = MockSigningProvider::new();
    provider.expect_fetch_status_batch().times(1).returning(|envelopes| {
        Ok(reports_for(envelopes, |e| {
            provider_report_signed(
                e.as_str(),
                "processing",
                &["alice@example.com", "bob@example.com"],
            )
        }))
    });
    let engine = engine(&service, provider);
    let TickOutcome::Completed { changed, .. } = engine.tick().await else {
        panic!("tick did not complete");
    };
    assert_eq!(changed, vec![doc.id()]);

    // Redelivered webhook for A is deduplicated; a late completion is a no-op
    assert_eq!(ingest.provider(signer_a).await, IngestAck::Duplicate);
    assert_eq!(
        ingest
            .provider(br#"{"requestId":"env-42","statusCode":"issued"}"#)
            .await,
        IngestAck::Accepted
    );
    assert_eq!(ingest.provider(b"{oops").await, IngestAck::Rejected);

    shutdown_tx.send(true).unwrap();
    let stats = dispatcher.await.unwrap();
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(stats.failed, 0);

    let stored = service.find(doc.id()).await.unwrap().unwrap();
    assert_eq!(stored.document.status, DocumentStatus::Signed);
    assert_eq!(stored.document.signed_count, 2);
    assert!(stored.invariants_hold());

    let mut completions = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, DocumentEvent::Completed { .. }) {
            completions += 1;
        }
    }
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn carrier_callbacks_reach_message_log() {
    let service = setup_test_service();
    let log = Arc::new(InMemoryMessageLog::new());
    let (ingest, receiver) = WebhookIngest::channel(&SyncConfig::default());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = tokio::spawn(
        IngestDispatcher::new(receiver, service, log.clone(), shutdown_rx).run(),
    );

    assert_eq!(ingest.carrier(b"MessageSid=SM1&MessageStatus=sent").await, IngestAck::Accepted);
    assert_eq!(
        ingest.carrier(b"MessageSid=SM1&MessageStatus=delivered").await,
        IngestAck::Accepted
    );
    assert_eq!(ingest.carrier(b"MessageSid=SM1&MessageStatus=sent").await, IngestAck::Duplicate);
    assert_eq!(ingest.carrier(b"MessageStatus=sent").await, IngestAck::Rejected);

    // Closing the queue stops the dispatcher after it drains
    drop(ingest);
    let stats = dispatcher.await.unwrap();
    assert_eq!(stats.applied, 2);

    let entry = log.get("SM1").await.unwrap().unwrap();
    assert_eq!(entry.status, MessageStatus::Delivered);
}

#[tokio::test(start_paused = true)]
async fn timer_arms_on_envelope_and_stops_when_settled() {
    let service = setup_test_service();
    let doc = create_test_document(&service, two_signer_request(None)).await;

    let mut provider = MockSigningProvider::new();
    provider
        .expect_fetch_status_batch()
        .times(1)
        .returning(|envelopes| Ok(reports_for(envelopes, |e| provider_report(e.as_str(), "issued"))));
    let engine = engine(&service, provider);
    let mut notifications = engine.subscribe();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&engine).run(shutdown_rx));

    // Nothing awaits the provider: no timer, no passes
    tokio::time::sleep(INTERVAL * 10).await;
    assert_eq!(engine.tick_count(), 0);

    service
        .attach_envelope(doc.id(), EnvelopeId::new("env-late"))
        .await
        .unwrap();
    let note = tokio::time::timeout(INTERVAL * 2, notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(note.changed, vec![doc.id()]);

    // Settled documents leave the set empty, so later intervals do nothing
    tokio::time::sleep(INTERVAL * 10).await;
    assert_eq!(engine.tick_count(), 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
