//! Webhook ingest queue
//!
//! HTTP handlers hand parsed, deduplicated events to [`WebhookIngest`], which
//! queues them on a bounded channel. One [`IngestDispatcher`] task drains the
//! queue, so the ingest path never applies two events concurrently.

use crate::config::SyncConfig;
use crate::error::IngestError;
use crate::message_log::{CarrierUpdate, MessageLog};
use crate::webhook::{parse_carrier_webhook, parse_provider_webhook, IdempotencyFilter};
use chrono::Utc;
use signflow_core::{DocumentService, ProviderReport};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Event queued for the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEvent {
    Provider(ProviderReport),
    Carrier(CarrierUpdate),
}

/// What the webhook caller is told; always acknowledged with 200
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestAck {
    Accepted,
    /// Key already seen within the window
    Duplicate,
    /// Malformed or could not be queued; logged
    Rejected,
}

/// Producer side of the ingest queue
#[derive(Debug, Clone)]
pub struct WebhookIngest {
    sender: mpsc::Sender<IngestEvent>,
    dedup: IdempotencyFilter,
}

impl WebhookIngest {
    /// Create the ingest handle and the receiver for its dispatcher
    #[must_use]
    pub fn channel(config: &SyncConfig) -> (Self, mpsc::Receiver<IngestEvent>) {
        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
        let dedup = IdempotencyFilter::new(config.dedup_window(), config.dedup_capacity);
        (Self { sender, dedup }, receiver)
    }

    /// Ingest a provider webhook body
    pub async fn provider(&self, body: &[u8]) -> IngestAck {
        match parse_provider_webhook(body) {
            Ok(report) => {
                let key = report.idempotency_key();
                self.enqueue(key, IngestEvent::Provider(report)).await
            }
            Err(err) => {
                tracing::warn!(error = %err, bytes = body.len(), "malformed provider webhook");
                IngestAck::Rejected
            }
        }
    }

    /// Ingest a carrier status callback body
    pub async fn carrier(&self, body: &[u8]) -> IngestAck {
        match parse_carrier_webhook(body) {
            Ok(update) => {
                let key = update.idempotency_key();
                self.enqueue(key, IngestEvent::Carrier(update)).await
            }
            Err(err) => {
                tracing::warn!(error = %err, bytes = body.len(), "malformed carrier webhook");
                IngestAck::Rejected
            }
        }
    }

    async fn enqueue(&self, key: String, event: IngestEvent) -> IngestAck {
        if !self.dedup.first_seen(key.clone()).await {
            tracing::debug!(idempotency_key = %key, "duplicate webhook acknowledged");
            return IngestAck::Duplicate;
        }
        if self.sender.send(event).await.is_err() {
            // Let a redelivery through once the dispatcher is back
            self.dedup.forget(&key).await;
            tracing::error!(idempotency_key = %key, error = %IngestError::QueueClosed, "webhook dropped");
            return IngestAck::Rejected;
        }
        IngestAck::Accepted
    }
}

/// Counters reported when the dispatcher stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub applied: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Consumer side of the ingest queue
#[derive(Debug)]
pub struct IngestDispatcher {
    receiver: mpsc::Receiver<IngestEvent>,
    service: DocumentService,
    messages: Arc<dyn MessageLog>,
    shutdown: watch::Receiver<bool>,
}

impl IngestDispatcher {
    #[must_use]
    pub fn new(
        receiver: mpsc::Receiver<IngestEvent>,
        service: DocumentService,
        messages: Arc<dyn MessageLog>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            receiver,
            service,
            messages,
            shutdown,
        }
    }

    /// Drain the queue until every sender is dropped or shutdown is signalled
    ///
    /// Events already queued when shutdown arrives are still applied.
    pub async fn run(mut self) -> DispatchStats {
        let mut stats = DispatchStats::default();
        tracing::info!("ingest dispatcher started");

        loop {
            tokio::select! {
                () = crate::shutdown_signalled(&mut self.shutdown) => {
                    self.receiver.close();
                    while let Some(event) = self.receiver.recv().await {
                        self.record(event, &mut stats).await;
                    }
                    break;
                }
                event = self.receiver.recv() => match event {
                    Some(event) => self.record(event, &mut stats).await,
                    None => break,
                },
            }
        }

        tracing::info!(
            applied = stats.applied,
            unchanged = stats.unchanged,
            failed = stats.failed,
            "ingest dispatcher stopped"
        );
        stats
    }

    async fn record(&self, event: IngestEvent, stats: &mut DispatchStats) {
        match self.handle(event).await {
            Ok(true) => stats.applied += 1,
            Ok(false) => stats.unchanged += 1,
            Err(err) => {
                stats.failed += 1;
                tracing::warn!(error = %err, "ingest event not applied");
            }
        }
    }

    /// Apply one event; returns whether anything changed
    ///
    /// # Errors
    /// - `IngestError::Signing` if the document rejects the update
    /// - `IngestError::Store` if the message log write fails
    pub async fn handle(&self, event: IngestEvent) -> Result<bool, IngestError> {
        match event {
            IngestEvent::Provider(report) => {
                let envelope = report.envelope_id.clone();
                let outcome = self.service.apply_provider_report_for_envelope(report).await?;
                let changed = outcome.as_ref().is_some_and(|o| o.changed);
                if let Some(outcome) = outcome.filter(|o| o.changed) {
                    tracing::info!(
                        document_id = %outcome.document.id,
                        envelope_id = %envelope,
                        status = %outcome.document.status,
                        "provider webhook applied"
                    );
                }
                Ok(changed)
            }
            IngestEvent::Carrier(update) => {
                let sid = update.message_sid.clone();
                let changed = self.messages.record(update, Utc::now()).await?;
                tracing::debug!(message_sid = %sid, changed, "carrier callback applied");
                Ok(changed)
            }
        }
    }
}
