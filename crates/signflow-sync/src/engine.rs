//! Reconciliation engine
//!
//! Polls the provider for every document awaiting it and folds the results
//! into local state. At most one pass runs at a time: ticks and client poll
//! requests both go through the same in-flight flag, and a tick that finds
//! it held is skipped rather than queued.
//!
//! The interval timer only exists while some document awaits the provider.
//! When the awaiting set empties the timer is dropped, and the loop sleeps
//! until a document gains an envelope.

use crate::error::SyncError;
use serde::Serialize;
use signflow_core::{DocumentEvent, DocumentId, DocumentService, DocumentStatus, EnvelopeId};
use signflow_provider::SigningProvider;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;

/// Held while a pass is in flight; releases the flag on drop
#[derive(Debug)]
pub struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Result of one tick
#[derive(Debug)]
pub enum TickOutcome {
    /// Nothing awaits the provider
    Idle,
    /// Another pass holds the guard
    Skipped,
    Completed {
        checked: usize,
        changed: Vec<DocumentId>,
    },
    /// Nothing was applied
    Failed(SyncError),
}

/// Published once per pass that changed at least one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncNotification {
    pub tick: u64,
    pub changed: Vec<DocumentId>,
}

/// Per-document answer to a poll request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollEntry {
    pub changed: bool,
    /// `None` for an unknown document
    pub new_status: Option<DocumentStatus>,
}

/// Answer to a poll request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollResponse {
    /// A pass was already running; nothing was fetched
    pub busy: bool,
    pub results: BTreeMap<DocumentId, PollEntry>,
}

enum TickStart {
    Idle,
    Skipped,
    Spawned,
}

/// Periodic provider reconciliation
pub struct ReconciliationEngine {
    service: DocumentService,
    provider: Arc<dyn SigningProvider>,
    interval: Duration,
    in_flight: Arc<AtomicBool>,
    ticks: AtomicU64,
    notifications: broadcast::Sender<SyncNotification>,
}

impl ReconciliationEngine {
    #[must_use]
    pub fn new(
        service: DocumentService,
        provider: Arc<dyn SigningProvider>,
        interval: Duration,
    ) -> Self {
        let (notifications, _) = broadcast::channel(64);
        Self {
            service,
            provider,
            interval,
            in_flight: Arc::new(AtomicBool::new(false)),
            ticks: AtomicU64::new(0),
            notifications,
        }
    }

    /// Receive a message for every pass that changed documents
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotification> {
        self.notifications.subscribe()
    }

    /// Check if a pass is running
    #[inline]
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Take the in-flight guard, if free
    #[must_use]
    pub fn try_acquire(&self) -> Option<InFlightGuard> {
        InFlightGuard::try_acquire(&self.in_flight)
    }

    /// Passes started so far
    #[inline]
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Run one tick inline
    pub async fn tick(&self) -> TickOutcome {
        match self.prepare().await {
            Ok((awaiting, guard)) => self.pass(awaiting, guard).await,
            Err(outcome) => outcome,
        }
    }

    /// Rebuild the awaiting set and take the guard
    async fn prepare(&self) -> Result<(Vec<(DocumentId, EnvelopeId)>, InFlightGuard), TickOutcome> {
        let awaiting = match self.service.awaiting_provider().await {
            Ok(awaiting) => awaiting,
            Err(err) => {
                tracing::error!(error = %err, "could not load documents awaiting provider");
                return Err(TickOutcome::Failed(err.into()));
            }
        };
        if awaiting.is_empty() {
            return Err(TickOutcome::Idle);
        }
        let Some(guard) = self.try_acquire() else {
            tracing::debug!(awaiting = awaiting.len(), "reconciliation pass in flight, tick skipped");
            return Err(TickOutcome::Skipped);
        };
        Ok((awaiting, guard))
    }

    async fn pass(
        &self,
        awaiting: Vec<(DocumentId, EnvelopeId)>,
        _guard: InFlightGuard,
    ) -> TickOutcome {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let envelopes: Vec<EnvelopeId> = awaiting.iter().map(|(_, e)| e.clone()).collect();

        let reports = match self.provider.fetch_status_batch(&envelopes).await {
            Ok(reports) => reports,
            Err(err) => {
                tracing::warn!(
                    tick,
                    awaiting = awaiting.len(),
                    transient = err.is_transient(),
                    error = %err,
                    "provider batch fetch failed, retrying next tick"
                );
                return TickOutcome::Failed(err.into());
            }
        };

        let changed = self.apply(&awaiting, reports).await;
        self.notify(tick, &changed);
        tracing::debug!(
            tick,
            checked = awaiting.len(),
            changed = changed.len(),
            "reconciliation pass finished"
        );

        TickOutcome::Completed {
            checked: awaiting.len(),
            changed: changed.into_iter().map(|(id, _)| id).collect(),
        }
    }

    /// Apply fetched reports; returns documents whose state changed
    async fn apply(
        &self,
        targets: &[(DocumentId, EnvelopeId)],
        mut reports: HashMap<EnvelopeId, signflow_core::ProviderReport>,
    ) -> Vec<(DocumentId, DocumentStatus)> {
        let mut changed = Vec::new();
        for (id, envelope) in targets {
            let Some(report) = reports.remove(envelope) else {
                tracing::debug!(document_id = %id, envelope_id = %envelope, "no status returned for envelope");
                continue;
            };
            match self.service.apply_provider_report(*id, report).await {
                Ok(outcome) if outcome.changed => changed.push((*id, outcome.document.status)),
                Ok(_) => {}
                Err(err) => tracing::warn!(
                    document_id = %id,
                    envelope_id = %envelope,
                    error = %err,
                    "provider status not applied"
                ),
            }
        }
        changed
    }

    fn notify(&self, tick: u64, changed: &[(DocumentId, DocumentStatus)]) {
        if changed.is_empty() {
            return;
        }
        let _ = self.notifications.send(SyncNotification {
            tick,
            changed: changed.iter().map(|(id, _)| *id).collect(),
        });
    }

    /// Reconcile specific documents on a client's request
    ///
    /// Shares the in-flight guard with ticks: while a pass runs the answer is
    /// `busy` with every entry unchanged.
    ///
    /// # Errors
    /// - `SyncError::Provider` if the batch fetch fails
    /// - `SyncError::Signing` if documents cannot be loaded
    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn poll(&self, ids: &[DocumentId]) -> Result<PollResponse, SyncError> {
        let guard = self.try_acquire();
        let busy = guard.is_none();

        let mut results = BTreeMap::new();
        let mut targets = Vec::new();
        for id in ids {
            let record = self.service.find(*id).await?;
            let entry = PollEntry {
                changed: false,
                new_status: record.as_ref().map(|r| r.document.status),
            };
            if let Some(record) = record {
                if record.document.is_awaiting_provider() {
                    if let Some(envelope) = record.document.provider_envelope_id {
                        targets.push((*id, envelope));
                    }
                }
            }
            results.insert(*id, entry);
        }

        let Some(guard) = guard else {
            tracing::debug!("poll while a pass is in flight, answering busy");
            return Ok(PollResponse { busy, results });
        };
        if targets.is_empty() {
            return Ok(PollResponse { busy, results });
        }

        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let envelopes: Vec<EnvelopeId> = targets.iter().map(|(_, e)| e.clone()).collect();
        let reports = self.provider.fetch_status_batch(&envelopes).await?;
        let changed = self.apply(&targets, reports).await;
        drop(guard);

        for (id, status) in &changed {
            results.insert(
                *id,
                PollEntry {
                    changed: true,
                    new_status: Some(*status),
                },
            );
        }
        self.notify(tick, &changed);
        Ok(PollResponse { busy, results })
    }

    /// Drive ticks until shutdown
    ///
    /// Each tick's pass runs on its own task so a slow provider does not
    /// delay the timer; a tick that finds the previous pass still running
    /// is skipped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.service.events().subscribe();
        tracing::info!(interval_secs = self.interval.as_secs(), "reconciliation engine started");

        loop {
            let idle = matches!(self.service.awaiting_provider().await, Ok(set) if set.is_empty());
            if idle {
                tracing::debug!("nothing awaits the provider, timer stopped");
                if !Self::wait_for_work(&mut events, &mut shutdown).await {
                    break;
                }
            }
            if !self.run_timer(&mut events, &mut shutdown).await {
                break;
            }
        }

        tracing::info!(ticks = self.tick_count(), "reconciliation engine stopped");
    }

    /// Returns false on shutdown
    async fn wait_for_work(
        events: &mut broadcast::Receiver<DocumentEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            tokio::select! {
                () = crate::shutdown_signalled(shutdown) => return false,
                event = events.recv() => match event {
                    Ok(DocumentEvent::EnvelopeAttached { document_id, .. }) => {
                        tracing::debug!(document_id = %document_id, "envelope attached, timer armed");
                        return true;
                    }
                    Ok(_) => {}
                    // Missed events may include an attachment
                    Err(broadcast::error::RecvError::Lagged(_)) => return true,
                    Err(broadcast::error::RecvError::Closed) => return false,
                },
            }
        }
    }

    /// Tick until the awaiting set empties; returns false on shutdown
    async fn run_timer(
        self: &Arc<Self>,
        events: &mut broadcast::Receiver<DocumentEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = crate::shutdown_signalled(shutdown) => return false,
                _ = ticker.tick() => {
                    if matches!(self.trigger().await, TickStart::Idle) {
                        return true;
                    }
                }
                event = events.recv() => {
                    if matches!(event, Err(broadcast::error::RecvError::Closed)) {
                        return false;
                    }
                }
            }
        }
    }

    async fn trigger(self: &Arc<Self>) -> TickStart {
        match self.prepare().await {
            Ok((awaiting, guard)) => {
                let engine = Arc::clone(self);
                tokio::spawn(async move {
                    engine.pass(awaiting, guard).await;
                });
                TickStart::Spawned
            }
            Err(TickOutcome::Idle) => TickStart::Idle,
            Err(_) => TickStart::Skipped,
        }
    }
}

impl fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("interval", &self.interval)
            .field("busy", &self.is_busy())
            .field("ticks", &self.tick_count())
            .finish_non_exhaustive()
    }
}
