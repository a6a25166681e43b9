//! Signflow Sync - keeping local state in step with the provider
//!
//! Two independent channels feed provider progress into documents:
//! - Push: webhooks, parsed and deduplicated, then applied by a single
//!   dispatcher task
//! - Pull: the reconciliation engine, which polls the provider on a timer
//!   while documents await it
//!
//! Both apply through [`signflow_core::DocumentService`], whose mutations
//! are idempotent, so the channels may race freely.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod message_log;
pub mod webhook;

pub use config::SyncConfig;
pub use dispatcher::{DispatchStats, IngestAck, IngestDispatcher, IngestEvent, WebhookIngest};
pub use engine::{
    InFlightGuard, PollEntry, PollResponse, ReconciliationEngine, SyncNotification, TickOutcome,
};
pub use error::{IngestError, SyncError};
pub use message_log::{CarrierUpdate, InMemoryMessageLog, MessageLog, MessageLogEntry, MessageStatus};
pub use webhook::{parse_carrier_webhook, parse_provider_webhook, IdempotencyFilter};

use tokio::sync::watch;

/// Resolves once shutdown is signalled or the signal sender is gone
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
