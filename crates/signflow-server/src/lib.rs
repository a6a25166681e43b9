//! Signflow Server - HTTP surface and process wiring
//!
//! [`Application::build`] assembles the stores, quota ledger, provider
//! client, reconciliation engine and webhook dispatcher from an
//! [`AppConfig`]; [`Application::serve`] runs them until shutdown.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod routes;
pub mod telemetry;

pub use config::{AppConfig, ConfigError, ServerConfig};
pub use routes::{routes, AppState};

use signflow_core::{
    DocumentService, EventBus, InMemoryDocumentStore, InMemoryUsageStore, QuotaConfig,
    QuotaLedger, StaticPlanDirectory,
};
use signflow_provider::{HttpSigningProvider, SigningProvider};
use signflow_sync::{IngestDispatcher, InMemoryMessageLog, ReconciliationEngine, WebhookIngest};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Service over in-memory stores using the configured plans
#[must_use]
pub fn build_service(quota: &QuotaConfig) -> DocumentService {
    let ledger = QuotaLedger::new(
        Arc::new(InMemoryUsageStore::new()),
        Arc::new(StaticPlanDirectory::from_config(quota)),
    );
    DocumentService::new(
        Arc::new(InMemoryDocumentStore::new()),
        ledger,
        EventBus::default(),
    )
}

/// Two-stage stop signal
///
/// Intake (HTTP server and engine) stops first; the webhook dispatcher is
/// only told to stop once the server has finished draining requests, so a
/// webhook accepted during the drain still reaches the queue's consumer.
#[derive(Debug)]
pub(crate) struct Shutdown {
    intake: watch::Sender<bool>,
    dispatch: watch::Sender<bool>,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        Self {
            intake: watch::channel(false).0,
            dispatch: watch::channel(false).0,
        }
    }

    pub(crate) fn intake(&self) -> watch::Receiver<bool> {
        self.intake.subscribe()
    }

    pub(crate) fn dispatch(&self) -> watch::Receiver<bool> {
        self.dispatch.subscribe()
    }

    /// Stop intake, wait for `server` to drain, then stop dispatch
    pub(crate) async fn run<T>(&self, server: tokio::task::JoinHandle<T>) -> anyhow::Result<T> {
        self.intake.send_replace(true);
        let result = server.await;
        self.dispatch.send_replace(true);
        Ok(result?)
    }
}

/// Fully wired process, not yet running
pub struct Application {
    config: AppConfig,
    state: AppState,
    dispatcher: IngestDispatcher,
    shutdown: Shutdown,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("bind_addr", &self.config.server.bind_addr)
            .field("engine", &self.state.engine)
            .finish_non_exhaustive()
    }
}

impl Application {
    /// Wire everything against the real provider
    ///
    /// # Errors
    /// Fails if the provider HTTP client cannot be built
    pub fn build(config: AppConfig) -> anyhow::Result<Self> {
        let provider = Arc::new(HttpSigningProvider::from_config(&config.provider)?);
        Ok(Self::with_provider(config, provider))
    }

    /// Wire everything against any provider implementation
    pub fn with_provider(config: AppConfig, provider: Arc<dyn SigningProvider>) -> Self {
        let service = build_service(&config.quota);
        let engine = Arc::new(ReconciliationEngine::new(
            service.clone(),
            provider,
            config.sync.interval(),
        ));
        let (ingest, receiver) = WebhookIngest::channel(&config.sync);
        let shutdown = Shutdown::new();
        let dispatcher = IngestDispatcher::new(
            receiver,
            service.clone(),
            Arc::new(InMemoryMessageLog::new()),
            shutdown.dispatch(),
        );

        Self {
            config,
            state: AppState {
                service,
                engine,
                ingest,
            },
            dispatcher,
            shutdown,
        }
    }

    /// Handles shared with the routes
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run until `signal` resolves, then stop the engine and drain webhooks
    ///
    /// # Errors
    /// - Bind failure on the configured address
    /// - A background task panicked
    pub async fn serve(self, signal: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let Self {
            config,
            state,
            dispatcher,
            shutdown,
        } = self;

        let addr = config.bind_addr()?;
        let engine_task = tokio::spawn(Arc::clone(&state.engine).run(shutdown.intake()));
        let dispatcher_task = tokio::spawn(dispatcher.run());

        let mut server_shutdown = shutdown.intake();
        let (bound, server) = warp::serve(routes(state)).try_bind_with_graceful_shutdown(
            addr,
            async move {
                // Sender lives until the end of this function
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            },
        )?;
        tracing::info!(addr = %bound, version = signflow_core::VERSION, "signflow listening");
        let server_task = tokio::spawn(server);

        signal.await;
        tracing::info!("shutdown requested");
        shutdown.run(server_task).await?;
        engine_task.await?;
        let stats = dispatcher_task.await?;
        tracing::info!(
            applied = stats.applied,
            unchanged = stats.unchanged,
            failed = stats.failed,
            "webhook dispatcher drained"
        );
        Ok(())
    }
}

/// Resolves on ctrl-c
pub async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
