//! Signflow Core - document signing state
//!
//! Owns everything that decides what a document's status is:
//! - Ids and the document/signer data model
//! - The status state machine and the document aggregate
//! - The provider status vocabulary
//! - The monthly quota ledger
//! - Storage traits with in-memory implementations
//! - The document service and its event bus
//!
//! # Example
//!
//! ```rust,ignore
//! use signflow_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), SigningError> {
//! let quota = QuotaLedger::new(
//!     Arc::new(InMemoryUsageStore::new()),
//!     Arc::new(StaticPlanDirectory::from_config(&QuotaConfig::default())),
//! );
//! let service = DocumentService::new(
//!     Arc::new(InMemoryDocumentStore::new()),
//!     quota,
//!     EventBus::default(),
//! );
//!
//! let request = NewDocument::new("NDA").with_signer(NewSigner::new("ana@example.com"));
//! if let CreateOutcome::Created(record) = service.create_document(OwnerId::new("acme"), request).await? {
//!     println!("created {}", record.id());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod document;
pub mod error;
pub mod events;
pub mod provider_status;
pub mod quota;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod types;

pub use document::{DocumentRecord, Mutation, MutationOutcome};
pub use error::{SigningError, StoreError};
pub use events::{DocumentEvent, EventBus};
pub use provider_status::{ProviderEffect, ProviderReport, ProviderSignerReport, ProviderStatus};
pub use quota::{
    DocumentLimit, InMemoryUsageStore, LimitStatus, Plan, PlanDirectory, QuotaConfig,
    QuotaDecision, QuotaLedger, StaticPlanDirectory, UsageStore,
};
pub use service::{CreateOutcome, DocumentService};
pub use state_machine::{allowed_transitions, validate_transition};
pub use store::{DocumentStore, InMemoryDocumentStore};
pub use types::{
    Document, DocumentId, DocumentStatus, EnvelopeId, MonthStart, NewDocument, NewSigner,
    OwnerId, Signer, SignerId, SignerStatus,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Signflow Core
    pub use crate::{
        CreateOutcome, DocumentEvent, DocumentId, DocumentRecord, DocumentService, DocumentStatus,
        EnvelopeId, EventBus, InMemoryDocumentStore, InMemoryUsageStore, NewDocument, NewSigner,
        OwnerId, ProviderReport, ProviderStatus, QuotaConfig, QuotaLedger, SignerId, SigningError,
        StaticPlanDirectory,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
