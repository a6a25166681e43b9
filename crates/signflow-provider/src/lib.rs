//! Signflow Provider - signing provider client
//!
//! Talks to the certificate-authority signing provider:
//! - OAuth2 client-credentials token with skew-aware caching
//! - Single and batch envelope status lookups
//!
//! The [`SigningProvider`] trait is the seam used by reconciliation; enable
//! the `testing` feature for `MockSigningProvider`.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod token;

pub use client::{HttpSigningProvider, SigningProvider};
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use token::{AccessToken, ClientCredentials, TokenCache, TokenSource};

#[cfg(any(test, feature = "testing"))]
pub use client::MockSigningProvider;
#[cfg(any(test, feature = "testing"))]
pub use token::MockTokenSource;
