//! Provider client configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Smallest accepted token refresh skew
pub const MIN_TOKEN_SKEW_SECS: u64 = 30;
/// Largest accepted token refresh skew
pub const MAX_TOKEN_SKEW_SECS: u64 = 60;

/// Provider connection settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the status API
    pub base_url: String,
    /// OAuth2 token endpoint
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Refresh the token this many seconds before it expires
    pub token_skew_secs: u64,
    /// Most envelopes per batch status request
    pub batch_size: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9400".to_string(),
            token_url: "http://127.0.0.1:9400/oauth/token".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            request_timeout_secs: 10,
            connect_timeout_secs: 3,
            token_skew_secs: 45,
            batch_size: 50,
        }
    }
}

impl ProviderConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token_url: token_url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = client_id.into();
        self.client_secret = client_secret.into();
        self
    }

    #[must_use]
    pub fn with_token_skew(mut self, skew: Duration) -> Self {
        self.token_skew_secs = skew.as_secs();
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[inline]
    #[must_use]
    pub fn token_skew(&self) -> Duration {
        Duration::from_secs(self.token_skew_secs)
    }

    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Validate value ranges
    ///
    /// # Errors
    /// Returns a description of the first invalid field
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_TOKEN_SKEW_SECS..=MAX_TOKEN_SKEW_SECS).contains(&self.token_skew_secs) {
            return Err(format!(
                "provider.token_skew_secs must be within {MIN_TOKEN_SKEW_SECS}..={MAX_TOKEN_SKEW_SECS}, got {}",
                self.token_skew_secs
            ));
        }
        if self.batch_size == 0 {
            return Err("provider.batch_size must be positive".into());
        }
        if self.request_timeout_secs == 0 {
            return Err("provider.request_timeout_secs must be positive".into());
        }
        for (field, url) in [("base_url", &self.base_url), ("token_url", &self.token_url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!("provider.{field} is not an http(s) URL: '{url}'"));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("token_skew_secs", &self.token_skew_secs)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}
