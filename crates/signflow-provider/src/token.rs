//! Bearer token acquisition and caching
//!
//! [`TokenCache`] keeps one token in a moka cache whose per-entry lifetime is
//! the server-declared expiry minus the configured skew. Concurrent callers
//! that miss share one fetch; a failed fetch inserts nothing.

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bearer token with its declared lifetime
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    /// Lifetime declared by the token endpoint
    pub expires_in: Duration,
}

impl AccessToken {
    #[must_use]
    pub fn new(secret: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            secret: secret.into(),
            expires_in,
        }
    }

    #[inline]
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Source of fresh tokens
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<AccessToken, ProviderError>;
}

/// How long a token may be served from cache
#[inline]
#[must_use]
pub fn cache_lifetime(expires_in: Duration, skew: Duration) -> Duration {
    expires_in.saturating_sub(skew)
}

struct SkewedExpiry {
    skew: Duration,
}

impl Expiry<(), AccessToken> for SkewedExpiry {
    fn expire_after_create(
        &self,
        _key: &(),
        value: &AccessToken,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(cache_lifetime(value.expires_in, self.skew))
    }
}

/// Single-slot token cache
#[derive(Clone)]
pub struct TokenCache {
    inner: Cache<(), AccessToken>,
    source: Arc<dyn TokenSource>,
    skew: Duration,
}

impl TokenCache {
    #[must_use]
    pub fn new(source: Arc<dyn TokenSource>, skew: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(1)
                .expire_after(SkewedExpiry { skew })
                .build(),
            source,
            skew,
        }
    }

    /// Cached token, fetching a new one when absent or within skew of expiry
    ///
    /// # Errors
    /// Propagates the source's error; the cache is left empty
    pub async fn get(&self) -> Result<AccessToken, ProviderError> {
        let source = Arc::clone(&self.source);
        let skew = self.skew;
        self.inner
            .try_get_with((), async move {
                let token = source.fetch_token().await?;
                tracing::debug!(
                    expires_in_secs = token.expires_in.as_secs(),
                    cached_for_secs = cache_lifetime(token.expires_in, skew).as_secs(),
                    "provider token acquired"
                );
                Ok::<_, ProviderError>(token)
            })
            .await
            .map_err(|err: Arc<ProviderError>| {
                tracing::warn!(error = %err, "provider token fetch failed");
                (*err).clone()
            })
    }

    /// Drop the cached token; the next call fetches anew
    pub async fn invalidate(&self) {
        self.inner.invalidate(&()).await;
    }

    #[inline]
    #[must_use]
    pub fn skew(&self) -> Duration {
        self.skew
    }
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("skew", &self.skew)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Seconds
    expires_in: u64,
}

/// OAuth2 client-credentials grant against the provider's token endpoint
#[derive(Clone)]
pub struct ClientCredentials {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl ClientCredentials {
    #[must_use]
    pub fn new(client: reqwest::Client, config: &ProviderConfig) -> Self {
        Self {
            client,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for ClientCredentials {
    async fn fetch_token(&self) -> Result<AccessToken, ProviderError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::Token(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                return Err(ProviderError::TokenRejected {
                    status: status.as_u16(),
                    body,
                });
            }
            return Err(ProviderError::Token(format!("HTTP {}: {body}", status.as_u16())));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Token(format!("malformed token response: {e}")))?;
        Ok(AccessToken::new(
            body.access_token,
            Duration::from_secs(body.expires_in),
        ))
    }
}
