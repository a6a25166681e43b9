//! Status client for the certificate-authority signing provider
//!
//! Stateless request/response wrapper. Retries are left to the caller: the
//! reconciliation engine simply tries again on its next tick.

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::token::{ClientCredentials, TokenCache};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use signflow_core::{EnvelopeId, ProviderReport, ProviderSignerReport, ProviderStatus};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Envelope status lookups
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SigningProvider: Send + Sync {
    /// Current status of one envelope
    async fn fetch_status(&self, envelope: &EnvelopeId) -> Result<ProviderReport, ProviderError>;

    /// Current status of many envelopes
    ///
    /// All or nothing: any failed request fails the whole batch. Envelopes
    /// the provider omits are absent from the map.
    async fn fetch_status_batch(
        &self,
        envelopes: &[EnvelopeId],
    ) -> Result<HashMap<EnvelopeId, ProviderReport>, ProviderError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSigner {
    email: String,
    #[serde(default)]
    signed: bool,
    #[serde(default)]
    signed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    identity_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStatus {
    #[serde(default, alias = "requestId", alias = "id")]
    envelope_id: Option<String>,
    #[serde(alias = "statusCode")]
    status: String,
    #[serde(default)]
    signers: Vec<WireSigner>,
}

impl WireStatus {
    fn into_report(self, fallback: &EnvelopeId) -> ProviderReport {
        let envelope_id = self
            .envelope_id
            .map_or_else(|| fallback.clone(), EnvelopeId::new);
        ProviderReport {
            envelope_id,
            status: ProviderStatus::from_code(&self.status),
            signers: self
                .signers
                .into_iter()
                .map(|s| ProviderSignerReport {
                    email: s.email,
                    signed: s.signed,
                    signed_at: s.signed_at,
                    identity_number: s.identity_number,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchRequest<'a> {
    envelope_ids: &'a [EnvelopeId],
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    results: Vec<WireStatus>,
}

/// HTTP implementation of [`SigningProvider`]
#[derive(Clone)]
pub struct HttpSigningProvider {
    client: Client,
    base_url: String,
    batch_size: usize,
    tokens: TokenCache,
}

impl HttpSigningProvider {
    /// Build a client using the client-credentials grant for tokens
    ///
    /// # Errors
    /// - `ProviderError::Config` if the HTTP client cannot be built
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;
        let source = ClientCredentials::new(client.clone(), config);
        let tokens = TokenCache::new(Arc::new(source), config.token_skew());
        Ok(Self::with_tokens(client, config, tokens))
    }

    /// Build with an explicit token cache
    #[must_use]
    pub fn with_tokens(client: Client, config: &ProviderConfig, tokens: TokenCache) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            batch_size: config.batch_size.max(1),
            tokens,
        }
    }

    #[inline]
    #[must_use]
    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    /// Send with a bearer token; a 401 drops the cached token
    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        envelope: Option<&EnvelopeId>,
    ) -> Result<T, ProviderError> {
        let token = self.tokens.get().await?;
        let response = request.bearer_auth(token.secret()).send().await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("provider returned 401, invalidating cached token");
            self.tokens.invalidate().await;
            return Err(ProviderError::Unauthorized);
        }
        if status == StatusCode::NOT_FOUND {
            if let Some(envelope) = envelope {
                return Err(ProviderError::EnvelopeNotFound(envelope.clone()));
            }
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

impl fmt::Debug for HttpSigningProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSigningProvider")
            .field("base_url", &self.base_url)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SigningProvider for HttpSigningProvider {
    #[tracing::instrument(skip(self), fields(envelope_id = %envelope))]
    async fn fetch_status(&self, envelope: &EnvelopeId) -> Result<ProviderReport, ProviderError> {
        let url = format!("{}/v1/envelopes/{}/status", self.base_url, envelope);
        let wire: WireStatus = self.send(self.client.get(url), Some(envelope)).await?;
        Ok(wire.into_report(envelope))
    }

    #[tracing::instrument(skip(self, envelopes), fields(count = envelopes.len()))]
    async fn fetch_status_batch(
        &self,
        envelopes: &[EnvelopeId],
    ) -> Result<HashMap<EnvelopeId, ProviderReport>, ProviderError> {
        let url = format!("{}/v1/envelopes/status", self.base_url);
        let mut reports = HashMap::with_capacity(envelopes.len());

        for chunk in envelopes.chunks(self.batch_size) {
            let request = self.client.post(&url).json(&BatchRequest {
                envelope_ids: chunk,
            });
            let response: BatchResponse = self.send(request, None).await?;
            for wire in response.results {
                let Some(id) = wire.envelope_id.clone() else {
                    tracing::warn!("batch result without envelope id, skipped");
                    continue;
                };
                let envelope = EnvelopeId::new(id);
                if !chunk.contains(&envelope) {
                    tracing::warn!(envelope_id = %envelope, "provider returned an envelope that was not requested");
                    continue;
                }
                reports.insert(envelope.clone(), wire.into_report(&envelope));
            }
        }

        tracing::debug!(returned = reports.len(), "batch status fetched");
        Ok(reports)
    }
}
