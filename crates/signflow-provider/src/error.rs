//! Provider client errors

use signflow_core::EnvelopeId;

/// Errors from talking to the signing provider
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Token endpoint unreachable, overloaded or returned garbage
    #[error("token request failed: {0}")]
    Token(String),

    /// Token endpoint refused the client credentials (4xx other than 429)
    #[error("token endpoint rejected credentials with HTTP {status}: {body}")]
    TokenRejected { status: u16, body: String },

    /// Provider rejected the bearer token
    #[error("provider rejected credentials")]
    Unauthorized,

    /// Provider does not know this envelope
    #[error("envelope not found: {0}")]
    EnvelopeNotFound(EnvelopeId),

    /// Non-success HTTP status
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Request exceeded its timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Response body did not match the expected shape
    #[error("malformed provider response: {0}")]
    Decode(String),

    /// Client could not be built from configuration
    #[error("invalid provider configuration: {0}")]
    Config(String),
}

impl ProviderError {
    /// Check if retrying on the next cycle may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Token(_) | Self::Transport(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Unauthorized
            | Self::TokenRejected { .. }
            | Self::EnvelopeNotFound(_)
            | Self::Decode(_)
            | Self::Config(_) => false,
        }
    }

    /// Check if this is an authentication failure
    #[inline]
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::TokenRejected { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::Config(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ProviderError::Transport("reset".into()).is_transient());
        assert!(ProviderError::Status { status: 503, body: String::new() }.is_transient());
        assert!(ProviderError::Status { status: 429, body: String::new() }.is_transient());
        assert!(!ProviderError::Status { status: 400, body: String::new() }.is_transient());
        assert!(!ProviderError::Unauthorized.is_transient());
        assert!(ProviderError::Unauthorized.is_auth());
    }

    #[test]
    fn rejected_credentials_are_not_retried() {
        let rejected = ProviderError::TokenRejected {
            status: 401,
            body: "invalid_client".into(),
        };
        assert!(!rejected.is_transient());
        assert!(rejected.is_auth());

        let outage = ProviderError::Token("HTTP 503: busy".into());
        assert!(outage.is_transient());
        assert!(!outage.is_auth());
    }
}
