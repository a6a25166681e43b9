//! Provider status vocabulary
//!
//! The provider reports envelope progress with its own status codes. This
//! module closes that vocabulary into [`ProviderStatus`] and maps each code
//! onto the effect it has on a local document.

use crate::types::EnvelopeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status code reported by the provider for an envelope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderStatus {
    /// Received, not yet processed
    Pending,
    /// Being processed by the certificate authority
    Processing,
    /// Certificate issued; every signature collected
    Issued,
    /// Approved by the authority; every signature collected
    Approved,
    /// Rejected by the authority
    Rejected,
    /// Revoked after issuance or withdrawn by the requester
    Revoked,
    /// Signing window elapsed
    Expired,
    /// Code outside the known vocabulary
    Unknown(String),
}

/// Effect of a provider status on the local state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEffect {
    /// Provider still working; nothing to apply
    InProgress,
    /// Every signer is done; document becomes `signed`
    Complete,
    /// Provider abandoned the envelope; document becomes `cancelled`
    Cancel,
    /// Unmapped code; logged and otherwise ignored
    Unrecognized,
}

impl ProviderStatus {
    /// Parse a provider code. Matching ignores case and surrounding whitespace.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        let normalized = code.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "pending" | "created" | "waiting" => Self::Pending,
            "processing" | "in_progress" | "in_analysis" => Self::Processing,
            "issued" | "completed" | "finished" => Self::Issued,
            "approved" => Self::Approved,
            "rejected" | "refused" => Self::Rejected,
            "revoked" | "cancelled" | "canceled" => Self::Revoked,
            "expired" => Self::Expired,
            _ => Self::Unknown(code.trim().to_string()),
        }
    }

    /// Canonical code
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Issued => "issued",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
            Self::Unknown(code) => code,
        }
    }

    /// Translate onto the local state machine
    #[must_use]
    pub fn effect(&self) -> ProviderEffect {
        match self {
            Self::Pending | Self::Processing => ProviderEffect::InProgress,
            Self::Issued | Self::Approved => ProviderEffect::Complete,
            Self::Rejected | Self::Revoked | Self::Expired => ProviderEffect::Cancel,
            Self::Unknown(_) => ProviderEffect::Unrecognized,
        }
    }

    /// Check if the provider will not report further progress
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.effect(),
            ProviderEffect::Complete | ProviderEffect::Cancel
        )
    }
}

impl From<String> for ProviderStatus {
    fn from(code: String) -> Self {
        Self::from_code(&code)
    }
}

impl From<ProviderStatus> for String {
    fn from(status: ProviderStatus) -> Self {
        status.code().to_string()
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Per-signer progress as seen by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSignerReport {
    pub email: String,
    #[serde(default)]
    pub signed: bool,
    #[serde(default)]
    pub signed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub identity_number: Option<String>,
}

impl ProviderSignerReport {
    #[must_use]
    pub fn signed(email: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            email: email.into(),
            signed: true,
            signed_at: Some(at),
            identity_number: None,
        }
    }
}

/// Envelope status as reported through webhook or poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderReport {
    pub envelope_id: EnvelopeId,
    pub status: ProviderStatus,
    #[serde(default)]
    pub signers: Vec<ProviderSignerReport>,
}

impl ProviderReport {
    #[must_use]
    pub fn new(envelope_id: EnvelopeId, status: ProviderStatus) -> Self {
        Self {
            envelope_id,
            status,
            signers: Vec::new(),
        }
    }

    /// With signer progress
    #[must_use]
    pub fn with_signer(mut self, signer: ProviderSignerReport) -> Self {
        self.signers.push(signer);
        self
    }

    /// Deduplication key: envelope plus status plus signed signer set
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        let mut signed: Vec<String> = self
            .signers
            .iter()
            .filter(|s| s.signed)
            .map(|s| s.email.trim().to_ascii_lowercase())
            .collect();
        signed.sort();
        format!("{}:{}:{}", self.envelope_id, self.status, signed.join(","))
    }
}
