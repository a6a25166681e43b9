//! Core types for signflow
//!
//! Defines the fundamental data model:
//! - Identifiers for documents, signers, owners and provider envelopes
//! - Documents and their signer sets
//! - Creation requests
//! - Calendar-month keys for usage accounting

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Unique document identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub Ulid);

impl DocumentId {
    /// Generate new document ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Unique signer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignerId(pub Ulid);

impl SignerId {
    /// Generate new signer ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SignerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SignerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SignerId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Owning organization, as resolved by the caller's identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-side identifier grouping a document and its remote signing workflow
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeId(pub String);

impl EnvelopeId {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Document signing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// No signer has signed yet
    Pending,
    /// At least one, but not every, signer has signed
    PartiallySigned,
    /// Every signer has signed
    Signed,
    /// Withdrawn; absorbing
    Cancelled,
}

impl DocumentStatus {
    /// Wire/storage representation
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::PartiallySigned => "partially_signed",
            DocumentStatus::Signed => "signed",
            DocumentStatus::Cancelled => "cancelled",
        }
    }

    /// Check if no further signing progress is possible
    #[inline]
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, DocumentStatus::Signed | DocumentStatus::Cancelled)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerStatus {
    /// Waiting for signature
    Pending,
    /// Signed; terminal
    Signed,
}

/// A party asked to sign a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signer {
    pub id: SignerId,
    pub document_id: DocumentId,
    pub email: String,
    /// Organization signers sort ahead of external ones
    pub is_organization_signer: bool,
    pub status: SignerStatus,
    pub signed_at: Option<DateTime<Utc>>,
    pub identity_number: Option<String>,
}

impl Signer {
    /// Check if signer has signed
    #[inline]
    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.status == SignerStatus::Signed
    }

    /// Case-insensitive email match
    #[inline]
    #[must_use]
    pub fn matches_email(&self, email: &str) -> bool {
        self.email.eq_ignore_ascii_case(email.trim())
    }
}

/// Document header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    pub owner_id: OwnerId,
    pub name: String,
    pub status: DocumentStatus,
    /// Cache of the number of signers in `signed` state
    pub signed_count: u32,
    pub total_signers: u32,
    pub provider_envelope_id: Option<EnvelopeId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Check if this document is a candidate for provider polling
    #[inline]
    #[must_use]
    pub fn is_awaiting_provider(&self) -> bool {
        !self.status.is_final() && self.provider_envelope_id.is_some()
    }
}

/// Signer entry of a creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSigner {
    pub email: String,
    #[serde(default)]
    pub is_organization_signer: bool,
}

impl NewSigner {
    #[inline]
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            is_organization_signer: false,
        }
    }

    /// Mark as organization signer
    #[inline]
    #[must_use]
    pub fn organization(mut self) -> Self {
        self.is_organization_signer = true;
        self
    }
}

/// Document creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    pub name: String,
    pub signers: Vec<NewSigner>,
    /// Set when the document is countersigned by the provider
    #[serde(default)]
    pub provider_envelope_id: Option<EnvelopeId>,
}

impl NewDocument {
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signers: Vec::new(),
            provider_envelope_id: None,
        }
    }

    /// Add a signer
    #[inline]
    #[must_use]
    pub fn with_signer(mut self, signer: NewSigner) -> Self {
        self.signers.push(signer);
        self
    }

    /// With provider envelope
    #[inline]
    #[must_use]
    pub fn with_envelope(mut self, envelope: EnvelopeId) -> Self {
        self.provider_envelope_id = Some(envelope);
        self
    }
}

/// First day of a UTC calendar month; key for monthly usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonthStart(NaiveDate);

impl MonthStart {
    /// Month containing `at`
    #[must_use]
    pub fn containing(at: DateTime<Utc>) -> Self {
        let date = at.date_naive();
        // Day 1 exists in every month
        Self(date.with_day(1).unwrap_or(date))
    }

    /// Current month
    #[inline]
    #[must_use]
    pub fn current() -> Self {
        Self::containing(Utc::now())
    }

    #[inline]
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for MonthStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m"))
    }
}
