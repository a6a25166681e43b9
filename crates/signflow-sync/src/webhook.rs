//! Webhook payload parsing and deduplication
//!
//! Provider callbacks arrive as JSON with a loose schema; carrier callbacks
//! arrive form-encoded. Both are reduced to typed events plus an idempotency
//! key before anything is mutated.

use crate::error::IngestError;
use crate::message_log::{CarrierUpdate, MessageStatus};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Deserialize;
use serde_json::Value;
use signflow_core::{EnvelopeId, ProviderReport, ProviderSignerReport, ProviderStatus};
use std::time::Duration;

const ENVELOPE_KEYS: [&str; 3] = ["envelopeId", "requestId", "id"];
const STATUS_KEYS: [&str; 2] = ["status", "statusCode"];

/// Scalar field as a trimmed string; numbers are accepted
fn scalar(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match payload.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Parse a provider webhook body
///
/// # Errors
/// - `IngestError::Malformed` if the body is not a JSON object
/// - `IngestError::MissingField` without an envelope id or status
pub fn parse_provider_webhook(body: &[u8]) -> Result<ProviderReport, IngestError> {
    let payload: Value =
        serde_json::from_slice(body).map_err(|e| IngestError::Malformed(e.to_string()))?;
    if !payload.is_object() {
        return Err(IngestError::Malformed("expected a JSON object".into()));
    }

    let envelope = scalar(&payload, &ENVELOPE_KEYS).ok_or(IngestError::MissingField("envelopeId"))?;
    let status = scalar(&payload, &STATUS_KEYS).ok_or(IngestError::MissingField("status"))?;

    let signers = match payload.get("signers") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter_map(parse_signer).collect(),
        Some(_) => return Err(IngestError::Malformed("signers must be an array".into())),
    };

    Ok(ProviderReport {
        envelope_id: EnvelopeId::new(envelope),
        status: ProviderStatus::from_code(&status),
        signers,
    })
}

fn parse_signer(item: &Value) -> Option<ProviderSignerReport> {
    let email = item.get("email")?.as_str()?.trim();
    if email.is_empty() {
        return None;
    }
    let signed = match item.get("signed") {
        Some(Value::Bool(b)) => *b,
        _ => item
            .get("status")
            .and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("signed")),
    };
    let signed_at = item
        .get("signedAt")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));
    let identity_number = item
        .get("identityNumber")
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(ProviderSignerReport {
        email: email.to_string(),
        signed,
        signed_at,
        identity_number,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CarrierForm {
    #[serde(default)]
    message_sid: String,
    #[serde(default)]
    message_status: String,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Parse a form-encoded carrier status callback
///
/// # Errors
/// - `IngestError::Malformed` if the body is not form-encoded
/// - `IngestError::MissingField` without a message sid or status
pub fn parse_carrier_webhook(body: &[u8]) -> Result<CarrierUpdate, IngestError> {
    let form: CarrierForm =
        serde_urlencoded::from_bytes(body).map_err(|e| IngestError::Malformed(e.to_string()))?;

    let message_sid = form.message_sid.trim();
    if message_sid.is_empty() {
        return Err(IngestError::MissingField("MessageSid"));
    }
    if form.message_status.trim().is_empty() {
        return Err(IngestError::MissingField("MessageStatus"));
    }

    Ok(CarrierUpdate {
        message_sid: message_sid.to_string(),
        status: MessageStatus::from_code(&form.message_status),
        error_code: form.error_code.filter(|c| !c.trim().is_empty()),
        error_message: form.error_message.filter(|m| !m.trim().is_empty()),
    })
}

/// Remembers idempotency keys for a bounded window
#[derive(Debug, Clone)]
pub struct IdempotencyFilter {
    seen: Cache<String, ()>,
}

impl IdempotencyFilter {
    #[must_use]
    pub fn new(window: Duration, capacity: u64) -> Self {
        Self {
            seen: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(window)
                .build(),
        }
    }

    /// Record `key`; true only for the first sighting within the window
    pub async fn first_seen(&self, key: String) -> bool {
        self.seen.entry(key).or_insert(()).await.is_fresh()
    }

    /// Forget `key` so a redelivery is processed again
    pub async fn forget(&self, key: &str) {
        self.seen.invalidate(key).await;
    }
}
