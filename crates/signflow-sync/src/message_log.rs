//! Outbound message delivery log
//!
//! Tracks the carrier's delivery status for notification messages sent to
//! signers. Status only moves forward, so a late `sent` callback cannot
//! overwrite `delivered`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use signflow_core::StoreError;
use std::fmt;

/// Carrier delivery status
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageStatus {
    Queued,
    Sent,
    Delivered,
    Read,
    Failed,
    Undelivered,
    /// Code outside the tracked vocabulary
    Unknown(String),
}

impl MessageStatus {
    /// Parse a carrier code, ignoring case
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "queued" | "accepted" | "scheduled" => Self::Queued,
            "sending" | "sent" => Self::Sent,
            "delivered" => Self::Delivered,
            "read" => Self::Read,
            "failed" | "canceled" => Self::Failed,
            "undelivered" => Self::Undelivered,
            _ => Self::Unknown(code.trim().to_string()),
        }
    }

    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
            Self::Undelivered => "undelivered",
            Self::Unknown(code) => code,
        }
    }

    /// Check if no further status is accepted
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Read | Self::Failed | Self::Undelivered)
    }

    fn rank(&self) -> Option<u8> {
        match self {
            Self::Queued => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Failed | Self::Undelivered | Self::Unknown(_) => None,
        }
    }

    /// Check if moving from `self` to `next` is forward progress
    #[must_use]
    pub fn can_advance_to(&self, next: &MessageStatus) -> bool {
        if self.is_terminal() || matches!(next, Self::Unknown(_)) {
            return false;
        }
        match next {
            // Failure only before the carrier confirmed delivery
            Self::Failed | Self::Undelivered => matches!(self, Self::Queued | Self::Sent),
            _ => next.rank() > self.rank(),
        }
    }
}

impl From<String> for MessageStatus {
    fn from(code: String) -> Self {
        Self::from_code(&code)
    }
}

impl From<MessageStatus> for String {
    fn from(status: MessageStatus) -> Self {
        status.code().to_string()
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Delivery callback from the carrier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierUpdate {
    pub message_sid: String,
    pub status: MessageStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl CarrierUpdate {
    /// Deduplication key: message sid plus status
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        format!("carrier:{}:{}", self.message_sid, self.status)
    }
}

/// Stored delivery state of one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageLogEntry {
    pub message_sid: String,
    pub status: MessageStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Delivery log storage
#[async_trait]
pub trait MessageLog: Send + Sync + fmt::Debug {
    /// Apply an update; returns whether the entry changed
    async fn record(&self, update: CarrierUpdate, at: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn get(&self, message_sid: &str) -> Result<Option<MessageLogEntry>, StoreError>;
}

/// In-process delivery log
#[derive(Debug, Default)]
pub struct InMemoryMessageLog {
    entries: DashMap<String, MessageLogEntry>,
}

impl InMemoryMessageLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageLog for InMemoryMessageLog {
    async fn record(&self, update: CarrierUpdate, at: DateTime<Utc>) -> Result<bool, StoreError> {
        if let MessageStatus::Unknown(code) = &update.status {
            tracing::warn!(message_sid = %update.message_sid, status = %code, "unmapped carrier status");
            return Ok(false);
        }

        match self.entries.entry(update.message_sid.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(MessageLogEntry {
                    message_sid: update.message_sid,
                    status: update.status,
                    error_code: update.error_code,
                    error_message: update.error_message,
                    updated_at: at,
                });
                Ok(true)
            }
            Entry::Occupied(mut row) => {
                let entry = row.get_mut();
                if !entry.status.can_advance_to(&update.status) {
                    tracing::debug!(
                        message_sid = %entry.message_sid,
                        current = %entry.status,
                        reported = %update.status,
                        "stale carrier status discarded"
                    );
                    return Ok(false);
                }
                entry.status = update.status;
                entry.error_code = update.error_code;
                entry.error_message = update.error_message;
                entry.updated_at = at;
                Ok(true)
            }
        }
    }

    async fn get(&self, message_sid: &str) -> Result<Option<MessageLogEntry>, StoreError> {
        Ok(self.entries.get(message_sid).map(|e| e.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(sid: &str, code: &str) -> CarrierUpdate {
        CarrierUpdate {
            message_sid: sid.to_string(),
            status: MessageStatus::from_code(code),
            error_code: None,
            error_message: None,
        }
    }

    #[test]
    fn advancement_rules() {
        use MessageStatus::*;
        assert!(Queued.can_advance_to(&Sent));
        assert!(Sent.can_advance_to(&Delivered));
        assert!(Sent.can_advance_to(&Failed));
        assert!(!Delivered.can_advance_to(&Sent));
        assert!(!Delivered.can_advance_to(&Failed));
        assert!(!Failed.can_advance_to(&Delivered));
        assert!(!Read.can_advance_to(&Read));
    }

    #[tokio::test]
    async fn late_callbacks_do_not_regress() {
        let log = InMemoryMessageLog::new();
        let now = Utc::now();

        assert!(log.record(update("SM1", "sent"), now).await.unwrap());
        assert!(log.record(update("SM1", "delivered"), now).await.unwrap());
        assert!(!log.record(update("SM1", "sent"), now).await.unwrap());
        assert!(!log.record(update("SM1", "undelivered"), now).await.unwrap());

        let entry = log.get("SM1").await.unwrap().unwrap();
        assert_eq!(entry.status, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn failure_keeps_error_details() {
        let log = InMemoryMessageLog::new();
        let mut failed = update("SM2", "failed");
        failed.error_code = Some("30007".into());
        failed.error_message = Some("Carrier violation".into());

        log.record(update("SM2", "queued"), Utc::now()).await.unwrap();
        assert!(log.record(failed, Utc::now()).await.unwrap());

        let entry = log.get("SM2").await.unwrap().unwrap();
        assert_eq!(entry.status, MessageStatus::Failed);
        assert_eq!(entry.error_code.as_deref(), Some("30007"));
    }

    #[tokio::test]
    async fn unknown_status_is_ignored() {
        let log = InMemoryMessageLog::new();
        assert!(!log.record(update("SM3", "teleported"), Utc::now()).await.unwrap());
        assert!(log.get("SM3").await.unwrap().is_none());
    }
}
