//! Reconciliation and ingest settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `[sync]` configuration section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between reconciliation ticks
    pub interval_secs: u64,
    /// How long a webhook idempotency key is remembered
    pub dedup_window_secs: u64,
    /// Most idempotency keys kept at once
    pub dedup_capacity: u64,
    /// Bound of the ingest queue
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            dedup_window_secs: 600,
            dedup_capacity: 100_000,
            channel_capacity: 1024,
        }
    }
}

impl SyncConfig {
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[inline]
    #[must_use]
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_secs = interval.as_secs();
        self
    }

    /// Validate value ranges
    ///
    /// # Errors
    /// Returns a description of the first invalid field
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err("sync.interval_secs must be positive".into());
        }
        if self.dedup_window_secs == 0 {
            return Err("sync.dedup_window_secs must be positive".into());
        }
        if self.channel_capacity == 0 {
            return Err("sync.channel_capacity must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_rejected() {
        assert!(SyncConfig::default().validate().is_ok());
        let config = SyncConfig {
            interval_secs: 0,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
