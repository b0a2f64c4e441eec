use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a versioned update talks to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    /// Read the current version first, then issue the conditional update.
    ReadThenWrite,
    /// Issue the conditional update directly; read only to explain a miss.
    #[default]
    ConditionalWrite,
}

/// Retry behaviour for `VersionedRecordStore::update_with_retry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictRetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ConflictRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 5,
            max_backoff_ms: 100,
        }
    }
}

impl ConflictRetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based): doubling, capped.
    pub fn backoff(&self, retry: usize) -> Duration {
        let exponent = retry.saturating_sub(1).min(16) as u32;
        let delay = self
            .base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = ConflictRetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(5));
        assert_eq!(policy.backoff(2), Duration::from_millis(10));
        assert_eq!(policy.backoff(3), Duration::from_millis(20));
        assert_eq!(policy.backoff(10), Duration::from_millis(100));
    }

    #[test]
    fn test_strategy_names() {
        let strategy: UpdateStrategy = serde_json::from_str("\"read_then_write\"").unwrap();
        assert_eq!(strategy, UpdateStrategy::ReadThenWrite);
        assert_eq!(UpdateStrategy::default(), UpdateStrategy::ConditionalWrite);
    }
}
