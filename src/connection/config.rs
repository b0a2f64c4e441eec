use std::time::Duration;

use serde::Deserialize;

use crate::core::{DbError, Result};
use crate::versioned::{ConflictRetryPolicy, UpdateStrategy};

/// Store configuration
///
/// Built with chained setters, or loaded from JSON:
///
/// ```
/// # use rowversion::StoreConfig;
/// let config = StoreConfig::from_json(r#"{ "lock_timeout_ms": 250 }"#).unwrap();
/// assert_eq!(config.lock_timeout.as_millis(), 250);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a statement waits for a row locked by another transaction
    pub lock_timeout: Duration,

    /// Default strategy for versioned updates
    pub update_strategy: UpdateStrategy,

    /// Default retry policy for `update_with_retry`
    pub conflict_retry: ConflictRetryPolicy,
}

impl StoreConfig {
    pub fn new() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            update_strategy: UpdateStrategy::default(),
            conflict_retry: ConflictRetryPolicy::default(),
        }
    }

    /// Set the row lock wait timeout
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the versioned update strategy
    pub fn update_strategy(mut self, strategy: UpdateStrategy) -> Self {
        self.update_strategy = strategy;
        self
    }

    /// Set the conflict retry policy
    pub fn conflict_retry(mut self, policy: ConflictRetryPolicy) -> Self {
        self.conflict_retry = policy;
        self
    }

    /// Parse from a JSON document. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(json)
            .map_err(|e| DbError::InvalidInput(format!("invalid store config: {}", e)))?;

        let mut config = Self::new();
        if let Some(ms) = file.lock_timeout_ms {
            config.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(strategy) = file.update_strategy {
            config.update_strategy = strategy;
        }
        if let Some(policy) = file.conflict_retry {
            config.conflict_retry = policy;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.lock_timeout.is_zero() {
            return Err(DbError::InvalidInput("lock_timeout must be > 0".into()));
        }

        if self.conflict_retry.max_attempts == 0 {
            return Err(DbError::InvalidInput(
                "conflict_retry.max_attempts must be > 0".into(),
            ));
        }

        if self.conflict_retry.base_backoff_ms > self.conflict_retry.max_backoff_ms {
            return Err(DbError::InvalidInput(
                "conflict_retry.base_backoff_ms cannot exceed max_backoff_ms".into(),
            ));
        }

        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    lock_timeout_ms: Option<u64>,
    update_strategy: Option<UpdateStrategy>,
    conflict_retry: Option<ConflictRetryPolicy>,
}
