//! Flat keyed configuration lookup (§4.A).
//!
//! Resolution order, first hit wins: per-flow-kind override, per-environment
//! global, process defaults.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Recognized config keys. Kept as `&'static str` constants rather than an
/// enum so operators can extend the flat namespace without touching this
/// crate, matching the "flat key/value interface" framing of §1.
pub mod keys {
    pub const MAX_CONCURRENT: &str = "max_concurrent";
    pub const BATCH_SIZE: &str = "batch_size";
    pub const POLL_INTERVAL_MS: &str = "poll_interval_ms";
    pub const LEASE_DURATION_S: &str = "lease_duration_s";
    pub const HEARTBEAT_INTERVAL_S: &str = "heartbeat_interval_s";
    pub const MAX_ATTEMPTS: &str = "max_attempts";
    pub const BACKOFF_BASE_S: &str = "backoff_base_s";
    pub const BACKOFF_MAX_S: &str = "backoff_max_s";
    pub const BACKOFF_JITTER: &str = "backoff_jitter";
    pub const POOL_SIZE: &str = "pool_size";
    pub const POOL_MAX_OVERFLOW: &str = "pool_max_overflow";
    pub const POOL_TIMEOUT_S: &str = "pool_timeout_s";
    pub const DB_RETRY_ATTEMPTS: &str = "db_retry_attempts";
    pub const DB_RETRY_MIN_WAIT_S: &str = "db_retry_min_wait_s";
    pub const DB_RETRY_MAX_WAIT_S: &str = "db_retry_max_wait_s";
    pub const DB_RETRY_JITTER: &str = "db_retry_jitter";
    pub const LOCAL_QUEUE_PATH: &str = "local_queue_path";
    pub const LOCAL_QUEUE_MAX_ENTRIES: &str = "local_queue_max_entries";
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration missing required key `{0}`")]
    Missing(String),
    #[error("configuration key `{key}` has invalid value `{value}`")]
    Invalid { key: String, value: String },
}

/// Deployment environment, resolved from `RUNTIME_ENV` (default `development`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn from_env_var(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "staging" => Self::Staging,
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }
}

/// Flat keyed lookup over string values.
pub trait ConfigProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn require(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    fn get_u64(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        match self.get(key) {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid { key: key.to_string(), value: v }),
            None => Ok(default),
        }
    }

    fn get_f64(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        match self.get(key) {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid { key: key.to_string(), value: v }),
            None => Ok(default),
        }
    }

    fn get_duration_ms(&self, key: &str, default_ms: u64) -> Result<Duration, ConfigError> {
        Ok(Duration::from_millis(self.get_u64(key, default_ms)?))
    }

    fn get_duration_s(&self, key: &str, default_s: u64) -> Result<Duration, ConfigError> {
        Ok(Duration::from_secs(self.get_u64(key, default_s)?))
    }
}

/// Three-layer flat config: per-flow-kind override, per-environment global, process defaults.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    flow_overrides: HashMap<String, String>,
    environment: HashMap<String, String>,
    defaults: HashMap<String, String>,
}

impl LayeredConfig {
    pub fn new(environment_name: Environment, flow_kind: &str) -> Self {
        let mut defaults = HashMap::new();
        let max_concurrent_default = match environment_name {
            Environment::Development => "5",
            Environment::Staging => "8",
            Environment::Production => "15",
        };
        defaults.insert(keys::MAX_CONCURRENT.to_string(), max_concurrent_default.to_string());
        defaults.insert(keys::BATCH_SIZE.to_string(), "10".to_string());
        defaults.insert(keys::POLL_INTERVAL_MS.to_string(), "1000".to_string());
        defaults.insert(keys::LEASE_DURATION_S.to_string(), "300".to_string());
        defaults.insert(keys::HEARTBEAT_INTERVAL_S.to_string(), "100".to_string());
        defaults.insert(keys::MAX_ATTEMPTS.to_string(), "3".to_string());
        defaults.insert(keys::BACKOFF_BASE_S.to_string(), "1".to_string());
        defaults.insert(keys::BACKOFF_MAX_S.to_string(), "3600".to_string());
        defaults.insert(keys::BACKOFF_JITTER.to_string(), "0.2".to_string());
        defaults.insert(keys::POOL_SIZE.to_string(), "10".to_string());
        defaults.insert(keys::POOL_MAX_OVERFLOW.to_string(), "5".to_string());
        defaults.insert(keys::POOL_TIMEOUT_S.to_string(), "30".to_string());
        defaults.insert(keys::DB_RETRY_ATTEMPTS.to_string(), "5".to_string());
        defaults.insert(keys::DB_RETRY_MIN_WAIT_S.to_string(), "1".to_string());
        defaults.insert(keys::DB_RETRY_MAX_WAIT_S.to_string(), "30".to_string());
        defaults.insert(keys::DB_RETRY_JITTER.to_string(), "0.2".to_string());
        defaults.insert(keys::LOCAL_QUEUE_PATH.to_string(), format!("./{flow_kind}.local_queue.json"));
        defaults.insert(keys::LOCAL_QUEUE_MAX_ENTRIES.to_string(), "1000".to_string());

        Self {
            flow_overrides: HashMap::new(),
            environment: HashMap::new(),
            defaults,
        }
    }

    /// Seed the process-env layer from `std::env`, optionally loading a
    /// `.env.local` file first via `dotenvy`, matching the corpus's dev-time
    /// bootstrap convention. Keys are read with a `RUNTIME_` prefix and
    /// lower-cased, e.g. `RUNTIME_MAX_CONCURRENT` -> `max_concurrent`.
    pub fn seed_from_process_env(mut self, load_dotenv: bool) -> Self {
        if load_dotenv {
            let _ = dotenvy::dotenv();
        }
        for (name, value) in std::env::vars() {
            if let Some(key) = name.strip_prefix("RUNTIME_") {
                self.environment.insert(key.to_ascii_lowercase(), value);
            }
        }
        self
    }

    pub fn with_flow_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.flow_overrides.insert(key.into(), value.into());
        self
    }

    pub fn with_environment_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }
}

impl ConfigProvider for LayeredConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.flow_overrides
            .get(key)
            .or_else(|| self.environment.get(key))
            .or_else(|| self.defaults.get(key))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_hit_wins_in_override_order() {
        let cfg = LayeredConfig::new(Environment::Development, "test")
            .with_default(keys::MAX_ATTEMPTS, "3")
            .with_environment_value(keys::MAX_ATTEMPTS, "5")
            .with_flow_override(keys::MAX_ATTEMPTS, "7");
        assert_eq!(cfg.get(keys::MAX_ATTEMPTS), Some("7".to_string()));
    }

    #[test]
    fn falls_through_to_default_when_no_override() {
        let cfg = LayeredConfig::new(Environment::Production, "test");
        assert_eq!(cfg.get(keys::MAX_CONCURRENT), Some("15".to_string()));
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let cfg = LayeredConfig::new(Environment::Development, "test");
        let err = cfg.require("totally_unknown_key").unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }
}
