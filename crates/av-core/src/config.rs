//! Runtime configuration of the generation core.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::FailurePolicy;
use crate::retry::RetryPolicy;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Interval between avatar status requests.
    pub poll_interval_ms: u64,
    pub retry_attempts: u32,
    /// Fixed delay between retried attempts; 0 disables it.
    pub retry_backoff_ms: u64,
    pub use_cache: bool,
    pub parameters_failure_policy: FailurePolicy,
    pub detail_level: u32,
    pub with_blendshapes: bool,
    pub download_haircut: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            retry_attempts: crate::retry::DEFAULT_MAX_ATTEMPTS,
            retry_backoff_ms: 0,
            use_cache: true,
            parameters_failure_policy: FailurePolicy::Evict,
            detail_level: 0,
            with_blendshapes: true,
            download_haircut: true,
        }
    }
}

impl CoreConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::default().with_max_attempts(self.retry_attempts);
        match self.retry_backoff_ms {
            0 => policy,
            ms => policy.with_backoff(Duration::from_millis(ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.json");
        std::fs::write(&path, r#"{"poll_interval_ms": 50, "parameters_failure_policy": "keep"}"#).unwrap();

        let config = CoreConfig::from_json_file(&path).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.parameters_failure_policy, FailurePolicy::Keep);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert!(config.use_cache);
    }

    #[test]
    fn test_backoff() {
        let config = CoreConfig {
            retry_backoff_ms: 250,
            retry_attempts: 5,
            ..CoreConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.json");
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(CoreConfig::from_json_file(&path), Err(crate::Error::Serde { .. })));
    }
}
