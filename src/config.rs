//! Configuration types for the spindle host runtime.

use prometheus::Registry;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpindleError};

/// Configuration for a [`SpindleRuntime`](crate::SpindleRuntime).
///
/// This struct can be deserialized from TOML, YAML, JSON, or environment variables
/// using figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpindleConfig {
    /// Thread name prefix (default: "spindle")
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Number of pooled worker threads.
    ///
    /// `None` spawns one dedicated thread per offloaded call. `Some(n)` runs
    /// offloaded work on a rayon pool of `n` threads.
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Stack size in bytes for worker threads, dedicated or pooled.
    #[serde(default)]
    pub worker_stack_size: Option<usize>,

    /// Prometheus registry for metrics exposition.
    /// Not serializable - must be set programmatically.
    #[serde(skip)]
    pub prometheus_registry: Option<Registry>,
}

fn default_prefix() -> String {
    "spindle".to_string()
}

impl Default for SpindleConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            worker_threads: None,
            worker_stack_size: None,
            prometheus_registry: None,
        }
    }
}

impl SpindleConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether offloaded work runs on a shared pool instead of dedicated threads.
    pub fn is_pooled(&self) -> bool {
        self.worker_threads.is_some()
    }

    /// Reject values that extract cleanly but cannot be used.
    pub fn validate(&self) -> Result<()> {
        if self.prefix.trim().is_empty() {
            return Err(SpindleError::InvalidConfig(
                "prefix must not be empty".to_string(),
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(SpindleError::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.worker_stack_size == Some(0) {
            return Err(SpindleError::InvalidConfig(
                "worker_stack_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SpindleConfig::default();
        assert_eq!(config.prefix, "spindle");
        assert!(config.worker_threads.is_none());
        assert!(config.worker_stack_size.is_none());
        assert!(!config.is_pooled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = SpindleConfig {
            worker_threads: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SpindleError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_blank_prefix() {
        let config = SpindleConfig {
            prefix: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SpindleError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_deserialize_config() {
        let toml = r#"
            prefix = "addon"
            worker_threads = 4
            worker_stack_size = 262144
        "#;

        let config: SpindleConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.prefix, "addon");
        assert_eq!(config.worker_threads, Some(4));
        assert_eq!(config.worker_stack_size, Some(262144));
        assert!(config.is_pooled());
    }

    #[test]
    fn test_deserialize_json_defaults() {
        let config: SpindleConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.prefix, "spindle");
        assert!(config.worker_threads.is_none());
    }
}
