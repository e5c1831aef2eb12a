//! Orchestrator configuration file.
//!
//! Every section is optional; missing keys take their defaults:
//!
//! ```yaml
//! driver:
//!   supports_device_sharing: true
//!   supports_hotplug: true
//!   max_interfaces: 10
//!   flavor: m1.medium
//!   compute_policy: nova
//! device_orch:
//!   executor_workers: 16
//!   inbox_capacity: 1024
//!   health_check_max_attempts: 30
//! daemon:
//!   heartbeat_interval_ms: 1000
//! vendors: [haproxy, vyos, asav]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::daemon::OrchDaemonConfig;
use crate::device::{DeviceOrchConfig, DriverCapabilities};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration from {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration at {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub driver: DriverCapabilities,
    pub device_orch: DeviceOrchConfig,
    pub daemon: OrchDaemonConfig,
    /// Vendors that get a service driver registered
    pub vendors: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            driver: DriverCapabilities::default(),
            device_orch: DeviceOrchConfig::default(),
            daemon: OrchDaemonConfig::default(),
            vendors: vec!["haproxy".to_string(), "vyos".to_string(), "asav".to_string()],
        }
    }
}

impl OrchestratorConfig {
    /// Reads and validates a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // One management interface plus at least one data interface.
        if self.driver.max_interfaces < 2 {
            return Err(ConfigError::Invalid(format!(
                "driver.max_interfaces must be at least 2, got {}",
                self.driver.max_interfaces
            )));
        }
        if self.driver.flavor.is_empty() {
            return Err(ConfigError::Invalid("driver.flavor must not be empty".to_string()));
        }
        if self.device_orch.executor_workers == 0 {
            return Err(ConfigError::Invalid("device_orch.executor_workers must be non-zero".to_string()));
        }
        if self.device_orch.inbox_capacity == 0 {
            return Err(ConfigError::Invalid("device_orch.inbox_capacity must be non-zero".to_string()));
        }
        if self.device_orch.health_check_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "device_orch.health_check_max_attempts must be non-zero".to_string(),
            ));
        }
        if self.daemon.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid("daemon.heartbeat_interval_ms must be non-zero".to_string()));
        }
        if let Some(vendor) = self.vendors.iter().find(|v| v.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("vendor name {:?} is empty", vendor)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        OrchestratorConfig::default().validate().unwrap();
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let file = write_config("{}\n");
        let config = OrchestratorConfig::load(file.path()).unwrap();
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let file = write_config(
            r#"
driver:
  supports_hotplug: false
  max_interfaces: 4
daemon:
  heartbeat_interval_ms: 200
vendors: [vyos]
"#,
        );
        let config = OrchestratorConfig::load(file.path()).unwrap();

        assert!(!config.driver.supports_hotplug);
        assert!(config.driver.supports_device_sharing);
        assert_eq!(config.driver.max_interfaces, 4);
        assert_eq!(config.driver.flavor, "m1.medium");
        assert_eq!(config.daemon.heartbeat_interval_ms, 200);
        assert_eq!(config.device_orch, DeviceOrchConfig::default());
        assert_eq!(config.vendors, vec!["vyos".to_string()]);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = OrchestratorConfig::load(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_malformed_yaml() {
        let file = write_config("driver: [not, a, map]\n");
        let err = OrchestratorConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let file = write_config("driver:\n  max_interfaces: 1\n");
        let err = OrchestratorConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("max_interfaces"));

        let mut config = OrchestratorConfig::default();
        config.daemon.heartbeat_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.device_orch.executor_workers = 0;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.vendors.push(" ".to_string());
        assert!(config.validate().is_err());
    }
}
