//! Engine configuration: typed, validated structs with file and environment
//! loading. Every duration is expressed in seconds in the serialized form
//! and exposed as `std::time::Duration` through accessor methods.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{ConductorError, Result};
use crate::types::{ControllerType, SwitchType};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Event stream settings
    #[serde(default)]
    pub events: EventStreamConfig,
    /// Health monitoring and failover settings
    #[serde(default)]
    pub health: HealthMonitorConfig,
    /// Prometheus exporter settings (daemon only)
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Controllers registered at startup
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
    /// Switch mappings created at startup
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
    /// Static switch-id to protocol-type assignments
    #[serde(default)]
    pub switch_types: Vec<StaticSwitchType>,
}

/// Event stream tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStreamConfig {
    /// Bounded queue capacity; overflow drops the oldest event
    pub max_queue_size: usize,
    /// History ring buffer capacity
    pub max_history_size: usize,
    /// Consumer dequeue wait; bounds how long a stop request can go unseen
    pub dequeue_timeout_seconds: u64,
    /// Inactive-subscriber sweep interval
    pub cleanup_interval_seconds: u64,
    /// Flip a subscriber inactive when its callback fails or panics
    pub auto_deactivate_failed_subscribers: bool,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            max_history_size: 1_000,
            dequeue_timeout_seconds: 1,
            cleanup_interval_seconds: 300,
            auto_deactivate_failed_subscribers: true,
        }
    }
}

impl EventStreamConfig {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_secs(self.dequeue_timeout_seconds.max(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds.max(1))
    }
}

/// Health supervision settings shared by all controllers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMonitorConfig {
    /// Interval between health check rounds
    pub health_check_interval_seconds: u64,
    /// Per-check timeout, independent of the interval
    pub health_check_timeout_seconds: u64,
    /// Consecutive failures before a controller is treated as failed
    pub max_health_failures: u32,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_seconds: 30,
            health_check_timeout_seconds: 5,
            max_health_failures: 3,
        }
    }
}

impl HealthMonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds.max(1))
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_seconds.max(1))
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9091".to_string(),
        }
    }
}

/// Per-controller configuration supplied at registration.
///
/// Immutable once registered; changing any field requires deregistering and
/// re-registering the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Unique controller identifier
    pub controller_id: String,
    /// Backend family used for this controller
    pub controller_type: ControllerType,
    /// Human-readable name; defaults to the controller id
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,

    // Connection configuration
    #[serde(default = "ControllerConfig::default_host")]
    pub host: String,
    pub port: u16,

    // Health monitoring configuration
    #[serde(default = "ControllerConfig::default_health_interval")]
    pub health_check_interval_seconds: u64,
    /// Per-controller check timeout; falls back to the engine-wide
    /// `health.health_check_timeout_seconds` when unset
    #[serde(default)]
    pub health_check_timeout_seconds: Option<u64>,
    #[serde(default = "ControllerConfig::default_max_retries")]
    pub max_retries: u32,

    // Failover configuration
    #[serde(default)]
    pub backup_controllers: Vec<String>,
    #[serde(default = "ControllerConfig::default_priority")]
    pub priority: u32,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ControllerConfig {
    pub fn new(controller_id: &str, controller_type: ControllerType, port: u16) -> Self {
        Self {
            controller_id: controller_id.to_string(),
            controller_type,
            name: controller_id.to_string(),
            description: None,
            host: Self::default_host(),
            port,
            health_check_interval_seconds: Self::default_health_interval(),
            health_check_timeout_seconds: None,
            max_retries: Self::default_max_retries(),
            backup_controllers: Vec::new(),
            priority: Self::default_priority(),
            metadata: HashMap::new(),
        }
    }

    fn default_host() -> String {
        "localhost".to_string()
    }

    fn default_health_interval() -> u64 {
        30
    }

    fn default_max_retries() -> u32 {
        3
    }

    fn default_priority() -> u32 {
        100
    }

    /// Display name, falling back to the controller id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.controller_id
        } else {
            &self.name
        }
    }

    /// Validate field constraints before any registry state is touched.
    pub fn validate(&self) -> Result<()> {
        if self.controller_id.trim().is_empty() {
            return Err(ConductorError::Validation(
                "controller_id cannot be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConductorError::Validation(
                "port must be between 1 and 65535".to_string(),
            ));
        }
        if self.health_check_interval_seconds == 0 {
            return Err(ConductorError::Validation(
                "health_check_interval_seconds must be positive".to_string(),
            ));
        }
        if self.health_check_timeout_seconds == Some(0) {
            return Err(ConductorError::Validation(
                "health_check_timeout_seconds must be positive".to_string(),
            ));
        }
        if self
            .backup_controllers
            .iter()
            .any(|b| b == &self.controller_id)
        {
            return Err(ConductorError::Validation(format!(
                "controller {} cannot list itself as a backup",
                self.controller_id
            )));
        }
        Ok(())
    }
}

/// Startup switch mapping entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    pub switch_id: String,
    pub primary_controller: String,
    #[serde(default)]
    pub backup_controllers: Vec<String>,
}

/// Static switch-type registry entry; explicit configuration always wins
/// over heuristic detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticSwitchType {
    pub switch_id: String,
    pub switch_type: SwitchType,
}

impl EngineConfig {
    /// Load configuration from a TOML file with `CONDUCTOR_*` environment
    /// overrides layered on top.
    pub fn from_file(path: &str) -> std::result::Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("CONDUCTOR").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// Serialize the active configuration, for logging or seeding a config file.
    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate engine-level and per-controller constraints.
    pub fn validate(&self) -> Result<()> {
        if self.events.max_queue_size == 0 {
            return Err(ConductorError::Validation(
                "events.max_queue_size must be positive".to_string(),
            ));
        }
        if self.events.max_history_size == 0 {
            return Err(ConductorError::Validation(
                "events.max_history_size must be positive".to_string(),
            ));
        }
        if self.health.max_health_failures == 0 {
            return Err(ConductorError::Validation(
                "health.max_health_failures must be positive".to_string(),
            ));
        }
        for controller in &self.controllers {
            controller.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.events.max_queue_size, 10_000);
        assert_eq!(config.events.max_history_size, 1_000);
        assert_eq!(config.health.health_check_interval_seconds, 30);
        assert_eq!(config.health.max_health_failures, 3);
    }

    #[test]
    fn test_controller_config_validation() {
        let mut config = ControllerConfig::new("of-primary", ControllerType::Openflow, 6653);
        assert!(config.validate().is_ok());

        config.port = 0;
        assert!(matches!(
            config.validate(),
            Err(ConductorError::Validation(_))
        ));

        config.port = 6653;
        config.controller_id = "   ".to_string();
        assert!(config.validate().is_err());

        config.controller_id = "of-primary".to_string();
        config.backup_controllers = vec!["of-primary".to_string()];
        assert!(config.validate().is_err());

        config.backup_controllers.clear();
        config.health_check_timeout_seconds = Some(0);
        assert!(config.validate().is_err());

        // Unset timeout defers to the engine-wide value.
        config.health_check_timeout_seconds = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = EngineConfig::default();
        let rendered = config.to_toml_string().unwrap();
        let parsed: EngineConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(
            parsed.events.max_queue_size,
            config.events.max_queue_size
        );
        assert_eq!(
            parsed.health.max_health_failures,
            config.health.max_health_failures
        );
    }

    #[test]
    fn test_config_loading_from_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[events]
max_queue_size = 64
max_history_size = 16
dequeue_timeout_seconds = 1
cleanup_interval_seconds = 60
auto_deactivate_failed_subscribers = true

[health]
health_check_interval_seconds = 5
health_check_timeout_seconds = 2
max_health_failures = 2

[[controllers]]
controller_id = "of-primary"
controller_type = "openflow"
port = 6653

[[switch_types]]
switch_id = "bmv2-s1"
switch_type = "p4runtime"
"#
        )
        .unwrap();

        let config = EngineConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.events.max_queue_size, 64);
        assert_eq!(config.health.max_health_failures, 2);
        assert_eq!(config.controllers.len(), 1);
        assert_eq!(config.controllers[0].controller_id, "of-primary");
        assert_eq!(config.switch_types[0].switch_type, SwitchType::P4Runtime);
        assert!(config.validate().is_ok());
    }
}
