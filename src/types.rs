//! Shared data model for the orchestration engine: controller identity and
//! runtime state, switch mappings, and the unified flow/packet records that
//! cross the backend boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::config::ControllerConfig;

/// Supported switch protocol families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchType {
    Openflow,
    P4Runtime,
    Unknown,
}

impl SwitchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchType::Openflow => "openflow",
            SwitchType::P4Runtime => "p4runtime",
            SwitchType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SwitchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controller backend families selectable at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerType {
    Openflow,
    P4Runtime,
    Custom,
}

impl ControllerType {
    /// Switch protocol family served by this controller type.
    pub fn switch_type(&self) -> SwitchType {
        match self {
            ControllerType::Openflow => SwitchType::Openflow,
            ControllerType::P4Runtime => SwitchType::P4Runtime,
            ControllerType::Custom => SwitchType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerType::Openflow => "openflow",
            ControllerType::P4Runtime => "p4runtime",
            ControllerType::Custom => "custom",
        }
    }
}

impl std::fmt::Display for ControllerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controller lifecycle status.
///
/// `Initializing -> Connected -> {Disconnected, Error}`; `Maintenance` is an
/// administrative transition and is never entered by the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerStatus {
    Initializing,
    Connected,
    Disconnected,
    Error,
    Maintenance,
}

/// Health check verdict for a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

/// Controller performance and operational metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerMetrics {
    pub uptime_seconds: f64,
    pub total_switches: usize,
    pub active_flows: u64,
    pub packets_processed: u64,
    pub events_generated: u64,
    pub response_time_ms: f64,
    pub error_count: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Complete controller record: immutable config plus mutable runtime state.
///
/// Owned exclusively by the `ControllerManager`; everything handed outward
/// is a clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerInfo {
    pub config: ControllerConfig,
    pub status: ControllerStatus,
    pub health_status: HealthStatus,
    pub created_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub metrics: ControllerMetrics,
    /// Switch ids currently assigned to this controller as primary
    pub assigned_switches: Vec<String>,
    pub last_error: Option<String>,
    /// Consecutive failed health checks; reset on the first success
    pub error_count: u32,
}

impl ControllerInfo {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            status: ControllerStatus::Initializing,
            health_status: HealthStatus::Unknown,
            created_at: Utc::now(),
            last_seen: None,
            last_health_check: None,
            metrics: ControllerMetrics::default(),
            assigned_switches: Vec::new(),
            last_error: None,
            error_count: 0,
        }
    }
}

/// Switch to controller assignment with ordered backups.
///
/// Invariant: `current_controller` is always the primary or one of the
/// backups, and `failover_count` only ever increases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchMapping {
    pub switch_id: String,
    pub primary_controller: String,
    pub backup_controllers: Vec<String>,
    pub current_controller: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub failover_count: u64,
}

impl SwitchMapping {
    pub fn new(switch_id: &str, primary: &str, backups: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            switch_id: switch_id.to_string(),
            primary_controller: primary.to_string(),
            backup_controllers: backups,
            current_controller: primary.to_string(),
            created_at: now,
            last_updated: now,
            failover_count: 0,
        }
    }

    /// True when `candidate` may legally become the current controller.
    pub fn allows_current(&self, candidate: &str) -> bool {
        candidate == self.primary_controller
            || self.backup_controllers.iter().any(|b| b == candidate)
    }
}

/// Structured result of a single backend health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerHealth {
    pub is_healthy: bool,
    pub last_check: DateTime<Utc>,
    pub response_time_ms: f64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub uptime_seconds: f64,
    pub details: HashMap<String, Value>,
}

/// Unified flow rule specification routed to a protocol backend.
///
/// The OpenFlow- and P4Runtime-specific fields are optional extensions; the
/// switch manager also uses their presence as a detection hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSpec {
    pub switch_id: String,
    #[serde(default = "FlowSpec::default_switch_type")]
    pub switch_type: SwitchType,
    #[serde(default = "FlowSpec::default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub table_id: Option<u32>,
    #[serde(default)]
    pub match_fields: HashMap<String, Value>,
    #[serde(default)]
    pub actions: Vec<Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    // OpenFlow specific fields
    #[serde(default)]
    pub cookie: Option<u64>,
    #[serde(default)]
    pub idle_timeout: u32,
    #[serde(default)]
    pub hard_timeout: u32,

    // P4Runtime specific fields
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub action_name: Option<String>,
    #[serde(default)]
    pub action_params: HashMap<String, Value>,
}

impl FlowSpec {
    pub fn new(switch_id: &str) -> Self {
        Self {
            switch_id: switch_id.to_string(),
            switch_type: SwitchType::Unknown,
            priority: Self::default_priority(),
            table_id: None,
            match_fields: HashMap::new(),
            actions: Vec::new(),
            metadata: HashMap::new(),
            cookie: None,
            idle_timeout: 0,
            hard_timeout: 0,
            table_name: None,
            action_name: None,
            action_params: HashMap::new(),
        }
    }

    fn default_switch_type() -> SwitchType {
        SwitchType::Unknown
    }

    fn default_priority() -> u32 {
        1000
    }
}

/// Packet received from a switch, normalized across protocols.
#[derive(Debug, Clone)]
pub struct PacketIn {
    pub switch_id: String,
    pub switch_type: SwitchType,
    pub payload: Vec<u8>,
    pub metadata: HashMap<String, Value>,
    // OpenFlow specific fields
    pub in_port: Option<u32>,
    pub buffer_id: Option<u32>,
    // P4Runtime specific fields
    pub ingress_port: Option<String>,
}

/// Packet to be emitted through a switch.
#[derive(Debug, Clone)]
pub struct PacketOut {
    pub switch_id: String,
    pub switch_type: SwitchType,
    pub payload: Vec<u8>,
    pub metadata: HashMap<String, Value>,
    pub out_port: Option<u32>,
    pub egress_port: Option<String>,
}

/// Switch identity and capabilities as reported by a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchInfo {
    pub switch_id: String,
    pub switch_type: SwitchType,
    pub address: String,
    pub port: u16,
    pub connected: bool,
    #[serde(default)]
    pub capabilities: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Acknowledgement for a flow mutation routed through a backend.
#[derive(Debug, Clone, Serialize)]
pub struct FlowAck {
    pub switch_id: String,
    pub switch_type: SwitchType,
    pub action: &'static str,
    pub details: Value,
}

/// Flow statistics snapshot for one switch.
#[derive(Debug, Clone, Serialize)]
pub struct FlowStats {
    pub switch_id: String,
    pub switch_type: SwitchType,
    pub entries: Vec<Value>,
}

/// Port statistics snapshot for one switch.
#[derive(Debug, Clone, Serialize)]
pub struct PortStats {
    pub switch_id: String,
    pub switch_type: SwitchType,
    pub ports: Vec<Value>,
}

/// Outcome of a completed failover operation.
#[derive(Debug, Clone, Serialize)]
pub struct FailoverOutcome {
    pub switch_id: String,
    pub old_controller: String,
    pub new_controller: String,
    pub failover_count: u64,
}
