//! Protocol backend boundary. A backend owns the connection to one SDN
//! controller and exposes a uniform async surface for flow programming,
//! statistics, packet I/O, and health probing.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time;
use tracing::debug;

use crate::config::ControllerConfig;
use crate::error::{ConductorError, Result};
use crate::types::{
    ControllerHealth, ControllerType, FlowAck, FlowSpec, FlowStats, PacketIn, PacketOut,
    PortStats, SwitchInfo, SwitchType,
};

/// Operational counters every backend keeps; shared with the health check
/// so the verdict carries live numbers without extra backend calls.
#[derive(Debug)]
pub struct BackendCounters {
    started_at: Instant,
    packets_processed: AtomicU64,
    active_flows: AtomicU64,
    events_generated: AtomicU64,
    error_count: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Default for BackendCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            packets_processed: AtomicU64::new(0),
            active_flows: AtomicU64::new(0),
            events_generated: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn record_packet(&self) {
        self.packets_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flow_installed(&self) {
        self.active_flows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flow_removed(&self) {
        // Saturating decrement; deletes of unknown flows must not underflow.
        let _ = self
            .active_flows
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn record_event(&self) {
        self.events_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, message: &str) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    pub fn packets_processed(&self) -> u64 {
        self.packets_processed.load(Ordering::Relaxed)
    }

    pub fn active_flows(&self) -> u64 {
        self.active_flows.load(Ordering::Relaxed)
    }

    pub fn events_generated(&self) -> u64 {
        self.events_generated.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }
}

/// Uniform async interface over one controller connection.
///
/// Implementations are protocol-specific (OpenFlow, P4Runtime, simulated);
/// the managers only ever hold `Arc<dyn SdnBackend>`.
#[async_trait]
pub trait SdnBackend: Send + Sync + std::fmt::Debug {
    /// Controller this backend is bound to.
    fn controller_id(&self) -> &str;

    /// Switch protocol family this backend speaks.
    fn switch_type(&self) -> SwitchType;

    /// Live operational counters.
    fn counters(&self) -> &BackendCounters;

    /// Establish the controller connection.
    async fn initialize(&self) -> Result<()>;

    /// Tear down the controller connection.
    async fn shutdown(&self) -> Result<()>;

    async fn is_connected(&self) -> bool;

    /// Lightweight liveness probe against the controller.
    async fn ping(&self) -> Result<()>;

    async fn install_flow(&self, flow: &FlowSpec) -> Result<FlowAck>;

    async fn delete_flow(&self, flow: &FlowSpec) -> Result<FlowAck>;

    async fn modify_flow(&self, flow: &FlowSpec) -> Result<FlowAck>;

    async fn flow_stats(&self, switch_id: &str) -> Result<FlowStats>;

    async fn port_stats(&self, switch_id: &str) -> Result<PortStats>;

    async fn send_packet_out(&self, packet: PacketOut) -> Result<()>;

    /// Start forwarding packet-in messages to `sender` until unsubscribed
    /// or shut down.
    async fn subscribe_packet_in(&self, sender: mpsc::UnboundedSender<PacketIn>) -> Result<()>;

    async fn unsubscribe_packet_in(&self) -> Result<()>;

    async fn switch_info(&self, switch_id: &str) -> Result<SwitchInfo>;

    async fn list_switches(&self) -> Result<Vec<SwitchInfo>>;

    /// Probe the controller and fold connection state and counters into a
    /// structured verdict. Never errors: a failed or timed-out ping is an
    /// unhealthy verdict, not an `Err`.
    async fn health_check(&self, timeout: Duration) -> ControllerHealth {
        let started = Instant::now();
        let ping_ok = match time::timeout(timeout, self.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                self.counters().record_error(&e.to_string());
                false
            }
            Err(_) => {
                self.counters()
                    .record_error(&format!("ping timed out after {:?}", timeout));
                false
            }
        };
        let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        let connected = self.is_connected().await;
        let counters = self.counters();

        let mut details = HashMap::new();
        details.insert("connected".to_string(), json!(connected));
        details.insert("ping_ok".to_string(), json!(ping_ok));
        details.insert(
            "packets_processed".to_string(),
            json!(counters.packets_processed()),
        );
        details.insert("active_flows".to_string(), json!(counters.active_flows()));
        details.insert(
            "events_generated".to_string(),
            json!(counters.events_generated()),
        );

        debug!(
            controller_id = %self.controller_id(),
            ping_ok,
            connected,
            response_time_ms,
            "Health check completed"
        );

        ControllerHealth {
            is_healthy: ping_ok && connected,
            last_check: Utc::now(),
            response_time_ms,
            error_count: counters.error_count(),
            last_error: counters.last_error(),
            uptime_seconds: counters.uptime_seconds(),
            details,
        }
    }
}

/// Constructor used by the factory to build a backend from its config.
pub type BackendConstructor =
    Arc<dyn Fn(&ControllerConfig) -> Result<Arc<dyn SdnBackend>> + Send + Sync>;

/// Registry of backend constructors keyed by controller type.
///
/// Registering a constructor for a type the engine already knows replaces
/// the previous one; creation for an unregistered type is a hard error.
#[derive(Clone, Default)]
pub struct BackendFactory {
    constructors: HashMap<ControllerType, BackendConstructor>,
}

impl BackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, controller_type: ControllerType, constructor: F)
    where
        F: Fn(&ControllerConfig) -> Result<Arc<dyn SdnBackend>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(controller_type, Arc::new(constructor));
    }

    pub fn supports(&self, controller_type: ControllerType) -> bool {
        self.constructors.contains_key(&controller_type)
    }

    pub fn create(&self, config: &ControllerConfig) -> Result<Arc<dyn SdnBackend>> {
        let constructor = self.constructors.get(&config.controller_type).ok_or_else(|| {
            ConductorError::ControllerCreationFailed(format!(
                "no backend registered for controller type {}",
                config.controller_type
            ))
        })?;
        constructor(config)
    }
}

impl std::fmt::Debug for BackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendFactory")
            .field("types", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_flow_accounting_saturates() {
        let counters = BackendCounters::new();
        counters.record_flow_removed();
        assert_eq!(counters.active_flows(), 0);

        counters.record_flow_installed();
        counters.record_flow_installed();
        counters.record_flow_removed();
        assert_eq!(counters.active_flows(), 1);
    }

    #[test]
    fn test_counters_track_last_error() {
        let counters = BackendCounters::new();
        assert!(counters.last_error().is_none());
        counters.record_error("connection refused");
        counters.record_error("timed out");
        assert_eq!(counters.error_count(), 2);
        assert_eq!(counters.last_error().as_deref(), Some("timed out"));
    }

    #[test]
    fn test_factory_rejects_unknown_type() {
        let factory = BackendFactory::new();
        let config = ControllerConfig::new("c1", ControllerType::Openflow, 6653);
        let err = factory.create(&config).unwrap_err();
        assert_eq!(err.code(), "CONTROLLER_CREATION_FAILED");
    }
}
