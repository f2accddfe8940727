//! In-memory simulated backend. Stands in for a real OpenFlow or P4Runtime
//! connection in the daemon's default wiring and in tests; failure modes are
//! injectable so failover paths can be exercised deterministically.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{BackendCounters, SdnBackend};
use crate::config::ControllerConfig;
use crate::error::{ConductorError, Result};
use crate::types::{
    FlowAck, FlowSpec, FlowStats, PacketIn, PacketOut, PortStats, SwitchInfo, SwitchType,
};

/// Simulated controller backend with injectable failures.
#[derive(Debug)]
pub struct SimBackend {
    controller_id: String,
    switch_type: SwitchType,
    address: String,
    port: u16,
    connected: AtomicBool,
    fail_ping: Arc<AtomicBool>,
    fail_connect: Arc<AtomicBool>,
    switches: DashMap<String, SwitchInfo>,
    flows: DashMap<String, Vec<FlowSpec>>,
    counters: BackendCounters,
    packet_sink: Mutex<Option<mpsc::UnboundedSender<PacketIn>>>,
}

impl SimBackend {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            controller_id: config.controller_id.clone(),
            switch_type: config.controller_type.switch_type(),
            address: config.host.clone(),
            port: config.port,
            connected: AtomicBool::new(false),
            fail_ping: Arc::new(AtomicBool::new(false)),
            fail_connect: Arc::new(AtomicBool::new(false)),
            switches: DashMap::new(),
            flows: DashMap::new(),
            counters: BackendCounters::new(),
            packet_sink: Mutex::new(None),
        }
    }

    /// Shared flag that makes every subsequent ping fail while set.
    pub fn fail_ping_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_ping)
    }

    /// Shared flag that makes `initialize` refuse the connection while set.
    pub fn fail_connect_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_connect)
    }

    /// Attach a switch to this simulated controller.
    pub fn add_switch(&self, switch_id: &str) {
        let mut metadata = HashMap::new();
        metadata.insert("session".to_string(), json!(Uuid::new_v4().to_string()));
        metadata.insert("simulated".to_string(), json!(true));
        self.switches.insert(
            switch_id.to_string(),
            SwitchInfo {
                switch_id: switch_id.to_string(),
                switch_type: self.switch_type,
                address: self.address.clone(),
                port: self.port,
                connected: true,
                capabilities: HashMap::new(),
                metadata,
            },
        );
    }

    /// Deliver a packet-in to the current subscriber, if any.
    pub fn inject_packet_in(&self, switch_id: &str, payload: Vec<u8>) -> bool {
        let packet = PacketIn {
            switch_id: switch_id.to_string(),
            switch_type: self.switch_type,
            payload,
            metadata: HashMap::new(),
            in_port: Some(1),
            buffer_id: None,
            ingress_port: None,
        };
        self.counters.record_packet();
        match &*self.packet_sink.lock().unwrap() {
            Some(sink) => sink.send(packet).is_ok(),
            None => false,
        }
    }

    fn require_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(ConductorError::Backend(format!(
                "controller {} is not connected",
                self.controller_id
            )))
        }
    }
}

#[async_trait]
impl SdnBackend for SimBackend {
    fn controller_id(&self) -> &str {
        &self.controller_id
    }

    fn switch_type(&self) -> SwitchType {
        self.switch_type
    }

    fn counters(&self) -> &BackendCounters {
        &self.counters
    }

    async fn initialize(&self) -> Result<()> {
        if self.fail_connect.load(Ordering::Relaxed) {
            return Err(ConductorError::Backend(format!(
                "connection to controller {} refused",
                self.controller_id
            )));
        }
        self.connected.store(true, Ordering::Relaxed);
        info!(
            controller_id = %self.controller_id,
            address = %self.address,
            port = self.port,
            "Simulated backend connected"
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        self.packet_sink.lock().unwrap().take();
        info!(controller_id = %self.controller_id, "Simulated backend shut down");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn ping(&self) -> Result<()> {
        if self.fail_ping.load(Ordering::Relaxed) {
            return Err(ConductorError::Backend(format!(
                "controller {} is unreachable",
                self.controller_id
            )));
        }
        self.require_connected()
    }

    async fn install_flow(&self, flow: &FlowSpec) -> Result<FlowAck> {
        self.require_connected()?;
        self.flows
            .entry(flow.switch_id.clone())
            .or_default()
            .push(flow.clone());
        self.counters.record_flow_installed();
        debug!(
            controller_id = %self.controller_id,
            switch_id = %flow.switch_id,
            priority = flow.priority,
            "Installed flow"
        );
        Ok(FlowAck {
            switch_id: flow.switch_id.clone(),
            switch_type: self.switch_type,
            action: "install",
            details: json!({ "priority": flow.priority }),
        })
    }

    async fn delete_flow(&self, flow: &FlowSpec) -> Result<FlowAck> {
        self.require_connected()?;
        let mut removed = 0usize;
        if let Some(mut entry) = self.flows.get_mut(&flow.switch_id) {
            let before = entry.len();
            entry.retain(|f| {
                f.priority != flow.priority || f.match_fields != flow.match_fields
            });
            removed = before - entry.len();
        }
        for _ in 0..removed {
            self.counters.record_flow_removed();
        }
        Ok(FlowAck {
            switch_id: flow.switch_id.clone(),
            switch_type: self.switch_type,
            action: "delete",
            details: json!({ "removed": removed }),
        })
    }

    async fn modify_flow(&self, flow: &FlowSpec) -> Result<FlowAck> {
        self.require_connected()?;
        let mut replaced = false;
        if let Some(mut entry) = self.flows.get_mut(&flow.switch_id) {
            for existing in entry.iter_mut() {
                if existing.priority == flow.priority
                    && existing.match_fields == flow.match_fields
                {
                    *existing = flow.clone();
                    replaced = true;
                }
            }
        }
        if !replaced {
            return Err(ConductorError::Backend(format!(
                "no matching flow on switch {} to modify",
                flow.switch_id
            )));
        }
        Ok(FlowAck {
            switch_id: flow.switch_id.clone(),
            switch_type: self.switch_type,
            action: "modify",
            details: json!({ "priority": flow.priority }),
        })
    }

    async fn flow_stats(&self, switch_id: &str) -> Result<FlowStats> {
        self.require_connected()?;
        let entries = self
            .flows
            .get(switch_id)
            .map(|flows| {
                flows
                    .iter()
                    .map(|f| {
                        json!({
                            "priority": f.priority,
                            "match_fields": f.match_fields,
                            "actions": f.actions,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(FlowStats {
            switch_id: switch_id.to_string(),
            switch_type: self.switch_type,
            entries,
        })
    }

    async fn port_stats(&self, switch_id: &str) -> Result<PortStats> {
        self.require_connected()?;
        let ports = (1..=4)
            .map(|port| {
                json!({
                    "port_no": port,
                    "rx_packets": 0,
                    "tx_packets": 0,
                    "rx_errors": 0,
                    "tx_errors": 0,
                })
            })
            .collect();
        Ok(PortStats {
            switch_id: switch_id.to_string(),
            switch_type: self.switch_type,
            ports,
        })
    }

    async fn send_packet_out(&self, packet: PacketOut) -> Result<()> {
        self.require_connected()?;
        self.counters.record_packet();
        debug!(
            controller_id = %self.controller_id,
            switch_id = %packet.switch_id,
            bytes = packet.payload.len(),
            "Sent packet out"
        );
        Ok(())
    }

    async fn subscribe_packet_in(
        &self,
        sender: mpsc::UnboundedSender<PacketIn>,
    ) -> Result<()> {
        *self.packet_sink.lock().unwrap() = Some(sender);
        Ok(())
    }

    async fn unsubscribe_packet_in(&self) -> Result<()> {
        self.packet_sink.lock().unwrap().take();
        Ok(())
    }

    async fn switch_info(&self, switch_id: &str) -> Result<SwitchInfo> {
        self.require_connected()?;
        self.switches
            .get(switch_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| {
                ConductorError::Backend(format!(
                    "switch {} is not attached to controller {}",
                    switch_id, self.controller_id
                ))
            })
    }

    async fn list_switches(&self) -> Result<Vec<SwitchInfo>> {
        self.require_connected()?;
        Ok(self.switches.iter().map(|entry| entry.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ControllerType;
    use std::time::Duration;

    fn backend() -> SimBackend {
        SimBackend::new(&ControllerConfig::new("sim-1", ControllerType::Openflow, 6653))
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let sim = backend();
        let flow = FlowSpec::new("0x1");
        assert!(sim.install_flow(&flow).await.is_err());

        sim.initialize().await.unwrap();
        assert!(sim.install_flow(&flow).await.is_ok());
        assert_eq!(sim.counters().active_flows(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_matching_flows() {
        let sim = backend();
        sim.initialize().await.unwrap();
        let flow = FlowSpec::new("0x1");
        sim.install_flow(&flow).await.unwrap();
        let ack = sim.delete_flow(&flow).await.unwrap();
        assert_eq!(ack.details["removed"], 1);
        assert_eq!(sim.counters().active_flows(), 0);
    }

    #[tokio::test]
    async fn test_health_check_reflects_injected_failure() {
        let sim = backend();
        sim.initialize().await.unwrap();
        let health = sim.health_check(Duration::from_secs(1)).await;
        assert!(health.is_healthy);

        sim.fail_ping_handle().store(true, Ordering::Relaxed);
        let health = sim.health_check(Duration::from_secs(1)).await;
        assert!(!health.is_healthy);
        assert!(health.last_error.is_some());
        assert_eq!(health.details["connected"], json!(true));
        assert_eq!(health.details["ping_ok"], json!(false));
    }

    #[tokio::test]
    async fn test_packet_in_delivery() {
        let sim = backend();
        sim.initialize().await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        sim.subscribe_packet_in(tx).await.unwrap();

        assert!(sim.inject_packet_in("0x1", vec![0xde, 0xad]));
        let packet = rx.recv().await.unwrap();
        assert_eq!(packet.switch_id, "0x1");
        assert_eq!(packet.payload, vec![0xde, 0xad]);

        sim.unsubscribe_packet_in().await.unwrap();
        assert!(!sim.inject_packet_in("0x1", vec![0x00]));
    }
}
