//! Switch-facing operations: protocol detection and routing of flow,
//! statistics, and packet operations to the backend that speaks the
//! switch's protocol.

use dashmap::DashMap;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::SdnBackend;
use crate::error::{ConductorError, Result};
use crate::types::{
    FlowAck, FlowSpec, FlowStats, PacketOut, PortStats, SwitchInfo, SwitchType,
};

/// Routes switch operations to protocol backends.
///
/// One backend per protocol family; switch type resolution follows a fixed
/// precedence: explicit registration, DPID-shaped identifier, protocol
/// hints on the request, then the OpenFlow default.
pub struct SwitchManager {
    backends: DashMap<SwitchType, Arc<dyn SdnBackend>>,
    static_types: DashMap<String, SwitchType>,
}

impl Default for SwitchManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SwitchManager {
    pub fn new() -> Self {
        Self {
            backends: DashMap::new(),
            static_types: DashMap::new(),
        }
    }

    /// Register the backend serving one protocol family. Replaces any
    /// previous backend for that family.
    pub fn register_backend(&self, backend: Arc<dyn SdnBackend>) {
        let switch_type = backend.switch_type();
        info!(
            controller_id = %backend.controller_id(),
            switch_type = %switch_type,
            "Registered protocol backend"
        );
        self.backends.insert(switch_type, backend);
    }

    pub fn unregister_backend(&self, switch_type: SwitchType) -> bool {
        self.backends.remove(&switch_type).is_some()
    }

    /// Pin a switch id to a protocol type; wins over every heuristic.
    pub fn register_switch_type(&self, switch_id: &str, switch_type: SwitchType) {
        debug!(switch_id = %switch_id, switch_type = %switch_type, "Pinned switch type");
        self.static_types
            .insert(switch_id.to_string(), switch_type);
    }

    /// Resolve the protocol type for a switch id without request hints.
    /// The DPID heuristic and the default both land on OpenFlow here, so
    /// only an explicit registration can produce anything else.
    pub fn detect_switch_type(&self, switch_id: &str) -> SwitchType {
        if let Some(pinned) = self.static_types.get(switch_id) {
            return *pinned;
        }
        SwitchType::Openflow
    }

    /// Resolve the protocol type for a flow request. An explicit type on
    /// the request is ignored in favor of the registry, the DPID shape of
    /// the id, and finally P4Runtime-specific hint fields.
    pub fn detect_switch_type_for_flow(&self, flow: &FlowSpec) -> SwitchType {
        if let Some(pinned) = self.static_types.get(&flow.switch_id) {
            return *pinned;
        }
        if Self::looks_like_dpid(&flow.switch_id) {
            return SwitchType::Openflow;
        }
        if flow.table_name.is_some() || flow.action_name.is_some() {
            return SwitchType::P4Runtime;
        }
        SwitchType::Openflow
    }

    /// OpenFlow datapath ids are up to 64 bits, written in decimal or hex.
    fn looks_like_dpid(switch_id: &str) -> bool {
        let digits = switch_id.strip_prefix("0x").unwrap_or(switch_id);
        !digits.is_empty()
            && digits.len() <= 16
            && digits.chars().all(|c| c.is_ascii_hexdigit())
    }

    fn backend_for(&self, switch_type: SwitchType, switch_id: &str) -> Result<Arc<dyn SdnBackend>> {
        self.backends
            .get(&switch_type)
            .map(|b| Arc::clone(&b))
            .ok_or_else(|| ConductorError::BackendNotAvailable(switch_id.to_string()))
    }

    pub async fn install_flow(&self, mut flow: FlowSpec) -> Result<FlowAck> {
        let switch_type = self.detect_switch_type_for_flow(&flow);
        flow.switch_type = switch_type;
        let backend = self.backend_for(switch_type, &flow.switch_id)?;
        let ack = backend.install_flow(&flow).await?;
        counter!("conductor_flows_installed_total", 1);
        Ok(ack)
    }

    pub async fn delete_flow(&self, mut flow: FlowSpec) -> Result<FlowAck> {
        let switch_type = self.detect_switch_type_for_flow(&flow);
        flow.switch_type = switch_type;
        let backend = self.backend_for(switch_type, &flow.switch_id)?;
        backend.delete_flow(&flow).await
    }

    pub async fn modify_flow(&self, mut flow: FlowSpec) -> Result<FlowAck> {
        let switch_type = self.detect_switch_type_for_flow(&flow);
        flow.switch_type = switch_type;
        let backend = self.backend_for(switch_type, &flow.switch_id)?;
        backend.modify_flow(&flow).await
    }

    pub async fn flow_stats(&self, switch_id: &str) -> Result<FlowStats> {
        let switch_type = self.detect_switch_type(switch_id);
        let backend = self.backend_for(switch_type, switch_id)?;
        let mut stats = backend.flow_stats(switch_id).await?;
        stats.switch_type = switch_type;
        Ok(stats)
    }

    pub async fn port_stats(&self, switch_id: &str) -> Result<PortStats> {
        let switch_type = self.detect_switch_type(switch_id);
        let backend = self.backend_for(switch_type, switch_id)?;
        let mut stats = backend.port_stats(switch_id).await?;
        stats.switch_type = switch_type;
        Ok(stats)
    }

    pub async fn send_packet_out(&self, mut packet: PacketOut) -> Result<()> {
        let switch_type = self.detect_switch_type(&packet.switch_id);
        packet.switch_type = switch_type;
        let backend = self.backend_for(switch_type, &packet.switch_id)?;
        backend.send_packet_out(packet).await
    }

    pub async fn switch_info(&self, switch_id: &str) -> Result<SwitchInfo> {
        let switch_type = self.detect_switch_type(switch_id);
        let backend = self.backend_for(switch_type, switch_id)?;
        backend.switch_info(switch_id).await
    }

    /// Bring up every registered backend. A partial outage is tolerated:
    /// any single backend coming up counts as initialized, and an error is
    /// returned only when every backend refuses.
    pub async fn initialize(&self) -> Result<()> {
        let backends: Vec<(SwitchType, Arc<dyn SdnBackend>)> = self
            .backends
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        if backends.is_empty() {
            return Ok(());
        }

        let mut initialized = 0usize;
        for (switch_type, backend) in &backends {
            match backend.initialize().await {
                Ok(()) => {
                    initialized += 1;
                    info!(switch_type = %switch_type, "Protocol backend initialized");
                }
                Err(e) => {
                    warn!(
                        switch_type = %switch_type,
                        error = %e,
                        "Protocol backend failed to initialize"
                    );
                }
            }
        }
        if initialized == 0 {
            return Err(ConductorError::Backend(
                "no protocol backend could be initialized".to_string(),
            ));
        }
        info!(
            initialized,
            total = backends.len(),
            "Switch manager initialized"
        );
        Ok(())
    }

    /// Shut down every registered backend, best effort.
    pub async fn shutdown(&self) {
        let backends: Vec<(SwitchType, Arc<dyn SdnBackend>)> = self
            .backends
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        for (switch_type, backend) in backends {
            if let Err(e) = backend.shutdown().await {
                warn!(
                    switch_type = %switch_type,
                    error = %e,
                    "Protocol backend shutdown failed"
                );
            }
        }
        info!("Switch manager shut down");
    }

    /// Switches known to every registered backend. A backend that fails to
    /// enumerate is logged and skipped so one bad protocol family cannot
    /// hide the others.
    pub async fn list_all_switches(&self) -> Vec<SwitchInfo> {
        let backends: Vec<(SwitchType, Arc<dyn SdnBackend>)> = self
            .backends
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let mut switches = Vec::new();
        for (switch_type, backend) in backends {
            match backend.list_switches().await {
                Ok(mut found) => switches.append(&mut found),
                Err(e) => {
                    warn!(
                        switch_type = %switch_type,
                        error = %e,
                        "Backend failed to enumerate switches, skipping"
                    );
                }
            }
        }
        switches
    }
}
