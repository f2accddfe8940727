//! SDN Conductor
//!
//! Orchestration engine for heterogeneous SDN controllers: a controller
//! registry with health-driven failover, switch-to-controller mappings, a
//! protocol-detecting switch manager, and a centralized event stream.

pub mod backend;
pub mod config;
pub mod controllers;
pub mod error;
pub mod events;
pub mod sim;
pub mod switches;
pub mod types;

// Re-export commonly used types
pub use backend::{BackendCounters, BackendFactory, SdnBackend};
pub use config::{ControllerConfig, EngineConfig, EventStreamConfig, HealthMonitorConfig};
pub use controllers::{ControllerManager, ManagerStats};
pub use error::{ConductorError, Result};
pub use events::{Event, EventCallback, EventFilter, EventPriority, EventStream};
pub use sim::SimBackend;
pub use switches::SwitchManager;
pub use types::{
    ControllerHealth, ControllerInfo, ControllerStatus, ControllerType, FailoverOutcome,
    FlowAck, FlowSpec, HealthStatus, SwitchInfo, SwitchMapping, SwitchType,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_imports() {
        // Simple test to ensure all modules can be imported
        let _ = std::any::type_name::<EngineConfig>();
        let _ = std::any::type_name::<ControllerManager>();
        let _ = std::any::type_name::<SwitchManager>();
        let _ = std::any::type_name::<EventStream>();
    }
}
