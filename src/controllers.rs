//! Controller registry and lifecycle supervisor. Owns every controller
//! record, its backend handle, and the switch mappings; runs the periodic
//! health loop that drives automatic failover.

use chrono::Utc;
use dashmap::DashMap;
use metrics::{counter, gauge};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendFactory, SdnBackend};
use crate::config::{ControllerConfig, HealthMonitorConfig};
use crate::error::{ConductorError, Result};
use crate::events::{EventPriority, EventStream};
use crate::types::{
    ControllerInfo, ControllerStatus, FailoverOutcome, HealthStatus, SwitchMapping,
};

/// Aggregate registry statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub total_controllers: usize,
    pub connected_controllers: usize,
    pub healthy_controllers: usize,
    pub total_mappings: usize,
    pub total_failovers: u64,
}

/// Controller registry, health monitor, and failover engine.
pub struct ControllerManager {
    config: HealthMonitorConfig,
    factory: BackendFactory,
    events: Arc<EventStream>,
    controllers: DashMap<String, ControllerInfo>,
    backends: DashMap<String, Arc<dyn SdnBackend>>,
    mappings: DashMap<String, SwitchMapping>,
    packet_pumps: DashMap<String, JoinHandle<()>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ControllerManager {
    pub fn new(
        config: HealthMonitorConfig,
        factory: BackendFactory,
        events: Arc<EventStream>,
    ) -> Self {
        Self {
            config,
            factory,
            events,
            controllers: DashMap::new(),
            backends: DashMap::new(),
            mappings: DashMap::new(),
            packet_pumps: DashMap::new(),
            shutdown: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start the periodic health loop. Call as `manager.clone().start()`
    /// to keep the handle.
    pub fn start(self: Arc<Self>) {
        let mut shutdown_slot = self.shutdown.lock().unwrap();
        if shutdown_slot.is_some() {
            warn!("Controller manager already running");
            return;
        }
        let (tx, rx) = watch::channel(false);
        *shutdown_slot = Some(tx);

        info!(
            interval_seconds = self.config.health_check_interval_seconds,
            max_failures = self.config.max_health_failures,
            "Starting controller health monitor"
        );
        let manager = Arc::clone(&self);
        self.tasks
            .lock()
            .unwrap()
            .push(tokio::spawn(async move {
                manager.run_health_loop(rx).await;
            }));
    }

    /// Stop the health loop and shut down every backend.
    pub async fn stop(&self) {
        let sender = self.shutdown.lock().unwrap().take();
        if let Some(sender) = sender {
            let _ = sender.send(true);
        }
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Health monitor task terminated abnormally");
            }
        }

        let ids: Vec<String> = self.controllers.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Err(e) = self.stop_controller(&id).await {
                warn!(controller_id = %id, error = %e, "Shutdown of controller backend failed");
            }
        }
        info!("Controller manager stopped");
    }

    /// Register a controller. Validates the config, constructs the backend,
    /// and records the controller in `Initializing` state.
    ///
    /// With `auto_start` the controller is connected immediately; a start
    /// failure on that path is recorded in the controller record (status
    /// `Error`, `last_error` set) and never propagated, so a dead remote
    /// cannot fail registration.
    pub async fn register_controller(
        &self,
        config: ControllerConfig,
        auto_start: bool,
    ) -> Result<()> {
        config.validate()?;
        if self.controllers.contains_key(&config.controller_id) {
            return Err(ConductorError::ControllerExists(config.controller_id));
        }

        let backend = self.factory.create(&config)?;
        let controller_id = config.controller_id.clone();
        let controller_type = config.controller_type;

        self.backends.insert(controller_id.clone(), backend);
        self.controllers
            .insert(controller_id.clone(), ControllerInfo::new(config));

        info!(
            controller_id = %controller_id,
            controller_type = %controller_type,
            "Registered controller"
        );
        gauge!("conductor_controllers", self.controllers.len() as f64);
        self.events.publish_with(
            "controller_registered",
            &controller_id,
            "system",
            json!({ "controller_type": controller_type.as_str() }),
            EventPriority::Medium,
            HashMap::new(),
        );

        if auto_start {
            if let Err(e) = self.start_controller(&controller_id).await {
                warn!(
                    controller_id = %controller_id,
                    error = %e,
                    "Auto-start failed, controller registered in error state"
                );
            }
        }
        Ok(())
    }

    /// Connect a registered controller's backend and begin pumping its
    /// packet-in messages into the event stream.
    pub async fn start_controller(&self, controller_id: &str) -> Result<()> {
        let backend = self.backend(controller_id)?;
        match backend.initialize().await {
            Ok(()) => {
                if let Some(mut info) = self.controllers.get_mut(controller_id) {
                    info.status = ControllerStatus::Connected;
                    info.health_status = HealthStatus::Healthy;
                    info.last_seen = Some(Utc::now());
                    info.error_count = 0;
                    info.last_error = None;
                }
                self.spawn_packet_pump(controller_id, backend).await?;
                info!(controller_id = %controller_id, "Controller connected");
                Ok(())
            }
            Err(e) => {
                if let Some(mut info) = self.controllers.get_mut(controller_id) {
                    info.status = ControllerStatus::Error;
                    info.last_error = Some(e.to_string());
                }
                error!(controller_id = %controller_id, error = %e, "Controller start failed");
                Err(e)
            }
        }
    }

    /// Disconnect a controller's backend without removing it from the
    /// registry.
    pub async fn stop_controller(&self, controller_id: &str) -> Result<()> {
        let backend = self.backend(controller_id)?;
        if let Some((_, pump)) = self.packet_pumps.remove(controller_id) {
            pump.abort();
        }
        let _ = backend.unsubscribe_packet_in().await;
        backend.shutdown().await?;
        if let Some(mut info) = self.controllers.get_mut(controller_id) {
            info.status = ControllerStatus::Disconnected;
        }
        info!(controller_id = %controller_id, "Controller disconnected");
        Ok(())
    }

    /// Remove a controller entirely. Mappings that name it as primary or
    /// are currently served by it are deleted; surviving mappings have it
    /// pruned from their backup lists.
    pub async fn deregister_controller(&self, controller_id: &str) -> Result<()> {
        if !self.controllers.contains_key(controller_id) {
            return Err(ConductorError::ControllerNotFound(
                controller_id.to_string(),
            ));
        }
        if let Err(e) = self.stop_controller(controller_id).await {
            warn!(controller_id = %controller_id, error = %e, "Backend shutdown during deregistration failed");
        }
        self.backends.remove(controller_id);
        self.controllers.remove(controller_id);

        let mut removed_switches = Vec::new();
        self.mappings.retain(|switch_id, mapping| {
            let keep = mapping.primary_controller != controller_id
                && mapping.current_controller != controller_id;
            if !keep {
                removed_switches.push(switch_id.clone());
            }
            keep
        });
        for mut entry in self.mappings.iter_mut() {
            if entry.backup_controllers.iter().any(|b| b == controller_id) {
                entry.backup_controllers.retain(|b| b != controller_id);
                entry.last_updated = Utc::now();
            }
        }

        info!(
            controller_id = %controller_id,
            removed_mappings = removed_switches.len(),
            "Deregistered controller"
        );
        gauge!("conductor_controllers", self.controllers.len() as f64);
        gauge!("conductor_switch_mappings", self.mappings.len() as f64);
        self.events.publish_with(
            "controller_deregistered",
            controller_id,
            "system",
            json!({ "removed_mappings": removed_switches }),
            EventPriority::Medium,
            HashMap::new(),
        );
        Ok(())
    }

    /// Create or replace the mapping for a switch. The primary and every
    /// backup must be registered controllers.
    pub fn map_switch(
        &self,
        switch_id: &str,
        primary: &str,
        backups: Vec<String>,
    ) -> Result<SwitchMapping> {
        if !self.controllers.contains_key(primary) {
            return Err(ConductorError::ControllerNotFound(primary.to_string()));
        }
        for backup in &backups {
            if !self.controllers.contains_key(backup) {
                return Err(ConductorError::ControllerNotFound(backup.clone()));
            }
        }

        let mapping = SwitchMapping::new(switch_id, primary, backups);
        self.mappings
            .insert(switch_id.to_string(), mapping.clone());
        if let Some(mut info) = self.controllers.get_mut(primary) {
            if !info.assigned_switches.iter().any(|s| s == switch_id) {
                info.assigned_switches.push(switch_id.to_string());
            }
        }

        info!(switch_id = %switch_id, primary = %primary, "Mapped switch to controller");
        gauge!("conductor_switch_mappings", self.mappings.len() as f64);
        self.events.publish_with(
            "switch_mapped",
            primary,
            "system",
            json!({ "switch_id": switch_id }),
            EventPriority::Medium,
            HashMap::new(),
        );
        Ok(mapping)
    }

    /// Remove the mapping for a switch.
    pub fn unmap_switch(&self, switch_id: &str) -> Result<SwitchMapping> {
        let (_, mapping) = self
            .mappings
            .remove(switch_id)
            .ok_or_else(|| ConductorError::MappingNotFound(switch_id.to_string()))?;
        if let Some(mut info) = self.controllers.get_mut(&mapping.primary_controller) {
            info.assigned_switches.retain(|s| s != switch_id);
        }
        gauge!("conductor_switch_mappings", self.mappings.len() as f64);
        Ok(mapping)
    }

    /// Controller currently serving a switch.
    pub fn controller_for_switch(&self, switch_id: &str) -> Result<String> {
        self.mappings
            .get(switch_id)
            .map(|m| m.current_controller.clone())
            .ok_or_else(|| ConductorError::MappingNotFound(switch_id.to_string()))
    }

    /// Operator-initiated failover.
    ///
    /// With an explicit target the target must be registered, a member of
    /// the mapping's primary-or-backup set, and healthy. Without one the
    /// first healthy backup other than the current controller is chosen;
    /// the primary is only ever an explicit target.
    pub fn manual_failover(
        &self,
        switch_id: &str,
        target: Option<&str>,
    ) -> Result<FailoverOutcome> {
        let mapping = self
            .mappings
            .get(switch_id)
            .map(|m| m.clone())
            .ok_or_else(|| ConductorError::MappingNotFound(switch_id.to_string()))?;

        let new_controller = match target {
            Some(target) => {
                if !self.controllers.contains_key(target) {
                    return Err(ConductorError::ControllerNotFound(target.to_string()));
                }
                if !mapping.allows_current(target) {
                    // Not part of this switch's failover set.
                    return Err(ConductorError::ControllerNotFound(target.to_string()));
                }
                if !self.is_controller_healthy(target) {
                    return Err(ConductorError::ControllerUnhealthy(target.to_string()));
                }
                target.to_string()
            }
            None => self
                .select_failover_target(&mapping, &mapping.current_controller)
                .ok_or_else(|| ConductorError::NoBackupAvailable(switch_id.to_string()))?,
        };

        let outcome = self.apply_failover(switch_id, &new_controller)?;
        self.events.publish_with(
            "manual_failover",
            &outcome.new_controller,
            "system",
            json!({
                "switch_id": outcome.switch_id,
                "old_controller": outcome.old_controller,
                "new_controller": outcome.new_controller,
                "failover_count": outcome.failover_count,
            }),
            EventPriority::High,
            HashMap::new(),
        );
        Ok(outcome)
    }

    /// Clone of one controller record.
    pub fn controller(&self, controller_id: &str) -> Result<ControllerInfo> {
        self.controllers
            .get(controller_id)
            .map(|info| info.clone())
            .ok_or_else(|| ConductorError::ControllerNotFound(controller_id.to_string()))
    }

    pub fn list_controllers(&self) -> Vec<ControllerInfo> {
        self.controllers.iter().map(|e| e.clone()).collect()
    }

    pub fn mapping(&self, switch_id: &str) -> Result<SwitchMapping> {
        self.mappings
            .get(switch_id)
            .map(|m| m.clone())
            .ok_or_else(|| ConductorError::MappingNotFound(switch_id.to_string()))
    }

    pub fn switch_mappings(&self) -> Vec<SwitchMapping> {
        self.mappings.iter().map(|e| e.clone()).collect()
    }

    /// Backend handle for a registered controller.
    pub fn backend(&self, controller_id: &str) -> Result<Arc<dyn SdnBackend>> {
        self.backends
            .get(controller_id)
            .map(|b| Arc::clone(&b))
            .ok_or_else(|| ConductorError::ControllerNotFound(controller_id.to_string()))
    }

    /// Put a controller into or take it out of maintenance. Maintenance is
    /// an administrative state: the health loop skips the controller and
    /// failover never selects it.
    pub async fn set_maintenance(&self, controller_id: &str, enabled: bool) -> Result<()> {
        let backend = self.backend(controller_id)?;
        let connected = backend.is_connected().await;
        let mut info = self
            .controllers
            .get_mut(controller_id)
            .ok_or_else(|| ConductorError::ControllerNotFound(controller_id.to_string()))?;
        if enabled {
            info.status = ControllerStatus::Maintenance;
            info!(controller_id = %controller_id, "Controller entering maintenance");
        } else {
            info.status = if connected {
                ControllerStatus::Connected
            } else {
                ControllerStatus::Disconnected
            };
            info.error_count = 0;
            info!(controller_id = %controller_id, "Controller leaving maintenance");
        }
        Ok(())
    }

    pub fn stats(&self) -> ManagerStats {
        let mut connected = 0;
        let mut healthy = 0;
        for entry in self.controllers.iter() {
            if entry.status == ControllerStatus::Connected {
                connected += 1;
            }
            if entry.health_status == HealthStatus::Healthy {
                healthy += 1;
            }
        }
        ManagerStats {
            total_controllers: self.controllers.len(),
            connected_controllers: connected,
            healthy_controllers: healthy,
            total_mappings: self.mappings.len(),
            total_failovers: self.mappings.iter().map(|m| m.failover_count).sum(),
        }
    }

    /// Run one health check round over every registered controller. Driven
    /// by the health loop; callable directly for deterministic tests.
    pub async fn check_all_controllers(&self) {
        let snapshot: Vec<(String, Arc<dyn SdnBackend>, std::time::Duration)> = self
            .controllers
            .iter()
            .filter(|entry| entry.status != ControllerStatus::Maintenance)
            .filter_map(|entry| {
                self.backends.get(entry.key()).map(|backend| {
                    let timeout = entry
                        .config
                        .health_check_timeout_seconds
                        .map(|secs| std::time::Duration::from_secs(secs.max(1)))
                        .unwrap_or_else(|| self.config.check_timeout());
                    (entry.key().clone(), Arc::clone(&backend), timeout)
                })
            })
            .collect();

        for (controller_id, backend, timeout) in snapshot {
            let health = backend.health_check(timeout).await;
            let failed_over_threshold = {
                let mut info = match self.controllers.get_mut(&controller_id) {
                    Some(info) => info,
                    // Deregistered mid-round.
                    None => continue,
                };
                info.last_health_check = Some(health.last_check);
                info.metrics.response_time_ms = health.response_time_ms;
                info.metrics.uptime_seconds = health.uptime_seconds;
                info.metrics.error_count = health.error_count;
                info.metrics.last_activity = Some(health.last_check);

                if health.is_healthy {
                    info.error_count = 0;
                    info.health_status = HealthStatus::Healthy;
                    info.status = ControllerStatus::Connected;
                    info.last_seen = Some(health.last_check);
                    info.last_error = None;
                    false
                } else {
                    // Every failed check marks the controller unhealthy;
                    // the failure threshold only gates failover.
                    info.error_count += 1;
                    info.last_error = health.last_error.clone();
                    info.health_status = HealthStatus::Unhealthy;
                    if info.error_count >= self.config.max_health_failures {
                        info.status = ControllerStatus::Error;
                        true
                    } else {
                        false
                    }
                }
            };

            if failed_over_threshold {
                warn!(
                    controller_id = %controller_id,
                    failures = self.config.max_health_failures,
                    "Controller failed health threshold, initiating failover"
                );
                counter!("conductor_controller_failures_total", 1);
                self.events.publish_with(
                    "controller_unhealthy",
                    &controller_id,
                    "system",
                    json!({ "last_error": health.last_error }),
                    EventPriority::High,
                    HashMap::new(),
                );
                self.fail_over_switches(&controller_id);
            }
        }
    }

    /// Move every switch currently served by `failed_id` to its first
    /// healthy backup. A switch with no healthy backup keeps its mapping
    /// unchanged.
    fn fail_over_switches(&self, failed_id: &str) {
        let affected: Vec<SwitchMapping> = self
            .mappings
            .iter()
            .filter(|m| m.current_controller == failed_id)
            .map(|m| m.clone())
            .collect();

        for mapping in affected {
            match self.select_failover_target(&mapping, failed_id) {
                Some(target) => match self.apply_failover(&mapping.switch_id, &target) {
                    Ok(outcome) => {
                        info!(
                            switch_id = %outcome.switch_id,
                            old_controller = %outcome.old_controller,
                            new_controller = %outcome.new_controller,
                            "Switch failed over"
                        );
                        counter!("conductor_failovers_total", 1);
                        self.events.publish_with(
                            "switch_failover",
                            &outcome.new_controller,
                            "system",
                            json!({
                                "switch_id": outcome.switch_id,
                                "old_controller": outcome.old_controller,
                                "new_controller": outcome.new_controller,
                                "failover_count": outcome.failover_count,
                            }),
                            EventPriority::High,
                            HashMap::new(),
                        );
                    }
                    Err(e) => {
                        error!(switch_id = %mapping.switch_id, error = %e, "Failover failed");
                    }
                },
                None => {
                    warn!(
                        switch_id = %mapping.switch_id,
                        failed_controller = %failed_id,
                        "No healthy backup controller available, mapping unchanged"
                    );
                }
            }
        }
    }

    /// First healthy backup in listed order, skipping `exclude`. The
    /// primary is never selected here; moving back to a recovered primary
    /// takes an explicit manual failover.
    fn select_failover_target(
        &self,
        mapping: &SwitchMapping,
        exclude: &str,
    ) -> Option<String> {
        mapping
            .backup_controllers
            .iter()
            .find(|id| id.as_str() != exclude && self.is_controller_healthy(id))
            .cloned()
    }

    fn is_controller_healthy(&self, controller_id: &str) -> bool {
        self.controllers
            .get(controller_id)
            .map(|info| {
                info.status == ControllerStatus::Connected
                    && info.health_status == HealthStatus::Healthy
            })
            .unwrap_or(false)
    }

    /// Point a mapping at a new controller and bump its failover count.
    fn apply_failover(&self, switch_id: &str, new_controller: &str) -> Result<FailoverOutcome> {
        let mut mapping = self
            .mappings
            .get_mut(switch_id)
            .ok_or_else(|| ConductorError::MappingNotFound(switch_id.to_string()))?;
        let old_controller = mapping.current_controller.clone();
        mapping.current_controller = new_controller.to_string();
        mapping.failover_count += 1;
        mapping.last_updated = Utc::now();
        Ok(FailoverOutcome {
            switch_id: switch_id.to_string(),
            old_controller,
            new_controller: new_controller.to_string(),
            failover_count: mapping.failover_count,
        })
    }

    async fn spawn_packet_pump(
        &self,
        controller_id: &str,
        backend: Arc<dyn SdnBackend>,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        backend.subscribe_packet_in(tx).await?;

        let events = Arc::clone(&self.events);
        let id = controller_id.to_string();
        let pump = tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                events.publish(
                    "packet_in",
                    &id,
                    packet.switch_type.as_str(),
                    json!({
                        "switch_id": packet.switch_id,
                        "length": packet.payload.len(),
                        "in_port": packet.in_port,
                        "ingress_port": packet.ingress_port,
                    }),
                );
            }
            debug!(controller_id = %id, "Packet-in pump stopped");
        });
        if let Some(old) = self.packet_pumps.insert(controller_id.to_string(), pump) {
            old.abort();
        }
        Ok(())
    }

    async fn run_health_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.check_interval();
        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all_controllers().await;
                }
                _ = shutdown.changed() => {
                    debug!("Health monitor shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventStreamConfig;
    use crate::sim::SimBackend;
    use crate::types::ControllerType;

    fn manager() -> Arc<ControllerManager> {
        let mut factory = BackendFactory::new();
        factory.register(ControllerType::Openflow, |config| {
            Ok(Arc::new(SimBackend::new(config)) as Arc<dyn SdnBackend>)
        });
        let events = Arc::new(EventStream::new(EventStreamConfig::default()));
        Arc::new(ControllerManager::new(
            HealthMonitorConfig::default(),
            factory,
            events,
        ))
    }

    fn config(id: &str) -> ControllerConfig {
        ControllerConfig::new(id, ControllerType::Openflow, 6653)
    }

    /// Like `manager()`, but backends for ids ending in `-down` refuse to
    /// connect.
    fn manager_with_dead_remotes() -> Arc<ControllerManager> {
        use std::sync::atomic::Ordering;

        let mut factory = BackendFactory::new();
        factory.register(ControllerType::Openflow, |config| {
            let backend = Arc::new(SimBackend::new(config));
            if config.controller_id.ends_with("-down") {
                backend.fail_connect_handle().store(true, Ordering::Relaxed);
            }
            Ok(backend as Arc<dyn SdnBackend>)
        });
        let events = Arc::new(EventStream::new(EventStreamConfig::default()));
        Arc::new(ControllerManager::new(
            HealthMonitorConfig::default(),
            factory,
            events,
        ))
    }

    #[tokio::test]
    async fn test_auto_start_connects_on_registration() {
        let manager = manager();
        manager
            .register_controller(config("c1"), true)
            .await
            .unwrap();
        let info = manager.controller("c1").unwrap();
        assert_eq!(info.status, ControllerStatus::Connected);
        assert_eq!(info.health_status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_auto_start_failure_is_recorded_not_returned() {
        let manager = manager_with_dead_remotes();
        // Registration succeeds even though the remote refuses.
        manager
            .register_controller(config("of-down"), true)
            .await
            .unwrap();

        let info = manager.controller("of-down").unwrap();
        assert_eq!(info.status, ControllerStatus::Error);
        assert!(info.last_error.is_some());

        // An explicit start still surfaces the error to the caller.
        let err = manager.start_controller("of-down").await.unwrap_err();
        assert_eq!(err.code(), "BACKEND_ERROR");
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let manager = manager();
        manager.register_controller(config("c1"), false).await.unwrap();
        let err = manager
            .register_controller(config("c1"), false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONTROLLER_EXISTS");
        assert_eq!(manager.list_controllers().len(), 1);
    }

    #[tokio::test]
    async fn test_registration_starts_initializing() {
        let manager = manager();
        manager.register_controller(config("c1"), false).await.unwrap();
        let info = manager.controller("c1").unwrap();
        assert_eq!(info.status, ControllerStatus::Initializing);
        assert_eq!(info.health_status, HealthStatus::Unknown);

        manager.start_controller("c1").await.unwrap();
        let info = manager.controller("c1").unwrap();
        assert_eq!(info.status, ControllerStatus::Connected);
    }

    #[tokio::test]
    async fn test_mapping_requires_registered_controllers() {
        let manager = manager();
        manager.register_controller(config("c1"), false).await.unwrap();
        let err = manager
            .map_switch("s1", "missing", vec![])
            .unwrap_err();
        assert_eq!(err.code(), "CONTROLLER_NOT_FOUND");

        let err = manager
            .map_switch("s1", "c1", vec!["missing".to_string()])
            .unwrap_err();
        assert_eq!(err.code(), "CONTROLLER_NOT_FOUND");

        let mapping = manager.map_switch("s1", "c1", vec![]).unwrap();
        assert_eq!(mapping.current_controller, "c1");
    }

    #[tokio::test]
    async fn test_manual_failover_target_must_be_in_failover_set() {
        let manager = manager();
        for id in ["c1", "c2", "c3"] {
            manager.register_controller(config(id), true).await.unwrap();
        }
        manager
            .map_switch("s1", "c1", vec!["c2".to_string()])
            .unwrap();

        // c3 is registered and healthy but not part of s1's failover set.
        let err = manager.manual_failover("s1", Some("c3")).unwrap_err();
        assert_eq!(err.code(), "CONTROLLER_NOT_FOUND");

        let outcome = manager.manual_failover("s1", Some("c2")).unwrap();
        assert_eq!(outcome.new_controller, "c2");
        assert_eq!(outcome.failover_count, 1);
        let mapping = manager.mapping("s1").unwrap();
        assert!(mapping.allows_current(&mapping.current_controller));
    }

    #[tokio::test]
    async fn test_deregistration_prunes_backup_lists() {
        let manager = manager();
        for id in ["c1", "c2", "c3"] {
            manager.register_controller(config(id), false).await.unwrap();
        }
        manager
            .map_switch("s1", "c1", vec!["c2".to_string(), "c3".to_string()])
            .unwrap();
        manager.map_switch("s2", "c2", vec![]).unwrap();

        manager.deregister_controller("c2").await.unwrap();

        // s2 was primary-mapped to c2 and is gone; s1 survives minus c2.
        assert!(manager.mapping("s2").is_err());
        let mapping = manager.mapping("s1").unwrap();
        assert_eq!(mapping.backup_controllers, vec!["c3".to_string()]);
    }
}
