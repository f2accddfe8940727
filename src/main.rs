use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use sdn_conductor::{
    BackendFactory, ControllerManager, ControllerStatus, ControllerType, EngineConfig,
    EventStream, SdnBackend, SimBackend, SwitchManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sdn_conductor=info".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!(
        "Starting SDN Conductor v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration; fall back to defaults when no file is given.
    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!(config_path = %path, "Loading configuration");
            let config = EngineConfig::from_file(&path)
                .with_context(|| format!("failed to load configuration from {}", path))?;
            config
                .validate()
                .context("configuration failed validation")?;
            config
        }
        None => {
            info!("No configuration file given, using defaults");
            EngineConfig::default()
        }
    };

    initialize_metrics();
    if config.metrics.enabled {
        let addr: SocketAddr = config
            .metrics
            .listen_addr
            .parse()
            .context("invalid metrics.listen_addr")?;
        start_metrics_exporter(addr)?;
    }

    // Event stream first; everything else publishes into it.
    let events = Arc::new(EventStream::new(config.events.clone()));
    events.clone().start();

    let mut factory = BackendFactory::new();
    for controller_type in [
        ControllerType::Openflow,
        ControllerType::P4Runtime,
        ControllerType::Custom,
    ] {
        factory.register(controller_type, |controller_config| {
            Ok(Arc::new(SimBackend::new(controller_config)) as Arc<dyn SdnBackend>)
        });
    }

    let manager = Arc::new(ControllerManager::new(
        config.health.clone(),
        factory,
        Arc::clone(&events),
    ));
    manager.clone().start();

    let switches = Arc::new(SwitchManager::new());
    for static_type in &config.switch_types {
        switches.register_switch_type(&static_type.switch_id, static_type.switch_type);
    }

    // Register and auto-start configured controllers; a start failure is
    // recorded on the controller record and must not keep the rest of the
    // engine down.
    for controller_config in &config.controllers {
        let controller_id = controller_config.controller_id.clone();
        if let Err(e) = manager
            .register_controller(controller_config.clone(), true)
            .await
        {
            error!(controller_id = %controller_id, error = %e, "Controller registration failed");
            continue;
        }
        let connected = manager
            .controller(&controller_id)
            .map(|info| info.status == ControllerStatus::Connected)
            .unwrap_or(false);
        if connected {
            if let Ok(backend) = manager.backend(&controller_id) {
                switches.register_backend(backend);
            }
        }
    }

    for mapping in &config.mappings {
        if let Err(e) = manager.map_switch(
            &mapping.switch_id,
            &mapping.primary_controller,
            mapping.backup_controllers.clone(),
        ) {
            warn!(switch_id = %mapping.switch_id, error = %e, "Startup mapping failed");
        }
    }

    let stats = manager.stats();
    info!(
        controllers = stats.total_controllers,
        connected = stats.connected_controllers,
        mappings = stats.total_mappings,
        "Engine running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    manager.stop().await;
    events.stop().await;
    info!("Engine stopped");
    Ok(())
}

/// Initialize metrics descriptions
fn initialize_metrics() {
    describe_counter!(
        "conductor_events_published_total",
        "Total number of events published to the stream"
    );
    describe_counter!(
        "conductor_events_dropped_total",
        "Total number of events dropped by queue overflow"
    );
    describe_counter!(
        "conductor_failovers_total",
        "Total number of automatic switch failovers"
    );
    describe_counter!(
        "conductor_controller_failures_total",
        "Total number of controllers that crossed the failure threshold"
    );
    describe_counter!(
        "conductor_flows_installed_total",
        "Total number of flow rules installed"
    );
    describe_gauge!(
        "conductor_event_queue_depth",
        "Current event queue depth"
    );
    describe_gauge!(
        "conductor_event_subscribers",
        "Current number of event subscribers"
    );
    describe_gauge!("conductor_controllers", "Current registered controllers");
    describe_gauge!(
        "conductor_switch_mappings",
        "Current switch-to-controller mappings"
    );
}

/// Start Prometheus metrics exporter
fn start_metrics_exporter(addr: SocketAddr) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!(metrics_addr = %addr, "Prometheus metrics exporter started");
    Ok(())
}
