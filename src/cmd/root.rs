//! Main daemon command - wires stores, supervisor, gateway, sessions, and
//! the HTTP router, then serves until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::Configuration;
use crate::events::EventBus;
use crate::gateway::{Gateway, StartPolicy};
use crate::port::PortAllocator;
use crate::router::{self, AppState};
use crate::sessions::SessionRegistry;
use crate::stores::InMemoryStores;
use crate::supervisor::{ProcessSupervisor, SupervisorConfig};

/// Distinguishes the daemon's fatal failure modes so `main.rs` can map each
/// to its own exit code rather than collapsing everything to one.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to load configuration: {0}")]
    Config(#[source] anyhow::Error),
    #[error("failed to bind: {0}")]
    Bind(#[source] anyhow::Error),
    #[error("server error: {0}")]
    Server(#[source] anyhow::Error),
}

impl RunError {
    /// The process exit code this failure should produce.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) => 2,
            RunError::Bind(_) => 3,
            RunError::Server(_) => 1,
        }
    }
}

/// Run the daemon. Returns `Err` distinguishing config load/parse failure
/// from a fatal bind failure, so the caller can exit with the right code.
pub async fn run(config_path: &str) -> Result<(), RunError> {
    info!("Loading configuration from: {}", config_path);
    let config = Configuration::load(config_path).map_err(RunError::Config)?;

    info!("Configuration loaded successfully");
    info!("  API: {}:{}", config.api.host, config.api.port);
    info!("  Root directory: {}", config.system.root_directory.display());
    info!(
        "  Port range: [{}, {}]",
        config.system.port_range_start, config.system.port_range_end
    );

    let stores = InMemoryStores::new();
    let event_bus = EventBus::new();
    let port_allocator = Arc::new(PortAllocator::with_range(
        config.system.port_range_start,
        config.system.port_range_end,
    ));

    let supervisor_config = SupervisorConfig {
        route_instances_globally: config.gateway.route_instances_globally,
        path_prefix: config.gateway.path_prefix.clone(),
    };
    let supervisor = ProcessSupervisor::new(
        stores.clone(),
        stores.clone(),
        stores.clone(),
        event_bus.clone(),
        port_allocator,
        supervisor_config,
    );

    let policy = if config.gateway.lazy_start {
        StartPolicy::LazyStart
    } else {
        StartPolicy::Strict
    };
    let gateway = Arc::new(Gateway::new(
        supervisor.clone(),
        stores.clone(),
        stores.clone(),
        config.gateway.path_prefix.clone(),
        policy,
    ));

    let sessions = SessionRegistry::with_intervals(
        stores.clone(),
        stores.clone(),
        supervisor.clone(),
        event_bus.clone(),
        Duration::from_secs(config.sessions.sweep_interval_secs),
        Duration::from_secs(config.sessions.expiry_secs),
    );
    sessions.spawn_sweeper();

    let state = AppState {
        supervisor: supervisor.clone(),
        gateway,
        sessions,
        server_store: stores.clone(),
        event_bus,
    };
    let app = router::build_router(state);

    let bind_addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port)
        .parse()
        .map_err(|e| {
            RunError::Bind(anyhow::anyhow!(
                "invalid bind address {}:{}: {}",
                config.api.host,
                config.api.port,
                e
            ))
        })?;

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| RunError::Bind(anyhow::anyhow!("failed to bind {}: {}", bind_addr, e)))?;
    info!("Listening on {}", bind_addr);

    let shutdown_supervisor = supervisor.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    warn!("Shutting down, stopping all supervised instances...");
    shutdown_supervisor.stop_all().await;

    if let Err(e) = result {
        error!("HTTP server error: {}", e);
        return Err(RunError::Server(e.into()));
    }

    info!("Daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C handler");
}
