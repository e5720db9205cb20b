//! HTTP surface: axum router wiring, layered `build_router` shape
//! (trace + CORS on every boundary, no auth layer at this level).

mod handlers;

use std::sync::Arc;

use axum::routing::{any, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::events::EventBus;
use crate::gateway::Gateway;
use crate::sessions::SessionRegistry;
use crate::stores::ServerStore;
use crate::supervisor::ProcessSupervisor;

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<ProcessSupervisor>,
    pub gateway: Arc<Gateway>,
    pub sessions: Arc<SessionRegistry>,
    pub server_store: Arc<dyn ServerStore>,
    pub event_bus: EventBus,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route(
            "/mcp/:server_id/:workspace_id/health",
            get(handlers::mcp::health),
        )
        .route("/mcp/:server_id/:workspace_id", any(handlers::mcp::proxy))
        .route("/api/instances/start", post(handlers::instances::start))
        .route("/api/instances/stop", post(handlers::instances::stop))
        .route("/api/instances/restart", post(handlers::instances::restart))
        .route(
            "/api/instances/restart-all",
            post(handlers::instances::restart_all),
        )
        .route(
            "/api/instances/:server_id/:workspace_id",
            get(handlers::instances::get_instance),
        )
        .route("/api/sessions/connect", post(handlers::sessions::connect))
        .route("/api/sessions/ping", post(handlers::sessions::ping))
        .route(
            "/api/sessions/disconnect",
            post(handlers::sessions::disconnect),
        )
        .route("/events", get(handlers::events::upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
