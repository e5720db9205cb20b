//! `/api/sessions/*` surface.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub project_root: Option<String>,
    #[serde(default)]
    pub client_type: Option<String>,
    pub client_instance_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionIdRequest {
    pub session_id: String,
}

pub async fn connect(State(state): State<AppState>, Json(req): Json<ConnectRequest>) -> Json<Value> {
    let _ = req.client_type;
    let result = state
        .sessions
        .connect(req.workspace_id, req.project_root, req.client_instance_id)
        .await;
    Json(json!({
        "success": true,
        "sessionId": result.session_id,
        "workspaceId": result.workspace_id,
        "endpoints": result.endpoints,
    }))
}

pub async fn ping(State(state): State<AppState>, Json(req): Json<SessionIdRequest>) -> Json<Value> {
    let alive = state.sessions.ping(&req.session_id);
    Json(json!({"success": alive}))
}

pub async fn disconnect(State(state): State<AppState>, Json(req): Json<SessionIdRequest>) -> Json<Value> {
    state.sessions.disconnect(&req.session_id).await;
    Json(json!({"success": true}))
}
