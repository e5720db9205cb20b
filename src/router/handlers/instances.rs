//! `/api/instances/*` control surface.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::DaemonError;
use crate::router::AppState;
use crate::stores::GLOBAL_WORKSPACE_ID;

#[derive(Debug, Deserialize)]
pub struct InstanceRequest {
    pub server_id: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub project_root: Option<String>,
    #[serde(default)]
    pub config_override: Option<Value>,
}

fn workspace_or_global(workspace_id: Option<String>) -> String {
    workspace_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| GLOBAL_WORKSPACE_ID.to_string())
}

pub async fn start(
    State(state): State<AppState>,
    Json(req): Json<InstanceRequest>,
) -> Result<Json<Value>, DaemonError> {
    let workspace_id = workspace_or_global(req.workspace_id);
    let instance = state
        .supervisor
        .start(&req.server_id, &workspace_id, req.project_root, req.config_override)
        .await?;
    Ok(Json(json!({"success": true, "instance": instance})))
}

pub async fn stop(State(state): State<AppState>, Json(req): Json<InstanceRequest>) -> Json<Value> {
    let workspace_id = workspace_or_global(req.workspace_id);
    state.supervisor.stop(&req.server_id, &workspace_id).await;
    Json(json!({"success": true}))
}

pub async fn restart(
    State(state): State<AppState>,
    Json(req): Json<InstanceRequest>,
) -> Result<Json<Value>, DaemonError> {
    let workspace_id = workspace_or_global(req.workspace_id);
    let instance = state
        .supervisor
        .restart(&req.server_id, &workspace_id, req.project_root, req.config_override)
        .await?;
    Ok(Json(json!({"success": true, "instance": instance})))
}

pub async fn restart_all(State(state): State<AppState>) -> Json<Value> {
    let running: Vec<_> = state
        .supervisor
        .all()
        .into_iter()
        .filter(|i| i.status == crate::supervisor::InstanceStatus::Running)
        .collect();

    let mut results = Vec::new();
    for instance in running {
        let outcome = state
            .supervisor
            .restart(&instance.server_id, &instance.workspace_id, None, None)
            .await;
        results.push(json!({
            "serverId": instance.server_id,
            "workspaceId": instance.workspace_id,
            "success": outcome.is_ok(),
            "error": outcome.err().map(|e| e.to_string()),
        }));
    }

    Json(json!({"success": true, "results": results}))
}

pub async fn get_instance(
    State(state): State<AppState>,
    Path((server_id, workspace_id)): Path<(String, String)>,
) -> Json<Value> {
    match state.supervisor.get(&server_id, &workspace_id) {
        Some(instance) => Json(json!({"instance": instance})),
        None => Json(json!({"instance": null, "status": "stopped"})),
    }
}
