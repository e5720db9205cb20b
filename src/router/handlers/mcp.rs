//! The reverse-proxy surface: `/mcp/{serverId}/{workspaceId}` and its
//! sibling `/health` probe.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde_json::json;

use crate::router::AppState;

pub async fn proxy(
    State(state): State<AppState>,
    Path((server_id, workspace_id)): Path<(String, String)>,
    method: Method,
    _headers: HeaderMap,
    body: Bytes,
) -> Result<Response, crate::error::DaemonError> {
    let proxied = state.gateway.forward(&server_id, &workspace_id, method, body).await?;

    let content_type = proxied
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let mut response = (proxied.status, proxied.body).into_response();
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(axum::http::header::CONTENT_TYPE, value);
    }
    Ok(response)
}

pub async fn health(
    State(state): State<AppState>,
    Path((server_id, workspace_id)): Path<(String, String)>,
) -> Json<serde_json::Value> {
    match state.supervisor.get(&server_id, &workspace_id) {
        Some(instance) => Json(json!({
            "status": instance.status.to_string(),
            "serverId": instance.server_id,
            "workspaceId": instance.workspace_id,
            "port": instance.port,
            "pid": instance.pid,
        })),
        None => Json(json!({
            "status": "stopped",
            "serverId": server_id,
            "workspaceId": workspace_id,
        })),
    }
}

