pub mod events;
pub mod instances;
pub mod mcp;
pub mod sessions;

use axum::Json;
use serde_json::json;

pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}
