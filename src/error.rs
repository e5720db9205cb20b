//! Top-level error taxonomy and HTTP surfacing.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::port::PortError;
use crate::sessions::SessionError;
use crate::supervisor::StartError;

/// Errors surfaced at the HTTP boundary.
///
/// Every variant maps to an HTTP status. The body is always
/// `{"success": false, "error": <message>}`, never a stack trace.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("{0}")]
    NotFound(String),

    #[error("Server is disabled for this workspace")]
    Disabled,

    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            DaemonError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            DaemonError::Disabled => (StatusCode::FORBIDDEN, self.to_string()),
            DaemonError::Start(e) => (e.status_code(), e.to_string()),
            DaemonError::Port(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            DaemonError::Gateway(e) => (e.status_code(), e.to_string()),
            DaemonError::Session(e) => (e.status_code(), e.to_string()),
            DaemonError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "success": false,
            "error": message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
