//! `ServerInstance` snapshot type and the supervisor's error taxonomy.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub fn instance_key(server_id: &str, workspace_id: &str) -> String {
    format!("{server_id}:{workspace_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Starting,
    Running,
    Stopped,
    Error,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Starting => write!(f, "starting"),
            InstanceStatus::Running => write!(f, "running"),
            InstanceStatus::Stopped => write!(f, "stopped"),
            InstanceStatus::Error => write!(f, "error"),
        }
    }
}

/// A point-in-time, serializable snapshot of a supervised instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInstance {
    pub server_id: String,
    pub workspace_id: String,
    pub status: InstanceStatus,
    pub pid: Option<u32>,
    pub port: Option<u16>,
    pub last_error: Option<String>,
    pub restart_attempts: u32,
    pub tools_count: Option<u64>,
    pub resources_count: Option<u64>,
    pub prompts_count: Option<u64>,
}

impl ServerInstance {
    pub fn key(&self) -> String {
        instance_key(&self.server_id, &self.workspace_id)
    }

    pub(crate) fn new_starting(server_id: &str, workspace_id: &str, restart_attempts: u32) -> Self {
        Self {
            server_id: server_id.to_string(),
            workspace_id: workspace_id.to_string(),
            status: InstanceStatus::Starting,
            pid: None,
            port: None,
            last_error: None,
            restart_attempts,
            tools_count: None,
            resources_count: None,
            prompts_count: None,
        }
    }
}

/// Failure surfaces for `start`/`restart`, per the error handling taxonomy.
#[derive(Debug, Error, Clone)]
pub enum StartError {
    #[error("Server not found: {0}")]
    TemplateNotFound(String),

    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("No port available in the configured range")]
    NoPortAvailable,

    #[error("Failed to spawn child process: {0}")]
    SpawnFailed(String),

    #[error("Child did not become healthy within the startup budget")]
    HealthTimeout,

    #[error("Exceeded restart attempts")]
    CrashBudgetExceeded,
}

impl StartError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StartError::TemplateNotFound(_) | StartError::WorkspaceNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            StartError::NoPortAvailable
            | StartError::SpawnFailed(_)
            | StartError::HealthTimeout
            | StartError::CrashBudgetExceeded => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
