//! Reverse proxy: public `/mcp/{serverId}/{workspaceId}` surface forwarded
//! to the loopback child, under a 30-second deadline. Stateless across
//! requests.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use thiserror::Error;

use crate::stores::{ServerStore, WorkspaceStore, GLOBAL_WORKSPACE_ID};
use crate::supervisor::{ProcessSupervisor, StartError};

const UPSTREAM_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Server not found: {0}")]
    NotFound(String),

    #[error("Server is disabled for this workspace")]
    Disabled,

    #[error("No instance is running for this server/workspace")]
    NotRunning,

    #[error("Instance has no assigned port")]
    NoPort,

    #[error("Failed to start instance: {0}")]
    StartFailed(#[from] StartError),

    #[error("Upstream request timed out")]
    Timeout,

    #[error("Upstream connection failed")]
    Unreachable,

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Disabled => StatusCode::FORBIDDEN,
            GatewayError::NotRunning | GatewayError::NoPort => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::StartFailed(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Unreachable => StatusCode::BAD_GATEWAY,
        }
    }
}

/// A forwarded upstream response, ready for the router to translate into
/// an axum `Response`.
pub struct ProxyResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy)]
pub enum StartPolicy {
    /// Missing/non-running instances are started on demand.
    LazyStart,
    /// Missing/non-running instances return `503`; callers must start
    /// explicitly via `/api/instances/start`.
    Strict,
}

pub struct Gateway {
    supervisor: Arc<ProcessSupervisor>,
    server_store: Arc<dyn ServerStore>,
    workspace_store: Arc<dyn WorkspaceStore>,
    http_client: reqwest::Client,
    path_prefix: String,
    policy: StartPolicy,
}

impl Gateway {
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        server_store: Arc<dyn ServerStore>,
        workspace_store: Arc<dyn WorkspaceStore>,
        path_prefix: String,
        policy: StartPolicy,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(UPSTREAM_DEADLINE)
            .build()
            .expect("gateway http client builds");
        Self {
            supervisor,
            server_store,
            workspace_store,
            http_client,
            path_prefix,
            policy,
        }
    }

    /// Forwards one request to the backing instance, starting it first
    /// under a lazy-start policy. `body` is ignored for methods other
    /// than `POST|PUT|PATCH`.
    pub async fn forward(
        &self,
        server_id: &str,
        workspace_id: &str,
        method: Method,
        body: Bytes,
    ) -> Result<ProxyResponse, GatewayError> {
        let template = self
            .server_store
            .get(server_id)
            .await
            .ok_or_else(|| GatewayError::NotFound(server_id.to_string()))?;

        let ws_cfg = if workspace_id != GLOBAL_WORKSPACE_ID {
            self.workspace_store
                .get_server_config(workspace_id, server_id)
                .await
                .unwrap_or_default()
        } else {
            Default::default()
        };
        if ws_cfg.is_disabled() {
            return Err(GatewayError::Disabled);
        }

        let mut instance = self.supervisor.get(server_id, workspace_id);
        let needs_start = instance
            .as_ref()
            .map(|i| i.status != crate::supervisor::InstanceStatus::Running)
            .unwrap_or(true);

        if needs_start {
            match self.policy {
                StartPolicy::Strict => return Err(GatewayError::NotRunning),
                StartPolicy::LazyStart => {
                    let project_root = if workspace_id != GLOBAL_WORKSPACE_ID {
                        self.workspace_store
                            .get(workspace_id)
                            .await
                            .map(|w| w.project_root)
                            .filter(|p| !p.is_empty())
                    } else {
                        None
                    };
                    let started = self
                        .supervisor
                        .start(server_id, workspace_id, project_root, ws_cfg.config_override.clone())
                        .await?;
                    instance = Some(started);
                }
            }
        }

        let instance = instance.ok_or(GatewayError::NotRunning)?;
        let port = instance.port.ok_or(GatewayError::NoPort)?;

        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", "application/json".parse().unwrap());
        headers.insert("X-Workspace-Id", header_value(workspace_id));
        headers.insert("X-Server-Id", header_value(server_id));
        if let Some(workspace) = self.workspace_store.get(workspace_id).await {
            if !workspace.project_root.is_empty() {
                headers.insert("X-Project-Root", header_value(&workspace.project_root));
            }
        }
        // Workspace-level context headers take precedence over the
        // template's own defaults on key collision.
        for (key, value) in template.context_headers.iter().chain(&ws_cfg.context_headers) {
            if let Ok(name) = axum::http::HeaderName::from_bytes(format!("X-CTX-{key}").as_bytes()) {
                headers.insert(name, header_value(value));
            }
        }

        let url = format!("http://127.0.0.1:{port}{}", self.path_prefix);
        let forwards_body = matches!(method, Method::POST | Method::PUT | Method::PATCH);

        let mut request = self.http_client.request(method, url.as_str()).headers(headers);
        if forwards_body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout
            } else if e.is_connect() {
                GatewayError::Unreachable
            } else {
                GatewayError::Internal(e.to_string())
            }
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let raw = response.bytes().await.map_err(|e| GatewayError::Internal(e.to_string()))?;

        let body = if content_type.as_deref().is_some_and(|ct| ct.starts_with("application/json")) {
            match serde_json::from_slice::<serde_json::Value>(&raw) {
                Ok(value) => Bytes::from(serde_json::to_vec(&value).unwrap_or_else(|_| raw.to_vec())),
                Err(_) => raw,
            }
        } else {
            raw
        };

        Ok(ProxyResponse {
            status,
            content_type,
            body,
        })
    }
}

fn header_value(s: &str) -> axum::http::HeaderValue {
    axum::http::HeaderValue::from_str(s).unwrap_or_else(|_| axum::http::HeaderValue::from_static(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::port::PortAllocator;
    use crate::stores::InMemoryStores;
    use crate::supervisor::SupervisorConfig;

    fn gateway(policy: StartPolicy) -> Gateway {
        let stores = InMemoryStores::new();
        let supervisor = ProcessSupervisor::new(
            stores.clone(),
            stores.clone(),
            stores.clone(),
            EventBus::new(),
            Arc::new(PortAllocator::new()),
            SupervisorConfig::default(),
        );
        Gateway::new(supervisor, stores.clone(), stores, "/mcp".to_string(), policy)
    }

    #[tokio::test]
    async fn unknown_server_is_not_found() {
        let gw = gateway(StartPolicy::Strict);
        let err = gw
            .forward("missing", "global", Method::POST, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn disabled_workspace_override_blocks_without_spawning() {
        let stores = InMemoryStores::new();
        stores.add_template(crate::stores::ServerTemplate {
            id: "s1".to_string(),
            display_name: "S1".to_string(),
            install: crate::stores::InstallSpec::Local {
                local_path: "/bin/true".to_string(),
            },
            default_config: serde_json::json!({}),
            permissions: None,
            context_headers: Default::default(),
        });
        stores.create(crate::stores::WorkspaceConfig {
            id: "w1".to_string(),
            label: "W1".to_string(),
            project_root: "/tmp/w1".to_string(),
            auto_cleanup: false,
            server_configs: [(
                "s1".to_string(),
                crate::stores::WorkspaceServerConfig {
                    enabled: Some(false),
                    ..Default::default()
                },
            )]
            .into_iter()
            .collect(),
        })
        .await;

        let supervisor = ProcessSupervisor::new(
            stores.clone(),
            stores.clone(),
            stores.clone(),
            EventBus::new(),
            Arc::new(PortAllocator::new()),
            SupervisorConfig::default(),
        );
        let gw = Gateway::new(supervisor.clone(), stores.clone(), stores, "/mcp".to_string(), StartPolicy::LazyStart);

        let err = gw
            .forward("s1", "w1", Method::POST, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Disabled));
        assert!(supervisor.get("s1", "w1").is_none());
    }

    #[tokio::test]
    async fn strict_policy_returns_503_without_starting() {
        let stores = InMemoryStores::new();
        stores.add_template(crate::stores::ServerTemplate {
            id: "s1".to_string(),
            display_name: "S1".to_string(),
            install: crate::stores::InstallSpec::Local {
                local_path: "/bin/true".to_string(),
            },
            default_config: serde_json::json!({}),
            permissions: None,
            context_headers: Default::default(),
        });
        let gw_stores = stores.clone();
        let supervisor = ProcessSupervisor::new(
            stores.clone(),
            stores.clone(),
            stores,
            EventBus::new(),
            Arc::new(PortAllocator::new()),
            SupervisorConfig::default(),
        );
        let gw = Gateway::new(supervisor.clone(), gw_stores.clone(), gw_stores, "/mcp".to_string(), StartPolicy::Strict);

        let err = gw
            .forward("s1", "global", Method::POST, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotRunning));
        assert!(supervisor.get("s1", "global").is_none());
    }
}
