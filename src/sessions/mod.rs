//! Session registry: tracks connected clients per workspace, expires idle
//! sessions, and cascades workspace auto-cleanup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use dashmap::DashMap;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::events::{AppEvent, AppEventKind, EventBus};
use crate::stores::{ServerStore, WorkspaceConfig, WorkspaceStore, GLOBAL_WORKSPACE_ID};
use crate::supervisor::ProcessSupervisor;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_SESSION_EXPIRY: Duration = Duration::from_secs(40);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
}

impl SessionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    session_id: String,
    workspace_id: String,
    client_instance_id: String,
    last_seen_at: Instant,
}

#[derive(Debug, Clone)]
pub struct SessionConnectResult {
    pub session_id: String,
    pub workspace_id: String,
    pub endpoints: HashMap<String, String>,
}

pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
    by_client: DashMap<String, String>,
    server_store: Arc<dyn ServerStore>,
    workspace_store: Arc<dyn WorkspaceStore>,
    supervisor: Arc<ProcessSupervisor>,
    event_bus: EventBus,
    sweep_interval: Duration,
    session_expiry: Duration,
}

impl SessionRegistry {
    pub fn new(
        server_store: Arc<dyn ServerStore>,
        workspace_store: Arc<dyn WorkspaceStore>,
        supervisor: Arc<ProcessSupervisor>,
        event_bus: EventBus,
    ) -> Arc<Self> {
        Self::with_intervals(
            server_store,
            workspace_store,
            supervisor,
            event_bus,
            DEFAULT_SWEEP_INTERVAL,
            DEFAULT_SESSION_EXPIRY,
        )
    }

    /// Same as [`SessionRegistry::new`], but with the sweep cadence and idle
    /// expiry taken from config instead of the defaults.
    pub fn with_intervals(
        server_store: Arc<dyn ServerStore>,
        workspace_store: Arc<dyn WorkspaceStore>,
        supervisor: Arc<ProcessSupervisor>,
        event_bus: EventBus,
        sweep_interval: Duration,
        session_expiry: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            by_client: DashMap::new(),
            server_store,
            workspace_store,
            supervisor,
            event_bus,
            sweep_interval,
            session_expiry,
        })
    }

    /// Spawns the background sweeper. The returned handle is not normally
    /// awaited; it runs for the daemon's lifetime.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.sweep_interval);
            loop {
                ticker.tick().await;
                registry.sweep_expired().await;
            }
        })
    }

    async fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<Session> = self
            .sessions
            .iter()
            .filter(|e| now.duration_since(e.value().last_seen_at) > self.session_expiry)
            .map(|e| e.value().clone())
            .collect();

        for session in expired {
            self.sessions.remove(&session.session_id);
            self.by_client.remove(&session.client_instance_id);
            self.event_bus.emit_app(AppEvent {
                kind: AppEventKind::SessionDisconnected,
                timestamp: chrono::Utc::now(),
                workspace_id: Some(session.workspace_id.clone()),
                session_id: Some(session.session_id.clone()),
                reason: Some("expired".to_string()),
            });
            self.maybe_cleanup_workspace(&session.workspace_id).await;
        }
    }

    /// Idempotent by `client_instance_id`: a repeat connect for the same
    /// client refreshes `last_seen_at` and returns the existing session.
    pub async fn connect(
        &self,
        workspace_id: Option<String>,
        project_root: Option<String>,
        client_instance_id: String,
    ) -> SessionConnectResult {
        if let Some(session_id) = self.by_client.get(&client_instance_id).map(|e| e.clone()) {
            if let Some(mut session) = self.sessions.get_mut(&session_id) {
                session.last_seen_at = Instant::now();
                let workspace_id = session.workspace_id.clone();
                drop(session);
                let endpoints = self.build_endpoints(&workspace_id).await;
                return SessionConnectResult {
                    session_id,
                    workspace_id,
                    endpoints,
                };
            }
        }

        let resolved_workspace_id = self.resolve_workspace(workspace_id, project_root).await;
        let session_id = Uuid::new_v4().to_string();
        self.sessions.insert(
            session_id.clone(),
            Session {
                session_id: session_id.clone(),
                workspace_id: resolved_workspace_id.clone(),
                client_instance_id: client_instance_id.clone(),
                last_seen_at: Instant::now(),
            },
        );
        self.by_client.insert(client_instance_id, session_id.clone());

        self.event_bus.emit_app(AppEvent {
            kind: AppEventKind::SessionConnected,
            timestamp: chrono::Utc::now(),
            workspace_id: Some(resolved_workspace_id.clone()),
            session_id: Some(session_id.clone()),
            reason: None,
        });

        let endpoints = self.build_endpoints(&resolved_workspace_id).await;
        SessionConnectResult {
            session_id,
            workspace_id: resolved_workspace_id,
            endpoints,
        }
    }

    async fn resolve_workspace(&self, workspace_id: Option<String>, project_root: Option<String>) -> String {
        if let Some(id) = workspace_id.filter(|id| !id.is_empty()) {
            return id;
        }
        let Some(project_root) = project_root else {
            return GLOBAL_WORKSPACE_ID.to_string();
        };
        if let Some(existing) = self.workspace_store.find_by_project_root(&project_root).await {
            return existing.id;
        }
        let id = format!("ws-{}", Uuid::new_v4());
        info!(workspace_id = %id, project_root = %project_root, "auto-creating workspace for new session");
        self.workspace_store
            .create(WorkspaceConfig::new_auto(id.clone(), project_root))
            .await;
        self.event_bus.emit_app(AppEvent {
            kind: AppEventKind::WorkspaceCreated,
            timestamp: chrono::Utc::now(),
            workspace_id: Some(id.clone()),
            session_id: None,
            reason: None,
        });
        id
    }

    async fn build_endpoints(&self, workspace_id: &str) -> HashMap<String, String> {
        let mut endpoints = HashMap::new();
        for template in self.server_store.get_all().await {
            let disabled = self
                .workspace_store
                .get_server_config(workspace_id, &template.id)
                .await
                .map(|cfg| cfg.is_disabled())
                .unwrap_or(false);
            if disabled {
                continue;
            }
            endpoints.insert(
                template.id.clone(),
                format!("/mcp/{}/{}", template.id, workspace_id),
            );
        }
        endpoints
    }

    pub fn ping(&self, session_id: &str) -> bool {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.last_seen_at = Instant::now();
            true
        } else {
            false
        }
    }

    pub async fn disconnect(&self, session_id: &str) {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return;
        };
        self.by_client.remove(&session.client_instance_id);
        self.event_bus.emit_app(AppEvent {
            kind: AppEventKind::SessionDisconnected,
            timestamp: chrono::Utc::now(),
            workspace_id: Some(session.workspace_id.clone()),
            session_id: Some(session.session_id.clone()),
            reason: Some("disconnect".to_string()),
        });
        self.maybe_cleanup_workspace(&session.workspace_id).await;
    }

    async fn maybe_cleanup_workspace(&self, workspace_id: &str) {
        if workspace_id == GLOBAL_WORKSPACE_ID {
            return;
        }
        let Some(workspace) = self.workspace_store.get(workspace_id).await else {
            return;
        };
        if !workspace.auto_cleanup {
            return;
        }
        let remaining = self.sessions.iter().any(|e| e.value().workspace_id == workspace_id);
        if remaining {
            return;
        }

        self.supervisor.stop_workspace(workspace_id).await;
        self.workspace_store.delete(workspace_id).await;
        self.event_bus.emit_app(AppEvent {
            kind: AppEventKind::WorkspaceDeleted,
            timestamp: chrono::Utc::now(),
            workspace_id: Some(workspace_id.to_string()),
            session_id: None,
            reason: Some("auto-cleanup".to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::port::PortAllocator;
    use crate::stores::InMemoryStores;
    use crate::supervisor::SupervisorConfig;

    fn registry() -> Arc<SessionRegistry> {
        let stores = InMemoryStores::new();
        let supervisor = ProcessSupervisor::new(
            stores.clone(),
            stores.clone(),
            stores.clone(),
            EventBus::new(),
            Arc::new(PortAllocator::new()),
            SupervisorConfig::default(),
        );
        SessionRegistry::new(stores.clone(), stores, supervisor, EventBus::new())
    }

    #[tokio::test]
    async fn repeat_connect_with_same_client_id_returns_same_session() {
        let registry = registry();
        let first = registry
            .connect(Some("global".to_string()), None, "client-a".to_string())
            .await;
        let second = registry
            .connect(Some("global".to_string()), None, "client-a".to_string())
            .await;
        assert_eq!(first.session_id, second.session_id);
    }

    #[tokio::test]
    async fn connect_without_workspace_auto_creates_one_by_project_root() {
        let registry = registry();
        let result = registry
            .connect(None, Some("/x".to_string()), "client-b".to_string())
            .await;
        assert_ne!(result.workspace_id, GLOBAL_WORKSPACE_ID);
        assert!(registry.workspace_store.get(&result.workspace_id).await.is_some());
    }

    #[tokio::test]
    async fn ping_unknown_session_returns_false() {
        let registry = registry();
        assert!(!registry.ping("does-not-exist"));
    }

    #[tokio::test]
    async fn disconnect_last_session_cleans_up_auto_cleanup_workspace() {
        let registry = registry();
        let result = registry
            .connect(None, Some("/y".to_string()), "client-c".to_string())
            .await;
        registry.disconnect(&result.session_id).await;
        assert!(registry.workspace_store.get(&result.workspace_id).await.is_none());
    }
}
