//! External collaborator interfaces and the data model they serve.
//!
//! The core never touches disk itself. Persistent stores for templates,
//! workspaces, and secrets live outside this crate; these traits are the
//! read/write shapes the core requires of them. An in-memory implementation
//! is provided for tests and for embedding the daemon without a real
//! backing store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::env::{ServerPermissions, ServerPermissionsOverride};

pub const GLOBAL_WORKSPACE_ID: &str = "global";

/// One of the supported ways to launch a child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "lowercase")]
pub enum InstallSpec {
    Npx {
        package: String,
        version: Option<String>,
    },
    Pnpx {
        package: String,
        version: Option<String>,
    },
    Yarn {
        package: String,
        version: Option<String>,
    },
    Bunx {
        package: String,
        version: Option<String>,
    },
    Local {
        local_path: String,
    },
    Installed {
        entry_point: String,
    },
}

/// A declarative description of how to launch a child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTemplate {
    pub id: String,
    pub display_name: String,
    pub install: InstallSpec,
    #[serde(default = "default_config_value")]
    pub default_config: Value,
    /// `None` means the template predates the permission model and is
    /// treated as unrestricted (legacy migration compromise).
    #[serde(default)]
    pub permissions: Option<ServerPermissions>,
    #[serde(default)]
    pub context_headers: HashMap<String, String>,
}

fn default_config_value() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ServerTemplate {
    /// Effective global permissions, applying the legacy-unrestricted rule.
    pub fn effective_permissions(&self) -> ServerPermissions {
        self.permissions
            .clone()
            .unwrap_or_else(ServerPermissions::unrestricted)
    }
}

/// Per-server override stored against a workspace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceServerConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub config_override: Option<Value>,
    #[serde(default)]
    pub permissions_override: Option<ServerPermissionsOverride>,
    #[serde(default)]
    pub context_headers: HashMap<String, String>,
}

impl WorkspaceServerConfig {
    pub fn is_disabled(&self) -> bool {
        matches!(self.enabled, Some(false))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub project_root: String,
    #[serde(default)]
    pub auto_cleanup: bool,
    #[serde(default)]
    pub server_configs: HashMap<String, WorkspaceServerConfig>,
}

impl WorkspaceConfig {
    pub fn new_auto(id: impl Into<String>, project_root: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: String::new(),
            project_root: project_root.into(),
            auto_cleanup: true,
            server_configs: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub email: String,
    pub full_name: String,
}

#[async_trait]
pub trait ServerStore: Send + Sync {
    async fn get(&self, id: &str) -> Option<ServerTemplate>;
    async fn get_all(&self) -> Vec<ServerTemplate>;
}

#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn get(&self, id: &str) -> Option<WorkspaceConfig>;
    async fn find_by_project_root(&self, path: &str) -> Option<WorkspaceConfig>;
    async fn create(&self, workspace: WorkspaceConfig);
    async fn update(&self, workspace: WorkspaceConfig);
    async fn delete(&self, id: &str);
    async fn get_server_config(&self, workspace_id: &str, server_id: &str) -> Option<WorkspaceServerConfig>;
    async fn set_server_config(&self, workspace_id: &str, server_id: &str, config: WorkspaceServerConfig);
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// `scope` is one of `"app"`, `"server"`, `"workspace"`.
    async fn get_secrets(
        &self,
        server_id: &str,
        scope: &str,
        workspace_id: Option<&str>,
    ) -> HashMap<String, String>;

    async fn get_profile(&self) -> Option<Profile>;
}

/// In-memory store bundle, useful for tests and for embedding the daemon
/// without an external persistence layer.
#[derive(Default)]
pub struct InMemoryStores {
    templates: parking_lot::RwLock<HashMap<String, ServerTemplate>>,
    workspaces: parking_lot::RwLock<HashMap<String, WorkspaceConfig>>,
    app_secrets: parking_lot::RwLock<HashMap<String, String>>,
    server_secrets: parking_lot::RwLock<HashMap<String, HashMap<String, String>>>,
    workspace_secrets: parking_lot::RwLock<HashMap<(String, String), HashMap<String, String>>>,
    profile: parking_lot::RwLock<Option<Profile>>,
}

impl InMemoryStores {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_template(&self, template: ServerTemplate) {
        self.templates.write().insert(template.id.clone(), template);
    }

    pub fn set_profile(&self, profile: Profile) {
        *self.profile.write() = Some(profile);
    }

    pub fn set_server_secrets(&self, server_id: &str, secrets: HashMap<String, String>) {
        self.server_secrets
            .write()
            .insert(server_id.to_string(), secrets);
    }
}

#[async_trait]
impl ServerStore for InMemoryStores {
    async fn get(&self, id: &str) -> Option<ServerTemplate> {
        self.templates.read().get(id).cloned()
    }

    async fn get_all(&self) -> Vec<ServerTemplate> {
        self.templates.read().values().cloned().collect()
    }
}

#[async_trait]
impl WorkspaceStore for InMemoryStores {
    async fn get(&self, id: &str) -> Option<WorkspaceConfig> {
        if id == GLOBAL_WORKSPACE_ID {
            return Some(WorkspaceConfig {
                id: GLOBAL_WORKSPACE_ID.to_string(),
                label: "Global".to_string(),
                project_root: String::new(),
                auto_cleanup: false,
                server_configs: HashMap::new(),
            });
        }
        self.workspaces.read().get(id).cloned()
    }

    async fn find_by_project_root(&self, path: &str) -> Option<WorkspaceConfig> {
        self.workspaces
            .read()
            .values()
            .find(|w| w.project_root == path)
            .cloned()
    }

    async fn create(&self, workspace: WorkspaceConfig) {
        self.workspaces.write().insert(workspace.id.clone(), workspace);
    }

    async fn update(&self, workspace: WorkspaceConfig) {
        self.workspaces.write().insert(workspace.id.clone(), workspace);
    }

    async fn delete(&self, id: &str) {
        self.workspaces.write().remove(id);
    }

    async fn get_server_config(&self, workspace_id: &str, server_id: &str) -> Option<WorkspaceServerConfig> {
        self.workspaces
            .read()
            .get(workspace_id)
            .and_then(|w| w.server_configs.get(server_id).cloned())
    }

    async fn set_server_config(&self, workspace_id: &str, server_id: &str, config: WorkspaceServerConfig) {
        let mut workspaces = self.workspaces.write();
        if let Some(workspace) = workspaces.get_mut(workspace_id) {
            workspace
                .server_configs
                .insert(server_id.to_string(), config);
        }
    }
}

#[async_trait]
impl SecretStore for InMemoryStores {
    async fn get_secrets(
        &self,
        server_id: &str,
        scope: &str,
        workspace_id: Option<&str>,
    ) -> HashMap<String, String> {
        match scope {
            "app" => self.app_secrets.read().clone(),
            "server" => self
                .server_secrets
                .read()
                .get(server_id)
                .cloned()
                .unwrap_or_default(),
            "workspace" => {
                let Some(workspace_id) = workspace_id else {
                    return HashMap::new();
                };
                self.workspace_secrets
                    .read()
                    .get(&(server_id.to_string(), workspace_id.to_string()))
                    .cloned()
                    .unwrap_or_default()
            }
            _ => HashMap::new(),
        }
    }

    async fn get_profile(&self) -> Option<Profile> {
        self.profile.read().clone()
    }
}
