//! Builds the environment map handed to a spawned child.

use std::collections::HashMap;

use serde_json::Value;

use super::permissions::ServerPermissions;

/// Secrets looked up at each scope, in ascending precedence order
/// (later scopes win on key collision).
#[derive(Debug, Clone, Default)]
pub struct SecretScopes {
    pub app_global: HashMap<String, String>,
    pub server_global: HashMap<String, String>,
    pub server_workspace: HashMap<String, String>,
}

impl SecretScopes {
    fn merged(&self) -> HashMap<String, String> {
        let mut out = self.app_global.clone();
        out.extend(self.server_global.clone());
        out.extend(self.server_workspace.clone());
        out
    }
}

/// A user identity profile, injected as an opaque token when permitted.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UserProfile {
    pub email: String,
    pub full_name: String,
}

/// Everything [`EnvBuilder::build`] needs to construct one child's
/// environment. The core performs no I/O itself; all of these values are
/// supplied by the caller, which has already consulted the external
/// stores.
pub struct EnvInputs<'a> {
    pub server_id: &'a str,
    pub workspace_id: &'a str,
    pub port: u16,
    pub path_prefix: &'a str,
    pub parent_env: &'a HashMap<String, String>,
    pub project_root: Option<&'a str>,
    pub default_config: &'a Value,
    pub config_override: Option<&'a Value>,
    pub permissions: &'a ServerPermissions,
    pub secrets: &'a SecretScopes,
    pub user_profile: Option<&'a UserProfile>,
}

/// Built child environment, plus bookkeeping of which keys carry secret
/// values so logging paths can redact them.
pub struct BuiltEnv {
    pub vars: HashMap<String, String>,
    secret_keys: std::collections::HashSet<String>,
}

impl BuiltEnv {
    /// A copy of `vars` with every secret value replaced, safe to log.
    pub fn redacted(&self) -> HashMap<String, String> {
        self.vars
            .iter()
            .map(|(k, v)| {
                if self.secret_keys.contains(k) {
                    (k.clone(), "***".to_string())
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect()
    }
}

/// Merges parent environment, control variables, config, and secrets into
/// a single environment map for a spawned child, honoring the permission
/// policy in effect.
pub struct EnvBuilder;

impl EnvBuilder {
    /// Deep-merge `override_` onto `base`, objects merged key-by-key,
    /// any other type (including arrays) replaced wholesale.
    pub fn merge_config(base: &Value, override_: Option<&Value>) -> Value {
        let Some(override_) = override_ else {
            return base.clone();
        };
        match (base, override_) {
            (Value::Object(base_map), Value::Object(over_map)) => {
                let mut merged = base_map.clone();
                for (k, v) in over_map {
                    let merged_value = match merged.get(k) {
                        Some(existing) => Self::merge_config(existing, Some(v)),
                        None => v.clone(),
                    };
                    merged.insert(k.clone(), merged_value);
                }
                Value::Object(merged)
            }
            _ => override_.clone(),
        }
    }

    pub fn build(inputs: EnvInputs<'_>) -> BuiltEnv {
        let mut vars = HashMap::new();
        let mut secret_keys = std::collections::HashSet::new();

        // 1. Filtered parent env.
        for (name, value) in inputs.parent_env {
            if inputs.permissions.env.allows(name) {
                vars.insert(name.clone(), value.clone());
            }
        }

        // 2. Fixed control variables.
        vars.insert("PORT".to_string(), inputs.port.to_string());
        vars.insert("HOST".to_string(), "127.0.0.1".to_string());
        vars.insert("PATH_PREFIX".to_string(), inputs.path_prefix.to_string());
        vars.insert("SERVER_ID".to_string(), inputs.server_id.to_string());
        if inputs.permissions.context.allow_workspace_id {
            vars.insert("WORKSPACE_ID".to_string(), inputs.workspace_id.to_string());
        }
        if inputs.permissions.context.allow_project_root {
            if let Some(root) = inputs.project_root {
                vars.insert("PROJECT_ROOT".to_string(), root.to_string());
            }
        }

        // 3. CONFIG = JSON-encoded merge(defaultConfig, configOverride).
        let merged_config = Self::merge_config(inputs.default_config, inputs.config_override);
        vars.insert(
            "CONFIG".to_string(),
            serde_json::to_string(&merged_config).unwrap_or_else(|_| "{}".to_string()),
        );

        // 4. Secrets, selected by policy, app-global < server-global <
        //    server-workspace precedence.
        let merged_secrets = inputs.secrets.merged();
        for (key, value) in merged_secrets {
            if inputs.permissions.secrets.allows(&key) {
                secret_keys.insert(key.clone());
                vars.insert(key, value);
            }
        }

        // 5. Identity token.
        if inputs.permissions.context.allow_user_profile {
            if let Some(profile) = inputs.user_profile {
                if let Ok(token) = serde_json::to_string(profile) {
                    vars.insert("IDENTITY_TOKEN".to_string(), token);
                }
            }
        }

        BuiltEnv { vars, secret_keys }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{ContextPermissions, EnvPermissions, SecretsMode, SecretsPermissions};
    use serde_json::json;

    fn permissions() -> ServerPermissions {
        ServerPermissions {
            env: EnvPermissions::secure_default(),
            context: ContextPermissions::secure_default(),
            secrets: SecretsPermissions {
                mode: SecretsMode::Allowlist,
                allowlist: vec!["API_KEY".to_string()],
            },
        }
    }

    #[test]
    fn scopes_home_out_when_disallowed() {
        let mut parent = HashMap::new();
        parent.insert("HOME".to_string(), "/root".to_string());
        parent.insert("PATH".to_string(), "/usr/bin".to_string());

        let perms = permissions();
        let secrets = SecretScopes::default();
        let built = EnvBuilder::build(EnvInputs {
            server_id: "s1",
            workspace_id: "global",
            port: 4100,
            path_prefix: "/mcp",
            parent_env: &parent,
            project_root: None,
            default_config: &json!({}),
            config_override: None,
            permissions: &perms,
            secrets: &secrets,
            user_profile: None,
        });

        assert!(!built.vars.contains_key("HOME"));
        assert_eq!(built.vars.get("PATH"), Some(&"/usr/bin".to_string()));
    }

    #[test]
    fn secrets_mode_none_excludes_all_keys() {
        let mut perms = permissions();
        perms.secrets = SecretsPermissions::secure_default();
        let mut scopes = SecretScopes::default();
        scopes
            .server_global
            .insert("API_KEY".to_string(), "shh".to_string());

        let built = EnvBuilder::build(EnvInputs {
            server_id: "s1",
            workspace_id: "global",
            port: 4100,
            path_prefix: "/mcp",
            parent_env: &HashMap::new(),
            project_root: None,
            default_config: &json!({}),
            config_override: None,
            permissions: &perms,
            secrets: &scopes,
            user_profile: None,
        });

        assert!(!built.vars.contains_key("API_KEY"));
    }

    #[test]
    fn secrets_allowlist_admits_listed_key_with_workspace_precedence() {
        let perms = permissions();
        let mut scopes = SecretScopes::default();
        scopes
            .server_global
            .insert("API_KEY".to_string(), "global-value".to_string());
        scopes
            .server_workspace
            .insert("API_KEY".to_string(), "workspace-value".to_string());

        let built = EnvBuilder::build(EnvInputs {
            server_id: "s1",
            workspace_id: "w1",
            port: 4100,
            path_prefix: "/mcp",
            parent_env: &HashMap::new(),
            project_root: None,
            default_config: &json!({}),
            config_override: None,
            permissions: &perms,
            secrets: &scopes,
            user_profile: None,
        });

        assert_eq!(
            built.vars.get("API_KEY"),
            Some(&"workspace-value".to_string())
        );
        assert_eq!(built.redacted().get("API_KEY"), Some(&"***".to_string()));
    }

    #[test]
    fn config_merge_overrides_nested_keys() {
        let base = json!({"a": 1, "nested": {"x": 1, "y": 2}});
        let over = json!({"nested": {"y": 9}});
        let merged = EnvBuilder::merge_config(&base, Some(&over));
        assert_eq!(merged, json!({"a": 1, "nested": {"x": 1, "y": 9}}));
    }
}
