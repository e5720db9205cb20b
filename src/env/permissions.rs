//! The three-part (env / context / secrets) permission allowlist.

use serde::{Deserialize, Serialize};

/// Categorical parent-environment allowlist.
///
/// Each flag maps to a fixed, documented name set; anything not matched by
/// one of these (or `custom_allowlist`) is dropped from the child's
/// environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvPermissions {
    #[serde(default)]
    pub allow_path: bool,
    #[serde(default)]
    pub allow_home: bool,
    #[serde(default)]
    pub allow_lang: bool,
    #[serde(default)]
    pub allow_temp: bool,
    #[serde(default)]
    pub allow_runtime: bool,
    #[serde(default)]
    pub custom_allowlist: Vec<String>,
}

impl EnvPermissions {
    /// PATH only, per the "secure default" in the design notes.
    pub fn secure_default() -> Self {
        Self {
            allow_path: true,
            allow_home: false,
            allow_lang: false,
            allow_temp: false,
            allow_runtime: false,
            custom_allowlist: Vec::new(),
        }
    }

    /// Unrestricted: every parent env var crosses the boundary. Used only
    /// for templates with no `permissions` object (legacy migration mode).
    pub fn unrestricted() -> Self {
        Self {
            allow_path: true,
            allow_home: true,
            allow_lang: true,
            allow_temp: true,
            allow_runtime: true,
            custom_allowlist: Vec::new(),
        }
    }

    const PATH_NAMES: &'static [&'static str] = &["PATH", "PATHEXT"];
    const HOME_NAMES: &'static [&'static str] = &["HOME", "USERPROFILE", "HOMEPATH"];
    const TEMP_NAMES: &'static [&'static str] = &["TEMP", "TMP", "TMPDIR"];
    const RUNTIME_PREFIXES: &'static [&'static str] =
        &["NODE_", "NPM_", "PNPM_", "YARN_", "BUN_", "COREPACK_"];

    /// Whether `name` is allowed across the boundary under this policy.
    /// `unrestricted` (no global permissions object) is handled by callers
    /// returning [`EnvPermissions::unrestricted`] rather than by a special
    /// case here.
    pub fn allows(&self, name: &str) -> bool {
        if self.allow_path && Self::PATH_NAMES.contains(&name) {
            return true;
        }
        if self.allow_home && Self::HOME_NAMES.contains(&name) {
            return true;
        }
        if self.allow_lang && (name == "LANG" || name == "LANGUAGE" || name.starts_with("LC_")) {
            return true;
        }
        if self.allow_temp && Self::TEMP_NAMES.contains(&name) {
            return true;
        }
        if self.allow_runtime && Self::RUNTIME_PREFIXES.iter().any(|p| name.starts_with(p)) {
            return true;
        }
        self.custom_allowlist.iter().any(|n| n == name)
    }
}

/// Gates the injected context variables `PROJECT_ROOT`, `WORKSPACE_ID`, and
/// the identity token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPermissions {
    #[serde(default)]
    pub allow_project_root: bool,
    #[serde(default)]
    pub allow_workspace_id: bool,
    #[serde(default)]
    pub allow_user_profile: bool,
}

impl ContextPermissions {
    pub fn secure_default() -> Self {
        Self {
            allow_project_root: true,
            allow_workspace_id: true,
            allow_user_profile: true,
        }
    }

    pub fn unrestricted() -> Self {
        Self::secure_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretsMode {
    None,
    Allowlist,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsPermissions {
    #[serde(default = "default_secrets_mode")]
    pub mode: SecretsMode,
    #[serde(default)]
    pub allowlist: Vec<String>,
}

fn default_secrets_mode() -> SecretsMode {
    SecretsMode::None
}

impl SecretsPermissions {
    pub fn secure_default() -> Self {
        Self {
            mode: SecretsMode::None,
            allowlist: Vec::new(),
        }
    }

    pub fn unrestricted() -> Self {
        Self {
            mode: SecretsMode::All,
            allowlist: Vec::new(),
        }
    }

    pub fn allows(&self, key: &str) -> bool {
        match self.mode {
            SecretsMode::None => false,
            SecretsMode::All => true,
            SecretsMode::Allowlist => self.allowlist.iter().any(|k| k == key),
        }
    }
}

/// The full permission policy for a server template, optionally narrowed
/// per workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerPermissions {
    pub env: EnvPermissions,
    pub context: ContextPermissions,
    pub secrets: SecretsPermissions,
}

impl ServerPermissions {
    /// The "new install" secure default: PATH only, no secrets, full
    /// context.
    pub fn secure_default() -> Self {
        Self {
            env: EnvPermissions::secure_default(),
            context: ContextPermissions::secure_default(),
            secrets: SecretsPermissions::secure_default(),
        }
    }

    /// Legacy migration compromise: a template with no `permissions`
    /// object at all permits everything.
    pub fn unrestricted() -> Self {
        Self {
            env: EnvPermissions::unrestricted(),
            context: ContextPermissions::unrestricted(),
            secrets: SecretsPermissions::unrestricted(),
        }
    }

    /// Merge a per-workspace override over this (global) policy. Missing
    /// sub-objects in `over` inherit wholesale from `self`.
    pub fn merge(&self, over: Option<&ServerPermissionsOverride>) -> ServerPermissions {
        let Some(over) = over else {
            return self.clone();
        };
        ServerPermissions {
            env: over.env.clone().unwrap_or_else(|| self.env.clone()),
            context: over.context.clone().unwrap_or_else(|| self.context.clone()),
            secrets: over.secrets.clone().unwrap_or_else(|| self.secrets.clone()),
        }
    }
}

/// A workspace-level permission override. Each field is independently
/// optional; an absent field inherits the server-global value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerPermissionsOverride {
    #[serde(default)]
    pub env: Option<EnvPermissions>,
    #[serde(default)]
    pub context: Option<ContextPermissions>,
    #[serde(default)]
    pub secrets: Option<SecretsPermissions>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_permissions_scope_home() {
        let perms = EnvPermissions::secure_default();
        assert!(!perms.allows("HOME"));
        assert!(perms.allows("PATH"));
    }

    #[test]
    fn secrets_mode_allowlist_scopes_keys() {
        let perms = SecretsPermissions {
            mode: SecretsMode::Allowlist,
            allowlist: vec!["API_KEY".to_string()],
        };
        assert!(perms.allows("API_KEY"));
        assert!(!perms.allows("OTHER_KEY"));
    }

    #[test]
    fn override_merge_inherits_missing_fields() {
        let global = ServerPermissions::secure_default();
        let over = ServerPermissionsOverride {
            env: Some(EnvPermissions::unrestricted()),
            context: None,
            secrets: None,
        };
        let merged = global.merge(Some(&over));
        assert!(merged.env.allow_home);
        assert_eq!(merged.secrets.mode, SecretsMode::None);
    }
}
