//! Environment builder and permission model.
//!
//! Merges parent environment, workspace context, configuration, and
//! secrets into the environment map handed to a child process, under a
//! per-server permission allowlist that gates what crosses the trust
//! boundary.

mod builder;
mod permissions;

pub use builder::{BuiltEnv, EnvBuilder, EnvInputs, SecretScopes, UserProfile};
pub use permissions::{
    ContextPermissions, EnvPermissions, SecretsMode, SecretsPermissions, ServerPermissions,
};
