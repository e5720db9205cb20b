//! MCP Host Daemon
//!
//! A local control-plane host: supervises MCP server subprocesses per
//! `(serverId, workspaceId)` pair and reverse-proxies HTTP clients to them
//! through a stable path, so callers never see raw child ports.

pub mod cmd;
pub mod config;
pub mod env;
pub mod error;
pub mod events;
pub mod gateway;
pub mod port;
pub mod router;
pub mod sessions;
pub mod stores;
pub mod supervisor;
pub mod system;

pub use config::Configuration;
pub use error::DaemonError;
pub use events::EventBus;
pub use gateway::Gateway;
pub use sessions::SessionRegistry;
pub use supervisor::ProcessSupervisor;
