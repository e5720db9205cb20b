//! Configuration structures and loading

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Main daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// Enable debug mode
    #[serde(default)]
    pub debug: bool,

    /// API server configuration
    #[serde(default)]
    pub api: ApiConfiguration,

    /// System paths and settings
    #[serde(default)]
    pub system: SystemConfiguration,

    /// Reverse-proxy gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfiguration,

    /// Session registry configuration
    #[serde(default)]
    pub sessions: SessionsConfiguration,
}

impl Configuration {
    /// Load configuration from a TOML file
    pub fn load(path: &str) -> Result<Self> {
        let config_path = std::path::Path::new(path);
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config: Configuration =
            toml::from_str(&content).with_context(|| "Failed to parse configuration")?;

        // Resolve relative paths based on the config file's parent directory
        // or current working directory if config file has no parent
        let base_dir = config_path
            .parent()
            .and_then(|p| if p.as_os_str().is_empty() { None } else { Some(p) })
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        config.system.resolve_paths(&base_dir);

        std::fs::create_dir_all(&config.system.root_directory)?;
        std::fs::create_dir_all(&config.system.data_directory)?;
        std::fs::create_dir_all(&config.system.tmp_directory)?;
        std::fs::create_dir_all(&config.system.log_directory)?;

        Ok(config)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            debug: false,
            api: ApiConfiguration::default(),
            system: SystemConfiguration::default(),
            gateway: GatewayConfiguration::default(),
            sessions: SessionsConfiguration::default(),
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfiguration {
    /// Host to bind to
    #[serde(default = "default_api_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfiguration {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

fn default_api_host() -> String {
    "127.0.0.1".into()
}

fn default_api_port() -> u16 {
    7890
}

/// System paths and the loopback port range handed to children.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfiguration {
    /// Root directory for all data
    #[serde(default = "default_root_directory")]
    pub root_directory: PathBuf,

    /// Directory for per-server working directories
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,

    /// Temporary directory
    #[serde(default = "default_tmp_directory")]
    pub tmp_directory: PathBuf,

    /// Log directory
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,

    /// Lowest loopback port handed to a supervised child
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,

    /// Highest loopback port handed to a supervised child
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,
}

impl Default for SystemConfiguration {
    fn default() -> Self {
        Self {
            root_directory: default_root_directory(),
            data_directory: default_data_directory(),
            tmp_directory: default_tmp_directory(),
            log_directory: default_log_directory(),
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
        }
    }
}

impl SystemConfiguration {
    /// Resolve all relative paths to absolute paths based on the given base directory.
    pub fn resolve_paths(&mut self, base_dir: &std::path::Path) {
        self.root_directory = Self::resolve_path(&self.root_directory, base_dir);
        self.data_directory = Self::resolve_path(&self.data_directory, base_dir);
        self.tmp_directory = Self::resolve_path(&self.tmp_directory, base_dir);
        self.log_directory = Self::resolve_path(&self.log_directory, base_dir);
    }

    fn resolve_path(path: &std::path::Path, base_dir: &std::path::Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            let resolved = base_dir.join(path);
            resolved
                .canonicalize()
                .unwrap_or_else(|_| Self::normalize_path(&resolved))
        }
    }

    /// Normalize a path by resolving `.` and `..` components without requiring the path to exist
    fn normalize_path(path: &std::path::Path) -> PathBuf {
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                std::path::Component::ParentDir => {
                    components.pop();
                }
                std::path::Component::CurDir => {}
                c => components.push(c),
            }
        }
        components.iter().collect()
    }
}

fn default_root_directory() -> PathBuf {
    PathBuf::from(".mcp-host")
}

fn default_data_directory() -> PathBuf {
    PathBuf::from(".mcp-host/workspaces")
}

fn default_tmp_directory() -> PathBuf {
    PathBuf::from(".mcp-host/tmp")
}

fn default_log_directory() -> PathBuf {
    PathBuf::from(".mcp-host/logs")
}

fn default_port_range_start() -> u16 {
    4100
}

fn default_port_range_end() -> u16 {
    4999
}

/// Reverse-proxy gateway policy knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfiguration {
    /// If true, a proxied request to a stopped instance starts it on demand.
    /// If false, the gateway returns 503 instead of spawning anything.
    #[serde(default = "default_lazy_start")]
    pub lazy_start: bool,

    /// If true, `workspaceId` is ignored for instance routing and every
    /// request shares the single global instance of a server.
    #[serde(default)]
    pub route_instances_globally: bool,

    /// Path appended to the child's base URL when proxying, e.g. `/mcp`.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
}

impl Default for GatewayConfiguration {
    fn default() -> Self {
        Self {
            lazy_start: default_lazy_start(),
            route_instances_globally: false,
            path_prefix: default_path_prefix(),
        }
    }
}

fn default_lazy_start() -> bool {
    true
}

fn default_path_prefix() -> String {
    "/mcp".into()
}

/// Session sweep/expiry knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfiguration {
    /// How often the sweeper scans for expired sessions, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// A session with no ping/connect activity for this long is expired.
    #[serde(default = "default_expiry_secs")]
    pub expiry_secs: u64,
}

impl Default for SessionsConfiguration {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            expiry_secs: default_expiry_secs(),
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    15
}

fn default_expiry_secs() -> u64 {
    40
}
