//! Interactive config scaffold: writes a starter `config.toml`.

use std::io::Write;

use anyhow::{bail, Context, Result};

use crate::config::Configuration;

/// Write a default configuration to `path`, refusing to clobber an existing
/// file unless the caller confirms on stdin.
pub async fn run(path: &str) -> Result<()> {
    let target = std::path::Path::new(path);
    if target.exists() {
        print!("{} already exists. Overwrite? [y/N] ", path);
        std::io::stdout().flush().ok();
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer).context("reading confirmation")?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            bail!("aborted, {} left untouched", path);
        }
    }

    let defaults = Configuration::default();
    let rendered = toml::to_string_pretty(&ScaffoldView::from(&defaults))
        .context("rendering default configuration")?;
    std::fs::write(target, rendered).with_context(|| format!("writing {}", path))?;

    println!("Wrote default configuration to {}", path);
    println!("Edit api.host/api.port and system.root_directory, then run without a subcommand to start the daemon.");
    Ok(())
}

/// A serializable mirror of [`Configuration`]'s defaults, since `Configuration`
/// only derives `Deserialize` (it is read, never round-tripped) and this
/// command is the one place that needs to write one back out.
#[derive(serde::Serialize)]
struct ScaffoldView {
    debug: bool,
    api: ApiView,
    system: SystemView,
    gateway: GatewayView,
    sessions: SessionsView,
}

#[derive(serde::Serialize)]
struct ApiView {
    host: String,
    port: u16,
}

#[derive(serde::Serialize)]
struct SystemView {
    root_directory: std::path::PathBuf,
    data_directory: std::path::PathBuf,
    tmp_directory: std::path::PathBuf,
    log_directory: std::path::PathBuf,
    port_range_start: u16,
    port_range_end: u16,
}

#[derive(serde::Serialize)]
struct GatewayView {
    lazy_start: bool,
    route_instances_globally: bool,
    path_prefix: String,
}

#[derive(serde::Serialize)]
struct SessionsView {
    sweep_interval_secs: u64,
    expiry_secs: u64,
}

impl From<&Configuration> for ScaffoldView {
    fn from(c: &Configuration) -> Self {
        Self {
            debug: c.debug,
            api: ApiView {
                host: c.api.host.clone(),
                port: c.api.port,
            },
            system: SystemView {
                root_directory: c.system.root_directory.clone(),
                data_directory: c.system.data_directory.clone(),
                tmp_directory: c.system.tmp_directory.clone(),
                log_directory: c.system.log_directory.clone(),
                port_range_start: c.system.port_range_start,
                port_range_end: c.system.port_range_end,
            },
            gateway: GatewayView {
                lazy_start: c.gateway.lazy_start,
                route_instances_globally: c.gateway.route_instances_globally,
                path_prefix: c.gateway.path_prefix.clone(),
            },
            sessions: SessionsView {
                sweep_interval_secs: c.sessions.sweep_interval_secs,
                expiry_secs: c.sessions.expiry_secs,
            },
        }
    }
}
