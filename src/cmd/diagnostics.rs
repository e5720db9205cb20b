//! Diagnostics command - environment self-check (port range, disk paths).

use anyhow::Result;
use sysinfo::System;

use crate::config::Configuration;
use crate::port::PortAllocator;

/// Run diagnostics and display system + configuration self-check information.
pub async fn run(config_path: &str) -> Result<()> {
    println!("MCP Host Daemon Diagnostics");
    println!("===========================\n");

    println!("System Information:");
    println!("-------------------");
    let mut sys = System::new_all();
    sys.refresh_all();
    println!("  OS: {} {}", System::name().unwrap_or_default(), System::os_version().unwrap_or_default());
    println!("  Kernel: {}", System::kernel_version().unwrap_or_default());
    println!("  Hostname: {}", System::host_name().unwrap_or_default());
    println!("  CPUs: {}", sys.cpus().len());
    println!("  Total Memory: {} MB", sys.total_memory() / 1024 / 1024);
    println!("  Used Memory: {} MB", sys.used_memory() / 1024 / 1024);
    println!("  Uptime: {} seconds", System::uptime());

    println!("\nConfiguration:");
    println!("--------------");
    match Configuration::load(config_path) {
        Ok(config) => {
            println!("  Loaded from: {}", config_path);
            println!("  API bind: {}:{}", config.api.host, config.api.port);
            println!(
                "  Port range: [{}, {}]",
                config.system.port_range_start, config.system.port_range_end
            );
            println!("  Root directory: {}", config.system.root_directory.display());
            println!(
                "  Gateway: lazy_start={} route_instances_globally={}",
                config.gateway.lazy_start, config.gateway.route_instances_globally
            );

            println!("\nPort Range Probe:");
            println!("-----------------");
            let allocator =
                PortAllocator::with_range(config.system.port_range_start, config.system.port_range_end);
            match allocator.allocate("diagnostics-probe") {
                Ok(port) => {
                    println!("  Bound a loopback probe port successfully: {}", port);
                    allocator.release("diagnostics-probe");
                }
                Err(e) => println!("  Failed to bind any port in range: {}", e),
            }

            println!("\nDisk Paths:");
            println!("-----------");
            for (label, path) in [
                ("root_directory", &config.system.root_directory),
                ("data_directory", &config.system.data_directory),
                ("tmp_directory", &config.system.tmp_directory),
                ("log_directory", &config.system.log_directory),
            ] {
                let status = if path.exists() { "exists" } else { "missing" };
                println!("  {}: {} ({})", label, path.display(), status);
            }
        }
        Err(e) => {
            println!("  Failed to load {}: {}", config_path, e);
        }
    }

    println!("\nDiagnostics complete.");
    Ok(())
}
