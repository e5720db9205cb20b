//! Resolves an [`InstallSpec`] into launch argv.
//!
//! Package-runner metadata lookups (npm registry reads) are an external
//! collaborator; this module is the "resolve install spec -> launch argv"
//! step, implemented directly since it needs no registry I/O of its own.

use crate::stores::InstallSpec;

/// A resolved program + argv, ready to hand to `Command::new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchArgv {
    pub program: String,
    pub args: Vec<String>,
}

fn package_spec(package: &str, version: Option<&str>) -> String {
    match version {
        Some(v) => format!("{package}@{v}"),
        None => package.to_string(),
    }
}

pub fn resolve_launch(install: &InstallSpec) -> LaunchArgv {
    match install {
        InstallSpec::Npx { package, version } => LaunchArgv {
            program: "npx".to_string(),
            args: vec!["-y".to_string(), package_spec(package, version.as_deref())],
        },
        InstallSpec::Pnpx { package, version } => LaunchArgv {
            program: "pnpx".to_string(),
            args: vec![package_spec(package, version.as_deref())],
        },
        InstallSpec::Yarn { package, version } => LaunchArgv {
            program: "yarn".to_string(),
            args: vec!["dlx".to_string(), package_spec(package, version.as_deref())],
        },
        InstallSpec::Bunx { package, version } => LaunchArgv {
            program: "bunx".to_string(),
            args: vec![package_spec(package, version.as_deref())],
        },
        InstallSpec::Local { local_path } => LaunchArgv {
            program: local_path.clone(),
            args: Vec::new(),
        },
        InstallSpec::Installed { entry_point } => {
            if entry_point.ends_with(".js")
                || entry_point.ends_with(".mjs")
                || entry_point.ends_with(".cjs")
            {
                LaunchArgv {
                    program: "node".to_string(),
                    args: vec![entry_point.clone()],
                }
            } else {
                LaunchArgv {
                    program: entry_point.clone(),
                    args: Vec::new(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn npx_with_version_pins_package_spec() {
        let argv = resolve_launch(&InstallSpec::Npx {
            package: "@modelcontextprotocol/server-foo".to_string(),
            version: Some("1.2.3".to_string()),
        });
        assert_eq!(argv.program, "npx");
        assert_eq!(
            argv.args,
            vec!["-y", "@modelcontextprotocol/server-foo@1.2.3"]
        );
    }

    #[test]
    fn installed_js_entry_point_runs_under_node() {
        let argv = resolve_launch(&InstallSpec::Installed {
            entry_point: "/opt/servers/foo/index.js".to_string(),
        });
        assert_eq!(argv.program, "node");
        assert_eq!(argv.args, vec!["/opt/servers/foo/index.js"]);
    }

    #[test]
    fn local_path_executed_directly() {
        let argv = resolve_launch(&InstallSpec::Local {
            local_path: "/opt/servers/foo/run.sh".to_string(),
        });
        assert_eq!(argv.program, "/opt/servers/foo/run.sh");
        assert!(argv.args.is_empty());
    }
}
