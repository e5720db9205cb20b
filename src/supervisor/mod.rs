//! Process lifecycle management: start, stop, restart, crash-loop recovery.

mod install;
mod instance;
#[allow(clippy::module_inception)]
mod supervisor;

pub use install::{resolve_launch, LaunchArgv};
pub use instance::{instance_key, InstanceStatus, ServerInstance, StartError};
pub use supervisor::{ProcessSupervisor, SupervisorConfig};
