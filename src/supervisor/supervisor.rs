//! The core state machine: spawn, health-wait, monitor, restart-with-backoff,
//! graceful stop, tree-kill.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex as SyncMutex, RwLock};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::env::{EnvBuilder, EnvInputs, SecretScopes, ServerPermissions, UserProfile};
use crate::events::{EventBus, LogLevel, ServerEvent, ServerEventKind};
use crate::port::PortAllocator;
use crate::stores::{SecretStore, ServerStore, ServerTemplate, WorkspaceStore, GLOBAL_WORKSPACE_ID};
use crate::system::Locker;

use super::install::resolve_launch;
use super::instance::{instance_key, InstanceStatus, ServerInstance, StartError};

/// Health-wait budget: at most `HEALTH_ATTEMPTS` polls, `HEALTH_INTERVAL`
/// apart, each with its own `HEALTH_REQUEST_TIMEOUT`.
const HEALTH_ATTEMPTS: u32 = 30;
const HEALTH_INTERVAL: Duration = Duration::from_secs(1);
const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Graceful-stop window before escalating to a kill.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Crash-budget window and limit.
const CRASH_WINDOW: Duration = Duration::from_secs(5 * 60);
const CRASH_LIMIT: u32 = 3;

/// An instance must stay `running` at least this long before one of its
/// crashes is treated as "recovered" rather than counted toward the
/// restart budget. Without this, a child that crashes immediately after
/// every health-passing restart would never hit the budget.
const MIN_RUNTIME_FOR_CRASH: Duration = Duration::from_secs(10);

const DEFAULT_PATH_PREFIX: &str = "/mcp";

/// Deployment-level policy knobs for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Force every instance onto the `"global"` workspace regardless of
    /// the workspace the caller supplied. Default `false` — workspace-
    /// scoped instances.
    pub route_instances_globally: bool,
    pub path_prefix: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            route_instances_globally: false,
            path_prefix: DEFAULT_PATH_PREFIX.to_string(),
        }
    }
}

/// The mutable, internally-tracked record backing one `ServerInstance`.
struct Tracked {
    data: RwLock<ServerInstance>,
    stopping: AtomicBool,
    first_start_at: SyncMutex<Instant>,
    /// Set when the instance enters `running`, cleared and consulted when
    /// it next exits, to gate the restart-budget reset on having stayed up
    /// a minimum amount of time.
    running_since: SyncMutex<Option<Instant>>,
    restart_attempts: AtomicU32,
    /// Fired whenever `status` transitions, so `start()` callers blocked on
    /// a `starting` instance can recheck.
    transitioned: Notify,
    /// Fired the moment the child's `wait()` resolves, used by `stop()` to
    /// detect exit without owning the `Child` itself.
    exited: Notify,
}

impl Tracked {
    fn new(server_id: &str, workspace_id: &str, restart_attempts: u32, first_start_at: Instant) -> Arc<Self> {
        Arc::new(Self {
            data: RwLock::new(ServerInstance::new_starting(server_id, workspace_id, restart_attempts)),
            stopping: AtomicBool::new(false),
            first_start_at: SyncMutex::new(first_start_at),
            running_since: SyncMutex::new(None),
            restart_attempts: AtomicU32::new(restart_attempts),
            transitioned: Notify::new(),
            exited: Notify::new(),
        })
    }

    fn snapshot(&self) -> ServerInstance {
        self.data.read().clone()
    }

    fn status(&self) -> InstanceStatus {
        self.data.read().status
    }

    fn set_starting(&self) {
        self.data.write().status = InstanceStatus::Starting;
        self.transitioned.notify_waiters();
    }

    fn set_pid(&self, pid: Option<u32>) {
        self.data.write().pid = pid;
    }

    fn pid(&self) -> Option<u32> {
        self.data.read().pid
    }

    fn set_running(&self, port: u16, tools: Option<u64>, resources: Option<u64>, prompts: Option<u64>) {
        let mut data = self.data.write();
        data.status = InstanceStatus::Running;
        data.port = Some(port);
        data.last_error = None;
        data.tools_count = tools;
        data.resources_count = resources;
        data.prompts_count = prompts;
        drop(data);
        // Does NOT reset the restart budget here: a crash right after this
        // health pass must still count. The budget only resets once the
        // instance has proven itself by staying up `MIN_RUNTIME_FOR_CRASH`,
        // checked in `handle_unintentional_exit` via `take_running_since`.
        *self.running_since.lock() = Some(Instant::now());
        self.transitioned.notify_waiters();
    }

    /// Takes (and clears) the running-since timestamp set by the most
    /// recent `set_running`, so the caller can measure how long the
    /// instance actually stayed up before this exit.
    fn take_running_since(&self) -> Option<Instant> {
        self.running_since.lock().take()
    }

    fn restart_attempts(&self) -> u32 {
        self.restart_attempts.load(Ordering::SeqCst)
    }

    fn set_error(&self, message: String) {
        let mut data = self.data.write();
        data.status = InstanceStatus::Error;
        data.last_error = Some(message);
        data.port = None;
        drop(data);
        self.transitioned.notify_waiters();
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn set_stopping(&self, value: bool) {
        self.stopping.store(value, Ordering::SeqCst);
    }

    fn first_start_at(&self) -> Instant {
        *self.first_start_at.lock()
    }

    fn reset_restart_window(&self, now: Instant) {
        *self.first_start_at.lock() = now;
        self.restart_attempts.store(0, Ordering::SeqCst);
        self.data.write().restart_attempts = 0;
    }

    fn increment_restart_attempts(&self) -> u32 {
        let attempts = self.restart_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.data.write().restart_attempts = attempts;
        attempts
    }

    /// Waits, re-checking in a loop, until the instance leaves `Starting`.
    async fn wait_until_settled(&self) {
        loop {
            let notified = self.transitioned.notified();
            if self.status() != InstanceStatus::Starting {
                return;
            }
            notified.await;
        }
    }

    async fn wait_exited(&self) {
        self.exited.notified().await;
    }
}

/// Per-instance spawn inputs, threaded through the dedup/restart paths.
#[derive(Clone)]
struct StartRequest {
    server_id: String,
    workspace_id: String,
    project_root: Option<String>,
    config_override: Option<Value>,
}

/// The process supervisor: the keyed store of `(serverId, workspaceId)` ->
/// child process, and the state machine that drives it.
pub struct ProcessSupervisor {
    instances: DashMap<String, Arc<Tracked>>,
    /// Per-key start/stop mutual exclusion, so a `start` and a `stop` for
    /// the same instance never interleave.
    locks: DashMap<String, Arc<Locker>>,
    port_allocator: Arc<PortAllocator>,
    event_bus: EventBus,
    server_store: Arc<dyn ServerStore>,
    workspace_store: Arc<dyn WorkspaceStore>,
    secret_store: Arc<dyn SecretStore>,
    health_client: reqwest::Client,
    config: SupervisorConfig,
}

impl ProcessSupervisor {
    pub fn new(
        server_store: Arc<dyn ServerStore>,
        workspace_store: Arc<dyn WorkspaceStore>,
        secret_store: Arc<dyn SecretStore>,
        event_bus: EventBus,
        port_allocator: Arc<PortAllocator>,
        config: SupervisorConfig,
    ) -> Arc<Self> {
        let health_client = reqwest::Client::builder()
            .timeout(HEALTH_REQUEST_TIMEOUT)
            .build()
            .expect("health client builds");

        Arc::new(Self {
            instances: DashMap::new(),
            locks: DashMap::new(),
            port_allocator,
            event_bus,
            server_store,
            workspace_store,
            secret_store,
            health_client,
            config,
        })
    }

    fn lock_for(&self, key: &str) -> Arc<Locker> {
        self.locks.entry(key.to_string()).or_insert_with(|| Arc::new(Locker::new())).clone()
    }

    fn resolve_workspace(&self, workspace_id: &str) -> String {
        if self.config.route_instances_globally {
            GLOBAL_WORKSPACE_ID.to_string()
        } else {
            workspace_id.to_string()
        }
    }

    pub fn get(&self, server_id: &str, workspace_id: &str) -> Option<ServerInstance> {
        let key = instance_key(server_id, &self.resolve_workspace(workspace_id));
        self.instances.get(&key).map(|t| t.snapshot())
    }

    pub fn all(&self) -> Vec<ServerInstance> {
        self.instances.iter().map(|e| e.snapshot()).collect()
    }

    /// Idempotent start. Returns the running instance if one already
    /// exists, waits for an in-flight start rather than spawning a second,
    /// and replaces a terminal (`stopped`/`error`) record.
    pub async fn start(
        self: &Arc<Self>,
        server_id: &str,
        workspace_id: &str,
        project_root: Option<String>,
        config_override: Option<Value>,
    ) -> Result<ServerInstance, StartError> {
        let workspace_id = self.resolve_workspace(workspace_id);
        let key = instance_key(server_id, &workspace_id);
        let lock = self.lock_for(&key);
        let _guard = lock.acquire().await.expect("instance locker is never closed");

        let template = self
            .server_store
            .get(server_id)
            .await
            .ok_or_else(|| StartError::TemplateNotFound(server_id.to_string()))?;

        let tracked = loop {
            let existing = self.instances.get(&key).map(|e| e.clone());
            match existing {
                None => break Tracked::new(server_id, &workspace_id, 0, Instant::now()),
                Some(tracked) => match tracked.status() {
                    InstanceStatus::Running => return Ok(tracked.snapshot()),
                    InstanceStatus::Starting => {
                        tracked.wait_until_settled().await;
                        continue;
                    }
                    InstanceStatus::Stopped | InstanceStatus::Error => {
                        let attempts = tracked.restart_attempts();
                        let first_start = tracked.first_start_at();
                        self.instances.remove(&key);
                        break Tracked::new(server_id, &workspace_id, attempts, first_start);
                    }
                },
            }
        };

        self.instances.insert(key.clone(), tracked.clone());
        let request = StartRequest {
            server_id: server_id.to_string(),
            workspace_id: workspace_id.clone(),
            project_root,
            config_override,
        };

        match self.attempt_start(template, tracked.clone(), request).await {
            Ok(()) => {
                tracked.transitioned.notify_waiters();
                Ok(tracked.snapshot())
            }
            Err(e) => {
                tracked.transitioned.notify_waiters();
                self.instances.remove(&key);
                Err(e)
            }
        }
    }

    /// Performs steps 2-10 of the start algorithm against an already
    /// `starting` tracked record. Shared by fresh starts and the
    /// auto-restart subroutine (which reuses the same record in place).
    async fn attempt_start(
        self: &Arc<Self>,
        template: ServerTemplate,
        tracked: Arc<Tracked>,
        request: StartRequest,
    ) -> Result<(), StartError> {
        let key = instance_key(&request.server_id, &request.workspace_id);
        tracked.set_starting();
        self.event_bus.emit_server(ServerEvent {
            kind: ServerEventKind::Starting,
            server_id: request.server_id.clone(),
            workspace_id: request.workspace_id.clone(),
            timestamp: chrono::Utc::now(),
            port: None,
            error: None,
            message: None,
            level: None,
        });

        let argv = resolve_launch(&template.install);

        let workspace_cfg = self
            .workspace_store
            .get_server_config(&request.workspace_id, &request.server_id)
            .await
            .unwrap_or_default();

        let effective_permissions: ServerPermissions = template
            .effective_permissions()
            .merge(workspace_cfg.permissions_override.as_ref());

        let combined_override = match (&workspace_cfg.config_override, &request.config_override) {
            (Some(a), Some(b)) => Some(EnvBuilder::merge_config(a, Some(b))),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        };

        let port = match self.port_allocator.allocate(&key) {
            Ok(port) => port,
            Err(_) => {
                tracked.set_error("No port available".to_string());
                self.event_bus.emit_server(ServerEvent {
                    kind: ServerEventKind::Error,
                    server_id: request.server_id.clone(),
                    workspace_id: request.workspace_id.clone(),
                    timestamp: chrono::Utc::now(),
                    port: None,
                    error: Some("No port available".to_string()),
                    message: None,
                    level: None,
                });
                return Err(StartError::NoPortAvailable);
            }
        };

        let secrets = SecretScopes {
            app_global: self.secret_store.get_secrets(&request.server_id, "app", None).await,
            server_global: self.secret_store.get_secrets(&request.server_id, "server", None).await,
            server_workspace: self
                .secret_store
                .get_secrets(&request.server_id, "workspace", Some(&request.workspace_id))
                .await,
        };
        let profile = self.secret_store.get_profile().await;
        let user_profile = profile.as_ref().map(|p| UserProfile {
            email: p.email.clone(),
            full_name: p.full_name.clone(),
        });

        let parent_env: std::collections::HashMap<String, String> = std::env::vars().collect();
        let built = EnvBuilder::build(EnvInputs {
            server_id: &request.server_id,
            workspace_id: &request.workspace_id,
            port,
            path_prefix: &self.config.path_prefix,
            parent_env: &parent_env,
            project_root: request.project_root.as_deref(),
            default_config: &template.default_config,
            config_override: combined_override.as_ref(),
            permissions: &effective_permissions,
            secrets: &secrets,
            user_profile: user_profile.as_ref(),
        });

        let cwd = request
            .project_root
            .clone()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from(".")));

        let mut command = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&argv.program).args(&argv.args);
            c
        } else {
            let mut c = Command::new(&argv.program);
            c.args(&argv.args);
            c
        };
        command
            .env_clear()
            .envs(&built.vars)
            .current_dir(&cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(server_id = %request.server_id, workspace_id = %request.workspace_id, env = ?built.redacted(), "spawning child");

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.port_allocator.release(&key);
                tracked.set_error(e.to_string());
                self.event_bus.emit_server(ServerEvent {
                    kind: ServerEventKind::Error,
                    server_id: request.server_id.clone(),
                    workspace_id: request.workspace_id.clone(),
                    timestamp: chrono::Utc::now(),
                    port: None,
                    error: Some(e.to_string()),
                    message: None,
                    level: None,
                });
                return Err(StartError::SpawnFailed(e.to_string()));
            }
        };

        let pid = child.id();
        tracked.set_pid(pid);

        self.spawn_log_readers(&mut child, &request);

        // The exit-wait task owns `child` from here on; `stop()` signals
        // by pid, never by touching the `Child` handle directly.
        self.spawn_exit_watcher(child, template.clone(), tracked.clone(), request.clone());

        match self.wait_healthy(port).await {
            Ok((tools, resources, prompts)) => {
                tracked.set_running(port, tools, resources, prompts);
                self.event_bus.emit_server(ServerEvent {
                    kind: ServerEventKind::Started,
                    server_id: request.server_id.clone(),
                    workspace_id: request.workspace_id.clone(),
                    timestamp: chrono::Utc::now(),
                    port: Some(port),
                    error: None,
                    message: None,
                    level: None,
                });
                Ok(())
            }
            Err(()) => {
                tracked.set_stopping(true);
                if let Some(pid) = tracked.pid() {
                    kill_immediately(pid);
                }
                self.port_allocator.release(&key);
                tracked.set_error("Health check timed out".to_string());
                self.event_bus.emit_server(ServerEvent {
                    kind: ServerEventKind::Error,
                    server_id: request.server_id.clone(),
                    workspace_id: request.workspace_id.clone(),
                    timestamp: chrono::Utc::now(),
                    port: None,
                    error: Some("Health check timed out".to_string()),
                    message: None,
                    level: None,
                });
                Err(StartError::HealthTimeout)
            }
        }
    }

    fn spawn_log_readers(&self, child: &mut Child, request: &StartRequest) {
        let bus = self.event_bus.clone();
        if let Some(stdout) = child.stdout.take() {
            let bus = bus.clone();
            let server_id = request.server_id.clone();
            let workspace_id = request.workspace_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.is_empty() {
                        continue;
                    }
                    bus.emit_server(ServerEvent {
                        kind: ServerEventKind::Log,
                        server_id: server_id.clone(),
                        workspace_id: workspace_id.clone(),
                        timestamp: chrono::Utc::now(),
                        port: None,
                        error: None,
                        message: Some(line),
                        level: Some(LogLevel::Info),
                    });
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let server_id = request.server_id.clone();
            let workspace_id = request.workspace_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.is_empty() {
                        continue;
                    }
                    bus.emit_server(ServerEvent {
                        kind: ServerEventKind::Log,
                        server_id: server_id.clone(),
                        workspace_id: workspace_id.clone(),
                        timestamp: chrono::Utc::now(),
                        port: None,
                        error: None,
                        message: Some(line),
                        level: Some(LogLevel::Error),
                    });
                }
            });
        }
    }

    fn spawn_exit_watcher(
        self: &Arc<Self>,
        mut child: Child,
        template: ServerTemplate,
        tracked: Arc<Tracked>,
        request: StartRequest,
    ) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let key = instance_key(&request.server_id, &request.workspace_id);
            let status = child.wait().await;
            // `notify_one`, not `notify_waiters`: it stores a permit if
            // `terminate_gracefully`'s `wait_exited` hasn't started
            // waiting yet, so a child that exits before `stop()` gets
            // around to awaiting it is never lost.
            tracked.exited.notify_one();

            if tracked.is_stopping() {
                // stop() owns cleanup for intentional termination.
                return;
            }

            let status = match status {
                Ok(status) => status,
                Err(e) => {
                    tracked.set_error(format!("wait() failed: {e}"));
                    supervisor.port_allocator.release(&key);
                    supervisor.instances.remove(&key);
                    return;
                }
            };

            let exit_code = status.code();
            let signalled = exited_by_signal(&status);

            if exit_code == Some(0) || signalled {
                supervisor.port_allocator.release(&key);
                supervisor.instances.remove(&key);
                supervisor.event_bus.emit_server(ServerEvent {
                    kind: ServerEventKind::Stopped,
                    server_id: request.server_id.clone(),
                    workspace_id: request.workspace_id.clone(),
                    timestamp: chrono::Utc::now(),
                    port: None,
                    error: None,
                    message: None,
                    level: None,
                });
                return;
            }

            warn!(
                server_id = %request.server_id,
                workspace_id = %request.workspace_id,
                exit_code,
                "child exited unexpectedly, evaluating restart"
            );
            supervisor
                .handle_unintentional_exit(template, tracked, request)
                .await;
        });
    }

    async fn handle_unintentional_exit(
        self: Arc<Self>,
        template: ServerTemplate,
        tracked: Arc<Tracked>,
        request: StartRequest,
    ) {
        let key = instance_key(&request.server_id, &request.workspace_id);
        let lock = self.lock_for(&key);
        let _guard = lock.acquire().await.expect("instance locker is never closed");
        if tracked.is_stopping() {
            // An explicit stop() raced us for the lock and won; it already
            // owns cleanup for this key.
            return;
        }
        let now = Instant::now();

        // A crash only "forgives" earlier ones if the instance proved
        // itself by staying up for a minimum stretch first; otherwise an
        // immediate post-health crash would never reach the budget.
        let ran_long_enough = tracked
            .take_running_since()
            .is_some_and(|since| since.elapsed() >= MIN_RUNTIME_FOR_CRASH);
        if ran_long_enough || now.duration_since(tracked.first_start_at()) > CRASH_WINDOW {
            tracked.reset_restart_window(now);
        }

        let attempts = tracked.increment_restart_attempts();
        if attempts > CRASH_LIMIT {
            tracked.set_error("Exceeded restart attempts".to_string());
            self.port_allocator.release(&key);
            self.instances.remove(&key);
            self.event_bus.emit_server(ServerEvent {
                kind: ServerEventKind::Error,
                server_id: request.server_id.clone(),
                workspace_id: request.workspace_id.clone(),
                timestamp: chrono::Utc::now(),
                port: None,
                error: Some("Exceeded restart attempts".to_string()),
                message: None,
                level: None,
            });
            return;
        }

        tokio::time::sleep(Duration::from_secs(attempts as u64)).await;

        if tracked.is_stopping() {
            return;
        }
        if self.server_store.get(&request.server_id).await.is_none() {
            self.port_allocator.release(&key);
            self.instances.remove(&key);
            return;
        }

        // The dead child no longer holds the port; release before retrying.
        self.port_allocator.release(&key);

        let _ = self.attempt_start(template, tracked, request).await;
    }

    /// Graceful termination. Always safe to call, even with no running
    /// instance for the key.
    pub async fn stop(&self, server_id: &str, workspace_id: &str) {
        let workspace_id = self.resolve_workspace(workspace_id);
        let key = instance_key(server_id, &workspace_id);
        let lock = self.lock_for(&key);
        let _guard = lock.acquire().await.expect("instance locker is never closed");

        let Some(tracked) = self.instances.get(&key).map(|e| e.clone()) else {
            return;
        };
        tracked.set_stopping(true);

        if let Some(pid) = tracked.pid() {
            terminate_gracefully(pid, &tracked).await;
        }

        self.port_allocator.release(&key);
        self.instances.remove(&key);
        self.event_bus.emit_server(ServerEvent {
            kind: ServerEventKind::Stopped,
            server_id: server_id.to_string(),
            workspace_id,
            timestamp: chrono::Utc::now(),
            port: None,
            error: None,
            message: None,
            level: None,
        });
    }

    /// `stop` then `start`, waiting for the old port to bind-probe free
    /// first to avoid `EADDRINUSE` races.
    pub async fn restart(
        self: &Arc<Self>,
        server_id: &str,
        workspace_id: &str,
        project_root: Option<String>,
        config_override: Option<Value>,
    ) -> Result<ServerInstance, StartError> {
        let resolved_workspace = self.resolve_workspace(workspace_id);
        let key = instance_key(server_id, &resolved_workspace);
        let freed_port = self.port_allocator.port_of(&key);

        self.stop(server_id, workspace_id).await;

        if let Some(port) = freed_port {
            for _ in 0..50 {
                if PortAllocator::is_bindable(port) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        self.start(server_id, workspace_id, project_root, config_override).await
    }

    /// Stops every tracked instance, in parallel.
    pub async fn stop_all(&self) {
        let keys: Vec<(String, String)> = self
            .instances
            .iter()
            .map(|e| {
                let data = e.value().snapshot();
                (data.server_id, data.workspace_id)
            })
            .collect();

        let stops = keys
            .into_iter()
            .map(|(server_id, workspace_id)| self.stop(&server_id, &workspace_id));
        futures::future::join_all(stops).await;
    }

    /// Stops every instance belonging to `workspace_id`, in parallel. Used
    /// by session auto-cleanup when a workspace's last session expires.
    pub async fn stop_workspace(&self, workspace_id: &str) {
        let keys: Vec<(String, String)> = self
            .instances
            .iter()
            .filter(|e| e.value().snapshot().workspace_id == workspace_id)
            .map(|e| {
                let data = e.value().snapshot();
                (data.server_id, data.workspace_id)
            })
            .collect();

        let stops = keys
            .into_iter()
            .map(|(server_id, workspace_id)| self.stop(&server_id, &workspace_id));
        futures::future::join_all(stops).await;
    }

    async fn wait_healthy(&self, port: u16) -> Result<(Option<u64>, Option<u64>, Option<u64>), ()> {
        let url = format!("http://127.0.0.1:{port}/health");
        for attempt in 0..HEALTH_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(HEALTH_INTERVAL).await;
            }
            match self.health_client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let body: Value = resp.json().await.unwrap_or(Value::Null);
                    let tools = body.get("tools").and_then(Value::as_u64);
                    let resources = body.get("resources").and_then(Value::as_u64);
                    let prompts = body.get("prompts").and_then(Value::as_u64);
                    return Ok((tools, resources, prompts));
                }
                _ => continue,
            }
        }
        Err(())
    }
}

async fn terminate_gracefully(pid: u32, tracked: &Arc<Tracked>) {
    #[cfg(unix)]
    {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        if tokio::time::timeout(STOP_TIMEOUT, tracked.wait_exited()).await.is_err() {
            warn!(pid, "graceful stop timed out, escalating to SIGKILL");
            kill_immediately(pid);
        }
    }
    #[cfg(windows)]
    {
        let _ = tokio::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .output()
            .await;
        let _ = tokio::time::timeout(STOP_TIMEOUT, tracked.wait_exited()).await;
    }
}

fn kill_immediately(pid: u32) {
    #[cfg(unix)]
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
    #[cfg(windows)]
    {
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .output();
    }
}

fn exited_by_signal(status: &std::process::ExitStatus) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal().is_some()
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{InMemoryStores, InstallSpec, ServerTemplate};

    fn supervisor() -> Arc<ProcessSupervisor> {
        let stores = InMemoryStores::new();
        ProcessSupervisor::new(
            stores.clone(),
            stores.clone(),
            stores,
            EventBus::new(),
            Arc::new(PortAllocator::new()),
            SupervisorConfig::default(),
        )
    }

    #[tokio::test]
    async fn start_rejects_unknown_server() {
        let supervisor = supervisor();
        let err = supervisor
            .start("missing", "global", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StartError::TemplateNotFound(_)));
    }

    #[tokio::test]
    async fn stop_on_untracked_instance_is_a_safe_no_op() {
        let supervisor = supervisor();
        supervisor.stop("nothing-running", "global").await;
        assert!(supervisor.get("nothing-running", "global").is_none());
    }

    #[tokio::test]
    async fn start_failure_leaves_no_lingering_record() {
        let stores = InMemoryStores::new();
        stores.add_template(ServerTemplate {
            id: "broken".to_string(),
            display_name: "Broken".to_string(),
            install: InstallSpec::Local {
                local_path: "/nonexistent/path/that/does/not/exist".to_string(),
            },
            default_config: serde_json::json!({}),
            permissions: None,
            context_headers: Default::default(),
        });
        let supervisor = ProcessSupervisor::new(
            stores.clone(),
            stores.clone(),
            stores,
            EventBus::new(),
            Arc::new(PortAllocator::new()),
            SupervisorConfig::default(),
        );

        let err = supervisor.start("broken", "global", None, None).await.unwrap_err();
        assert!(matches!(err, StartError::SpawnFailed(_)));
        assert!(supervisor.get("broken", "global").is_none());
    }

    #[test]
    fn route_instances_globally_forces_the_global_workspace() {
        let config = SupervisorConfig {
            route_instances_globally: true,
            ..SupervisorConfig::default()
        };
        let stores = InMemoryStores::new();
        let supervisor = ProcessSupervisor::new(
            stores.clone(),
            stores.clone(),
            stores,
            EventBus::new(),
            Arc::new(PortAllocator::new()),
            config,
        );
        assert_eq!(supervisor.resolve_workspace("workspace-a"), GLOBAL_WORKSPACE_ID);
    }
}
