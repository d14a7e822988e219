use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hui_schema::{ListenAddr, ServerConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ControlConfig;
use crate::derive::materialize;
use crate::error::ControlError;

/// Which of the two managed Hysteria2 instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Primary,
    Secondary,
}

impl NodeRole {
    pub const ALL: [NodeRole; 2] = [NodeRole::Primary, NodeRole::Secondary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    /// Distance of this node's ports from the primary's.
    pub fn port_offset(&self) -> u16 {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
        }
    }

    pub fn config_file_name(&self) -> &'static str {
        match self {
            Self::Primary => "hysteria2.yaml",
            Self::Secondary => "hysteria2-node2.yaml",
        }
    }

    pub fn log_file_name(&self) -> &'static str {
        match self {
            Self::Primary => "hysteria2.log",
            Self::Secondary => "hysteria2-node2.log",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// What to execute for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// stdout and stderr are appended here when set.
    pub log_path: Option<PathBuf>,
}

/// Spawns external processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync + 'static {
    async fn spawn(&self, request: &LaunchRequest) -> Result<Box<dyn ManagedProcess>, String>;
}

/// Handle to a spawned process.
#[async_trait]
pub trait ManagedProcess: Send {
    fn id(&self) -> Option<u32>;

    /// `Ok(true)` once the process has exited.
    fn try_exited(&mut self) -> Result<bool, String>;

    /// Ask the process to shut down (SIGTERM on unix).
    fn terminate(&mut self) -> Result<(), String>;

    /// Wait up to `grace` for exit; `Ok(false)` on timeout.
    async fn wait_timeout(&mut self, grace: Duration) -> Result<bool, String>;

    /// Force-kill and reap.
    async fn kill(&mut self) -> Result<(), String>;
}

/// Launches processes with `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioLauncher;

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn spawn(&self, request: &LaunchRequest) -> Result<Box<dyn ManagedProcess>, String> {
        let mut cmd = tokio::process::Command::new(&request.program);
        cmd.args(&request.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match request.log_path.as_deref() {
            Some(path) => {
                let log = open_log(path).map_err(|e| format!("open log {}: {e}", path.display()))?;
                let err_log = log
                    .try_clone()
                    .map_err(|e| format!("clone log handle: {e}"))?;
                cmd.stdout(Stdio::from(log)).stderr(Stdio::from(err_log));
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let child = cmd.spawn().map_err(|e| format!("spawn failed: {e}"))?;
        Ok(Box::new(TokioProcess { child }))
    }
}

fn open_log(path: &Path) -> io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

struct TokioProcess {
    child: tokio::process::Child,
}

#[async_trait]
impl ManagedProcess for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exited(&mut self) -> Result<bool, String> {
        self.child
            .try_wait()
            .map(|status| status.is_some())
            .map_err(|e| format!("try_wait: {e}"))
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> Result<(), String> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| format!("SIGTERM: {e}"))
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> Result<(), String> {
        self.child
            .start_kill()
            .map_err(|e| format!("terminate: {e}"))
    }

    async fn wait_timeout(&mut self, grace: Duration) -> Result<bool, String> {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => Err(format!("wait: {e}")),
            Err(_) => Ok(false),
        }
    }

    async fn kill(&mut self) -> Result<(), String> {
        self.child.kill().await.map_err(|e| format!("kill: {e}"))
    }
}

/// Owns at most one live Hysteria2 process for a node.
///
/// The supervisor is the only writer of the node's config file. It is not
/// internally synchronized; callers hold it behind a mutex so that stop
/// always completes before the next start.
pub struct ProcessSupervisor {
    role: NodeRole,
    binary: PathBuf,
    config_path: PathBuf,
    log_path: PathBuf,
    stop_grace: Duration,
    start_probe: Duration,
    launcher: Arc<dyn ProcessLauncher>,
    state: NodeState,
    process: Option<Box<dyn ManagedProcess>>,
}

impl ProcessSupervisor {
    pub fn new(role: NodeRole, config: &ControlConfig, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            role,
            binary: config.binary_path(),
            config_path: config.node_config_path(role),
            log_path: config.node_log_path(role),
            stop_grace: config.stop_grace,
            start_probe: config.start_probe,
            launcher,
            state: NodeState::Stopped,
            process: None,
        }
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn state(&mut self) -> NodeState {
        // Refresh so an unexpected exit shows up as Stopped.
        self.is_running();
        self.state
    }

    /// False when there is no handle or the process has exited.
    pub fn is_running(&mut self) -> bool {
        let exited = match self.process.as_mut() {
            None => return false,
            Some(process) => match process.try_exited() {
                Ok(exited) => exited,
                Err(err) => {
                    warn!(node = %self.role, error = %err, "process status check failed");
                    false
                }
            },
        };
        if exited {
            if self.state == NodeState::Running {
                warn!(node = %self.role, "process exited unexpectedly");
            }
            self.process = None;
            self.state = NodeState::Stopped;
        }
        !exited
    }

    /// Write `config` to the node's config path and launch the server.
    pub async fn start(&mut self, config: &ServerConfig) -> Result<(), ControlError> {
        if self.is_running() {
            debug!(node = %self.role, "start skipped, already running");
            return Ok(());
        }
        if !self.binary.exists() {
            return Err(ControlError::start_failed(
                self.role,
                format!("binary not found at {}", self.binary.display()),
            ));
        }

        let listen = config
            .listen_addr()
            .ok_or_else(|| ControlError::InvalidConfig("listen is required".to_string()))?;
        let listen = ListenAddr::parse(listen)?;
        ensure_udp_port_free(&listen).map_err(|reason| ControlError::start_failed(self.role, reason))?;

        let bytes = materialize(config)?;
        if let Some(parent) = self.config_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ControlError::Sys(format!("create config dir: {e}")))?;
        }
        tokio::fs::write(&self.config_path, bytes)
            .await
            .map_err(|e| ControlError::Sys(format!("write {}: {e}", self.config_path.display())))?;

        self.state = NodeState::Starting;
        let request = LaunchRequest {
            program: self.binary.clone(),
            args: vec![
                "-c".to_string(),
                self.config_path.to_string_lossy().into_owned(),
                "server".to_string(),
            ],
            log_path: Some(self.log_path.clone()),
        };
        let mut process = match self.launcher.spawn(&request).await {
            Ok(process) => process,
            Err(reason) => {
                self.state = NodeState::Stopped;
                return Err(ControlError::start_failed(self.role, reason));
            }
        };

        if !self.start_probe.is_zero() {
            tokio::time::sleep(self.start_probe).await;
            if process.try_exited().unwrap_or(true) {
                self.state = NodeState::Stopped;
                return Err(ControlError::start_failed(
                    self.role,
                    format!("exited during startup, see {}", self.log_path.display()),
                ));
            }
        }

        info!(node = %self.role, pid = ?process.id(), listen = %listen, "node started");
        self.process = Some(process);
        self.state = NodeState::Running;
        Ok(())
    }

    /// Graceful stop. A node that is not running stops trivially.
    ///
    /// On `StopFailed` the handle is kept; call [`release`](Self::release)
    /// to force-kill.
    pub async fn stop(&mut self) -> Result<(), ControlError> {
        if !self.is_running() {
            self.state = NodeState::Stopped;
            return Ok(());
        }
        let Some(process) = self.process.as_mut() else {
            return Ok(());
        };

        self.state = NodeState::Stopping;
        if let Err(err) = process.terminate() {
            warn!(node = %self.role, error = %err, "terminate signal failed");
        }
        match process.wait_timeout(self.stop_grace).await {
            Ok(true) => {
                self.process = None;
                self.state = NodeState::Stopped;
                info!(node = %self.role, "node stopped");
                Ok(())
            }
            Ok(false) => Err(ControlError::stop_failed(
                self.role,
                format!("did not exit within {:?}", self.stop_grace),
            )),
            Err(reason) => Err(ControlError::stop_failed(self.role, reason)),
        }
    }

    /// Stop then start; not atomic.
    pub async fn restart(&mut self, config: &ServerConfig) -> Result<(), ControlError> {
        if let Err(err) = self.stop().await {
            warn!(node = %self.role, error = %err, "graceful stop failed, forcing");
            self.release().await?;
        }
        self.start(config).await
    }

    /// Force-kill without a graceful shutdown.
    pub async fn release(&mut self) -> Result<(), ControlError> {
        let Some(mut process) = self.process.take() else {
            self.state = NodeState::Stopped;
            return Ok(());
        };
        if process.try_exited().unwrap_or(false) {
            self.state = NodeState::Stopped;
            return Ok(());
        }
        if let Err(reason) = process.kill().await {
            // Keep the handle: the process is still alive.
            self.process = Some(process);
            self.state = NodeState::Running;
            return Err(ControlError::stop_failed(self.role, reason));
        }
        self.state = NodeState::Stopped;
        info!(node = %self.role, "node released");
        Ok(())
    }
}

fn ensure_udp_port_free(listen: &ListenAddr) -> Result<(), String> {
    let host = match listen.host.as_str() {
        "" => "0.0.0.0",
        other => other.trim_start_matches('[').trim_end_matches(']'),
    };
    match std::net::UdpSocket::bind((host, listen.port)) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            Err(format!("udp port {} is already in use", listen.port))
        }
        Err(e) => {
            debug!(port = listen.port, error = %e, "udp port probe inconclusive");
            Ok(())
        }
    }
}

/// One node: its supervisor behind a dedicated lock.
pub struct Node {
    role: NodeRole,
    supervisor: tokio::sync::Mutex<ProcessSupervisor>,
}

impl Node {
    pub fn new(supervisor: ProcessSupervisor) -> Self {
        Self {
            role: supervisor.role(),
            supervisor: tokio::sync::Mutex::new(supervisor),
        }
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor.lock().await.is_running()
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, ProcessSupervisor> {
        self.supervisor.lock().await
    }
}
