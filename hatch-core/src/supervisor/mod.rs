//! Runtime supervisor with hot reload.
//!
//! Runs the service command from a built image, restarts it when watched
//! sources change and forwards its exit status. The state machine is
//!
//! ```text
//! Starting -> Running -> (change) Restarting -> Running -> ...
//!                     -> (exit or stop)       -> Exited(code)
//! ```
//!
//! At most one instance runs at a time: the previous one is reaped before the
//! next is launched. Restart requests go through a queue of depth 1, so a burst
//! of changes costs a single restart.

pub mod process;
pub mod signal;
pub mod watcher;

pub use process::{LaunchSpec, ManagedProcess, ProcessLauncher, TokioLauncher};
pub use signal::shutdown_signal;
pub use watcher::{default_watch_ignore, FileWatcher};

use crate::builder::ImageArtifact;
use crate::observability::metrics as hatch_metrics;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, instrument, warn};

/// Error type for supervisor operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Refusing to start an empty command")]
    EmptyCommand,

    #[error("Failed to launch {command:?}: {source}")]
    LaunchFailed {
        command: Vec<String>,
        #[source]
        source: io::Error,
    },

    #[error("Failed to wait for process {pid:?}: {source}")]
    WaitFailed {
        pid: Option<u32>,
        #[source]
        source: io::Error,
    },

    #[error("Failed to stop process {pid:?}: {source}")]
    StopFailed {
        pid: Option<u32>,
        #[source]
        source: io::Error,
    },

    #[error("Failed to watch {path:?}: {reason}")]
    WatchFailed { path: Option<PathBuf>, reason: String },
}

/// Supervisor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Running,
    Restarting,
    /// Terminal; carries the child's exit code
    Exited(i32),
}

/// The process currently owned by a supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisedProcess {
    pub pid: Option<u32>,
    pub command: Vec<String>,
    pub watch_paths: Vec<PathBuf>,
    pub status: SupervisorState,
    /// Number of instances launched so far
    pub generation: u64,
}

/// Sender side of the restart queue.
#[derive(Debug, Clone)]
pub struct RestartHandle {
    tx: mpsc::Sender<()>,
}

impl RestartHandle {
    /// Creates a depth-1 restart queue.
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Requests a restart. Returns `false` when one is already pending.
    pub fn request(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Time between SIGTERM and SIGKILL
    pub grace_period: Duration,
    /// Paths to watch; relative paths resolve against the image context.
    /// Empty means the whole context.
    pub watch_paths: Vec<PathBuf>,
    /// Quiet time before a burst of changes becomes a restart
    pub debounce: Duration,
    /// Extra environment for the service
    pub env: Vec<(String, String)>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
            watch_paths: Vec::new(),
            debounce: Duration::from_millis(300),
            env: Vec::new(),
        }
    }
}

/// Supervises one service process.
pub struct Supervisor<L: ProcessLauncher> {
    launcher: L,
    config: SupervisorConfig,
    restart_handle: RestartHandle,
    restart_rx: mpsc::Receiver<()>,
    state_tx: watch::Sender<SupervisorState>,
    process: Option<SupervisedProcess>,
}

impl<L: ProcessLauncher> Supervisor<L> {
    pub fn new(launcher: L, config: SupervisorConfig) -> Self {
        let (restart_handle, restart_rx) = RestartHandle::channel();
        let (state_tx, _) = watch::channel(SupervisorState::Starting);
        Self { launcher, config, restart_handle, restart_rx, state_tx, process: None }
    }

    /// Handle used by watchers (or tests) to request restarts.
    pub fn restart_handle(&self) -> RestartHandle {
        self.restart_handle.clone()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> SupervisorState {
        *self.state_tx.borrow()
    }

    pub fn process(&self) -> Option<&SupervisedProcess> {
        self.process.as_ref()
    }

    /// Resolves the configured watch paths against the artifact's context.
    pub fn watch_paths_for(&self, artifact: &ImageArtifact) -> Vec<PathBuf> {
        if self.config.watch_paths.is_empty() {
            return vec![artifact.context_path.clone()];
        }
        self.config
            .watch_paths
            .iter()
            .map(|p| if p.is_relative() { artifact.context_path.join(p) } else { p.clone() })
            .collect()
    }

    /// Runs `command` until it exits on its own or `shutdown` fires.
    ///
    /// Returns the exit code of the last instance.
    #[instrument(skip_all, fields(image = %artifact.short_id(), variant = %artifact.variant))]
    pub async fn run(
        &mut self,
        artifact: &ImageArtifact,
        command: Vec<String>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<i32, SupervisorError> {
        if command.is_empty() {
            return Err(SupervisorError::EmptyCommand);
        }

        let mut env = self.config.env.clone();
        env.push(("PORT".to_string(), artifact.exposed_port.to_string()));
        let spec = LaunchSpec {
            command: command.clone(),
            working_dir: artifact.context_path.clone(),
            env,
        };

        self.process = Some(SupervisedProcess {
            pid: None,
            command,
            watch_paths: self.watch_paths_for(artifact),
            status: SupervisorState::Starting,
            generation: 0,
        });
        self.set_state(SupervisorState::Starting);

        let mut child = self.launch(&spec).await?;
        let mut shutdown_open = true;

        loop {
            tokio::select! {
                biased;

                signal = shutdown.recv(), if shutdown_open => match signal {
                    Ok(()) | Err(RecvError::Lagged(_)) => {
                        info!("Stop requested, terminating service");
                        let code = self.stop(child.as_mut()).await?;
                        return Ok(self.exit(code, "stopped"));
                    }
                    Err(RecvError::Closed) => shutdown_open = false,
                },

                status = child.wait() => {
                    let code = status
                        .map_err(|source| SupervisorError::WaitFailed { pid: child.pid(), source })?;
                    return Ok(self.exit(code, "exited"));
                }

                Some(()) = self.restart_rx.recv() => {
                    self.set_state(SupervisorState::Restarting);
                    hatch_metrics::record_restart();
                    info!("Change detected, restarting service");

                    let code = self.stop(child.as_mut()).await?;
                    debug!(code, "Previous instance exited");

                    // Changes seen while restarting are covered by this restart.
                    while self.restart_rx.try_recv().is_ok() {}

                    if matches!(shutdown.try_recv(), Ok(()) | Err(TryRecvError::Lagged(_))) {
                        info!("Stop requested during restart");
                        return Ok(self.exit(code, "stopped"));
                    }

                    child = self.launch(&spec).await?;
                }
            }
        }
    }

    async fn launch(&mut self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>, SupervisorError> {
        let child = self.launcher.launch(spec).await.map_err(|source| {
            SupervisorError::LaunchFailed { command: spec.command.clone(), source }
        })?;

        let pid = child.pid();
        if let Some(process) = self.process.as_mut() {
            process.pid = pid;
            process.generation += 1;
        }
        self.set_state(SupervisorState::Running);
        info!(?pid, "Service running");
        Ok(child)
    }

    /// SIGTERM, wait up to the grace period, then SIGKILL.
    async fn stop(&self, child: &mut dyn ManagedProcess) -> Result<i32, SupervisorError> {
        let pid = child.pid();

        match child.terminate() {
            Ok(()) => match tokio::time::timeout(self.config.grace_period, child.wait()).await {
                Ok(Ok(code)) => return Ok(code),
                Ok(Err(e)) => warn!(?pid, error = %e, "Wait after SIGTERM failed, force killing"),
                Err(_) => warn!(
                    ?pid,
                    grace_secs = self.config.grace_period.as_secs_f64(),
                    "Grace period elapsed, force killing"
                ),
            },
            Err(e) => warn!(?pid, error = %e, "Failed to send SIGTERM, force killing"),
        }

        child.kill().await.map_err(|source| SupervisorError::StopFailed { pid, source })
    }

    fn exit(&mut self, code: i32, reason: &str) -> i32 {
        self.set_state(SupervisorState::Exited(code));
        if let Some(process) = self.process.as_mut() {
            process.pid = None;
        }
        hatch_metrics::record_exit(reason);
        info!(code, reason, "Service exited");
        code
    }

    fn set_state(&mut self, state: SupervisorState) {
        self.state_tx.send_replace(state);
        if let Some(process) = self.process.as_mut() {
            process.status = state;
        }
    }
}

/// Runs `command` from `artifact` as a real child process with file watching.
pub async fn run_with_reload(
    artifact: &ImageArtifact,
    command: Vec<String>,
    config: SupervisorConfig,
    shutdown: broadcast::Receiver<()>,
) -> Result<i32, SupervisorError> {
    let debounce = config.debounce;
    let mut supervisor = Supervisor::new(TokioLauncher, config);
    let _watcher = FileWatcher::start(
        &supervisor.watch_paths_for(artifact),
        supervisor.restart_handle(),
        debounce,
        default_watch_ignore(),
    )?;

    supervisor.run(artifact, command, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_queue_depth_one() {
        let (handle, mut rx) = RestartHandle::channel();

        assert!(handle.request());
        assert!(!handle.request(), "second request must coalesce");
        assert!(!handle.clone().request());

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert!(handle.request());
    }

    #[test]
    fn test_watch_paths_resolve_against_context() {
        let artifact = ImageArtifact {
            id: "abc".into(),
            variant: "minimal".into(),
            layers: Vec::new(),
            exposed_port: 8000,
            entrypoint: vec!["uvicorn".into()],
            workdir: "/app".into(),
            context_path: PathBuf::from("/src/app"),
            created: String::new(),
        };

        let default = Supervisor::new(TokioLauncher, SupervisorConfig::default());
        assert_eq!(default.watch_paths_for(&artifact), vec![PathBuf::from("/src/app")]);

        let config = SupervisorConfig {
            watch_paths: vec![PathBuf::from("routers"), PathBuf::from("/etc/app.toml")],
            ..Default::default()
        };
        let custom = Supervisor::new(TokioLauncher, config);
        assert_eq!(
            custom.watch_paths_for(&artifact),
            vec![PathBuf::from("/src/app/routers"), PathBuf::from("/etc/app.toml")]
        );
        assert_eq!(custom.state(), SupervisorState::Starting);
        assert!(custom.process().is_none());
    }
}
