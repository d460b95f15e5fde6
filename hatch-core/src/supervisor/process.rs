//! Process seam between the supervisor state machine and the OS.
//!
//! The supervisor only talks to [`ProcessLauncher`] and [`ManagedProcess`];
//! [`TokioLauncher`] is the implementation that spawns real child processes.

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Everything needed to start the service process once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub command: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

/// Starts service processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ManagedProcess>>;
}

/// A launched process owned by the supervisor.
#[async_trait]
pub trait ManagedProcess: Send {
    /// OS process id, if still known.
    fn pid(&self) -> Option<u32>;

    /// Waits for the process to exit and returns its exit code.
    ///
    /// Must be cancel safe: dropping the future leaves the process untouched.
    /// Processes killed by a signal report `128 + signal`.
    async fn wait(&mut self) -> io::Result<i32>;

    /// Asks the process to terminate (SIGTERM on unix). Does not wait.
    fn terminate(&mut self) -> io::Result<()>;

    /// Kills the process immediately and reaps it.
    async fn kill(&mut self) -> io::Result<i32>;
}

/// Spawns child processes with `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct TokioLauncher;

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ManagedProcess>> {
        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&spec.working_dir)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        // The child leads its own process group so workers it forks can be
        // signalled together with it.
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn()?;
        let pgid = child.id();

        info!(pid = ?pgid, program = %program, "Launched process");
        Ok(Box::new(ChildProcess { child, pgid }))
    }
}

/// A real child process and the process group it leads.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    /// Process group id; equal to the child's pid on unix
    pgid: Option<u32>,
}

impl ChildProcess {
    /// Sends `signal` to the whole process group. A group that is already
    /// gone is not an error.
    #[cfg(unix)]
    fn signal_group(&self, signal: libc::c_int) -> io::Result<()> {
        let Some(pgid) = self.pgid else {
            return Ok(());
        };
        // SAFETY: plain syscall; a negative pid addresses the process group.
        let ret = unsafe { libc::kill(-(pgid as libc::pid_t), signal) };
        if ret != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Kills whatever is left of the group once the leader has exited.
    /// The group id is forgotten afterwards so it is never signalled again.
    fn reap_group(&mut self) {
        #[cfg(unix)]
        if let Err(e) = self.signal_group(libc::SIGKILL) {
            debug!(pgid = ?self.pgid, error = %e, "Failed to clean up process group");
        }
        self.pgid = None;
    }
}

#[async_trait]
impl ManagedProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> io::Result<i32> {
        let status = self.child.wait().await?;
        self.reap_group();
        Ok(exit_code(status))
    }

    fn terminate(&mut self) -> io::Result<()> {
        if self.child.id().is_none() {
            return Ok(());
        }
        debug!(pgid = ?self.pgid, "Sending SIGTERM to process group");

        #[cfg(unix)]
        {
            self.signal_group(libc::SIGTERM)
        }

        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    async fn kill(&mut self) -> io::Result<i32> {
        #[cfg(unix)]
        self.signal_group(libc::SIGKILL)?;

        if let Err(e) = self.child.start_kill() {
            // Already reaped: report the status we have.
            if let Ok(Some(status)) = self.child.try_wait() {
                return Ok(exit_code(status));
            }
            return Err(e);
        }
        self.wait().await
    }
}

/// Maps an exit status to a shell-style exit code.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec {
            command: vec!["sh".into(), "-c".into(), script.into()],
            working_dir: std::env::temp_dir(),
            env: vec![("HATCH_TEST".into(), "1".into())],
        }
    }

    #[tokio::test]
    async fn test_exit_code_forwarded() {
        let mut process = TokioLauncher.launch(&sh("exit 7")).await.unwrap();
        assert_eq!(process.wait().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_env_is_passed() {
        let mut process =
            TokioLauncher.launch(&sh("test \"$HATCH_TEST\" = 1")).await.unwrap();
        assert_eq!(process.wait().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_terminate_reports_signal() {
        let mut process = TokioLauncher.launch(&sh("exec sleep 30")).await.unwrap();
        assert!(process.pid().is_some());

        process.terminate().unwrap();
        assert_eq!(process.wait().await.unwrap(), 128 + libc::SIGTERM);
    }

    #[tokio::test]
    async fn test_kill_reaps() {
        let mut process = TokioLauncher.launch(&sh("exec sleep 30")).await.unwrap();
        assert_eq!(process.kill().await.unwrap(), 128 + libc::SIGKILL);
        // Killing again reports the same status.
        assert_eq!(process.kill().await.unwrap(), 128 + libc::SIGKILL);
    }

    /// Whether `pid` names a live (non-zombie) process.
    #[cfg(target_os = "linux")]
    fn alive(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => {
                let state = stat.rsplit(')').next().and_then(|rest| rest.trim().chars().next());
                state != Some('Z')
            }
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    async fn wait_gone(pid: i32) -> bool {
        for _ in 0..100 {
            if !alive(pid) {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        false
    }

    #[cfg(target_os = "linux")]
    async fn read_pid(path: &std::path::Path) -> i32 {
        for _ in 0..100 {
            if let Ok(text) = std::fs::read_to_string(path) {
                if let Ok(pid) = text.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("pid file {} never written", path.display());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_kill_takes_down_workers() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut spec = sh("trap '' TERM; sleep 300 & echo $! > worker.pid; wait");
        spec.working_dir = dir.path().to_path_buf();

        let mut process = TokioLauncher.launch(&spec).await.unwrap();
        let worker = read_pid(&dir.path().join("worker.pid")).await;

        process.terminate().unwrap();
        assert_eq!(process.kill().await.unwrap(), 128 + libc::SIGKILL);
        assert!(wait_gone(worker).await, "worker {} outlived the group kill", worker);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_exit_of_leader_cleans_up_group() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut spec = sh("(trap '' TERM; exec sleep 300) & echo $! > worker.pid; wait");
        spec.working_dir = dir.path().to_path_buf();

        let mut process = TokioLauncher.launch(&spec).await.unwrap();
        let worker = read_pid(&dir.path().join("worker.pid")).await;

        process.terminate().unwrap();
        assert_eq!(process.wait().await.unwrap(), 128 + libc::SIGTERM);
        assert!(wait_gone(worker).await, "worker {} survived its leader", worker);
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let spec = LaunchSpec { command: vec![], working_dir: std::env::temp_dir(), env: vec![] };
        let err = TokioLauncher.launch(&spec).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
