//! Worker spawn strategies.
//!
//! The parent only needs a `Child` with piped stdin/stdout. How the worker
//! executable is found is decided by a `WorkerSpawner`; `WorkerCommand` is
//! the standard one.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::liveness::ParentPid;
use crate::worker::POLL_INTERVAL_ENV;

/// File name of the worker executable.
pub const WORKER_BIN_NAME: &str = "remote-bool-worker";

/// Overrides the worker executable location.
pub const WORKER_PATH_ENV: &str = "REMOTE_BOOL_WORKER";

#[derive(Debug, Clone)]
pub struct WorkerSpawnConfig {
    /// Pid the worker watches; passed as its only positional argument.
    pub parent_pid: ParentPid,
    pub poll_interval: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("spawn failed: {0}")]
    Other(String),
}

/// Extension point for different worker spawn strategies.
///
/// Implementations must pipe stdin and stdout; stderr is free for logs.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, config: &WorkerSpawnConfig) -> Result<Child, SpawnError>;
}

/// Program plus runtime arguments used to start the worker.
///
/// The parent pid is appended after `args`, so a worker that needs an
/// interpreter or launcher can be described as e.g. `launcher --flag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Find the worker executable.
    ///
    /// Order: `REMOTE_BOOL_WORKER`, a `remote-bool-worker` next to the current
    /// executable, then the bare name (resolved through `PATH` at spawn time).
    pub fn locate() -> Self {
        let from_env = std::env::var_os(WORKER_PATH_ENV).filter(|v| !v.is_empty());
        let current_exe = std::env::current_exe().ok();
        Self::new(Self::resolve(from_env, current_exe.as_deref()))
    }

    fn resolve(from_env: Option<OsString>, current_exe: Option<&Path>) -> PathBuf {
        if let Some(path) = from_env {
            return PathBuf::from(path);
        }

        let sibling = current_exe
            .and_then(Path::parent)
            .map(|dir| dir.join(format!("{WORKER_BIN_NAME}{}", std::env::consts::EXE_SUFFIX)))
            .filter(|candidate| candidate.is_file());

        sibling.unwrap_or_else(|| PathBuf::from(WORKER_BIN_NAME))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

/// Poll interval as handed to the worker: whole microseconds, at least one.
fn poll_interval_micros(poll_interval: Duration) -> u64 {
    u64::try_from(poll_interval.as_micros())
        .unwrap_or(u64::MAX)
        .max(1)
}

impl WorkerSpawner for WorkerCommand {
    fn spawn(&self, config: &WorkerSpawnConfig) -> Result<Child, SpawnError> {
        let poll_micros = poll_interval_micros(config.poll_interval);

        tracing::debug!(
            program = %self.program.display(),
            parent_pid = config.parent_pid.get(),
            poll_interval_us = poll_micros,
            "Spawning worker"
        );

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(config.parent_pid.to_string())
            .env(POLL_INTERVAL_ENV, poll_micros.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins() {
        let path = WorkerCommand::resolve(
            Some(OsString::from("/opt/bin/custom-worker")),
            Some(Path::new("/usr/bin/anything")),
        );
        assert_eq!(path, PathBuf::from("/opt/bin/custom-worker"));
    }

    #[test]
    fn sibling_of_current_exe_is_used_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let worker = dir
            .path()
            .join(format!("{WORKER_BIN_NAME}{}", std::env::consts::EXE_SUFFIX));
        std::fs::write(&worker, b"").unwrap();

        let path = WorkerCommand::resolve(None, Some(&dir.path().join("remote-bool")));
        assert_eq!(path, worker);
    }

    #[test]
    fn falls_back_to_bare_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = WorkerCommand::resolve(None, Some(&dir.path().join("remote-bool")));
        assert_eq!(path, PathBuf::from(WORKER_BIN_NAME));

        assert_eq!(
            WorkerCommand::resolve(None, None),
            PathBuf::from(WORKER_BIN_NAME)
        );
    }

    #[test]
    fn runtime_args_are_kept_in_order() {
        let cmd = WorkerCommand::new("launcher")
            .with_arg("--quiet")
            .with_arg("worker.bin");
        assert_eq!(cmd.program(), Path::new("launcher"));
        assert_eq!(
            cmd.args,
            [OsString::from("--quiet"), OsString::from("worker.bin")]
        );
    }

    #[test]
    fn poll_interval_is_whole_micros_and_saturates() {
        assert_eq!(poll_interval_micros(Duration::from_micros(250)), 250);
        assert_eq!(poll_interval_micros(Duration::ZERO), 1);
        assert_eq!(poll_interval_micros(Duration::from_nanos(999)), 1);
        assert_eq!(poll_interval_micros(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = WorkerCommand::new(dir.path().join("does-not-exist"));
        let config = WorkerSpawnConfig {
            parent_pid: ParentPid::current(),
            poll_interval: Duration::from_millis(1),
        };

        let err = cmd.spawn(&config).unwrap_err();
        assert!(matches!(err, SpawnError::Spawn(_)));
    }
}
