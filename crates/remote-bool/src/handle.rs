//! Parent handle - owns the worker subprocess and its conversation.
//!
//! Flow:
//! 1. Spawn worker with our pid as its only argument
//! 2. Send the default value as the first Set instruction
//! 3. Serve set/get round trips, one at a time
//! 4. On close (or drop): kill and reap the worker
//!
//! The wire carries no request ids. A single round-trip lock guarantees at
//! most one instruction/response cycle is outstanding, so a reply is always
//! read by the call that asked for it. A `get_value` future dropped after its
//! Query went out leaves the reply in the pipe; the next query discards it
//! before asking again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::{InstructionCodec, ResponseCodec};
use crate::bridge::protocol::Instruction;
use crate::liveness::ParentPid;
use crate::spawner::{WorkerCommand, WorkerSpawnConfig, WorkerSpawner};
use crate::worker::DEFAULT_POLL_INTERVAL;

#[derive(Debug, thiserror::Error)]
pub enum RemoteBoolError {
    #[error("failed to launch worker: {0}")]
    Launch(String),
    #[error("remote boolean has been closed")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("failed to terminate worker: {0}")]
    Terminate(String),
}

pub type Result<T, E = RemoteBoolError> = std::result::Result<T, E>;

pub struct RemoteBoolConfig {
    pub default_value: bool,
    /// How often the worker re-checks that we are still alive.
    pub poll_interval: Duration,
    /// Upper bound on waiting for a query response. `None` waits forever.
    pub response_timeout: Option<Duration>,
    pub spawner: Arc<dyn WorkerSpawner>,
}

impl Default for RemoteBoolConfig {
    fn default() -> Self {
        Self::new(false)
    }
}

impl RemoteBoolConfig {
    pub fn new(default_value: bool) -> Self {
        Self {
            default_value,
            poll_interval: DEFAULT_POLL_INTERVAL,
            response_timeout: None,
            spawner: Arc::new(WorkerCommand::locate()),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Shorthand for `with_spawner` with a plain worker command.
    pub fn with_worker(self, command: WorkerCommand) -> Self {
        self.with_spawner(Arc::new(command))
    }
}

struct Conversation {
    writer: FramedWrite<ChildStdin, InstructionCodec>,
    reader: FramedRead<ChildStdout, ResponseCodec>,
    /// A Query was handed to the writer and its reply has not been read.
    in_flight: bool,
}

impl Conversation {
    async fn send(&mut self, instruction: Instruction) -> std::io::Result<()> {
        self.writer.feed(instruction).await?;
        // Buffered now: it reaches the worker with the next flush even if
        // this future is dropped.
        if instruction.expects_response() {
            self.in_flight = true;
        }
        self.writer.flush().await
    }
}

/// A boolean stored in a separate worker process.
///
/// Dropping the handle kills the worker.
pub struct RemoteBool {
    conversation: Mutex<Conversation>,
    // Separate from the conversation so close() never waits behind a
    // round trip that is blocked on a silent worker.
    child: Mutex<Child>,
    closed: AtomicBool,
    pid: Option<u32>,
    response_timeout: Option<Duration>,
}

impl std::fmt::Debug for RemoteBool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBool")
            .field("pid", &self.pid)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl RemoteBool {
    /// Spawn a worker using the default configuration and store `default_value` in it.
    pub async fn spawn(default_value: bool) -> Result<Self> {
        Self::spawn_with(RemoteBoolConfig::new(default_value)).await
    }

    pub async fn spawn_with(config: RemoteBoolConfig) -> Result<Self> {
        let spawn_config = WorkerSpawnConfig {
            parent_pid: ParentPid::current(),
            poll_interval: config.poll_interval,
        };

        let mut child = config
            .spawner
            .spawn(&spawn_config)
            .map_err(|e| RemoteBoolError::Launch(e.to_string()))?;
        let pid = child.id();

        let Some(stdin) = child.stdin.take() else {
            abandon(&mut child);
            return Err(RemoteBoolError::Launch("stdin not captured".to_string()));
        };
        let Some(stdout) = child.stdout.take() else {
            abandon(&mut child);
            return Err(RemoteBoolError::Launch("stdout not captured".to_string()));
        };

        let mut writer = FramedWrite::new(stdin, InstructionCodec);
        let reader = FramedRead::new(stdout, ResponseCodec::new());

        if let Err(e) = writer.send(Instruction::set(config.default_value)).await {
            abandon(&mut child);
            return Err(RemoteBoolError::Protocol(format!(
                "failed to send initial value: {e}"
            )));
        }

        tracing::info!(?pid, default_value = config.default_value, "Worker started");

        Ok(Self {
            conversation: Mutex::new(Conversation {
                writer,
                reader,
                in_flight: false,
            }),
            child: Mutex::new(child),
            closed: AtomicBool::new(false),
            pid,
            response_timeout: config.response_timeout,
        })
    }

    /// OS pid of the worker, if it was known at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the worker is still running and the handle is open.
    pub async fn is_alive(&self) -> bool {
        self.ensure_alive().await.is_ok()
    }

    /// Store `value` in the worker. Does not wait for the worker to apply it.
    pub async fn set_value(&self, value: bool) -> Result<()> {
        let mut conversation = self.conversation.lock().await;
        self.ensure_alive().await?;

        conversation
            .send(Instruction::set(value))
            .await
            .map_err(|e| RemoteBoolError::Protocol(format!("failed to send set: {e}")))
    }

    /// Ask the worker for its current value and wait for the answer.
    pub async fn get_value(&self) -> Result<bool> {
        let mut conversation = self.conversation.lock().await;
        self.ensure_alive().await?;

        if conversation.in_flight {
            conversation
                .writer
                .flush()
                .await
                .map_err(|e| RemoteBoolError::Protocol(format!("failed to send query: {e}")))?;
            let stale = self.read_reply(&mut conversation).await?;
            tracing::debug!(stale, "Discarded reply to an abandoned query");
        }

        conversation
            .send(Instruction::Query)
            .await
            .map_err(|e| RemoteBoolError::Protocol(format!("failed to send query: {e}")))?;

        self.read_reply(&mut conversation).await
    }

    /// Read the reply to the outstanding Query.
    async fn read_reply(&self, conversation: &mut Conversation) -> Result<bool> {
        let response = match self.response_timeout {
            None => conversation.reader.next().await,
            Some(timeout) => match tokio::time::timeout(timeout, conversation.reader.next()).await
            {
                Ok(response) => response,
                Err(_) => {
                    // A late reply would be read by the next query; the
                    // conversation cannot be trusted anymore.
                    tracing::warn!(?timeout, pid = ?self.pid, "Worker did not answer, killing it");
                    self.kill().await?;
                    return Err(RemoteBoolError::Protocol(format!(
                        "no response within {timeout:?}"
                    )));
                }
            },
        };

        match response {
            Some(Ok(value)) => {
                conversation.in_flight = false;
                Ok(value)
            }
            Some(Err(e)) => {
                conversation.in_flight = false;
                Err(RemoteBoolError::Protocol(format!(
                    "invalid response from worker: {e}"
                )))
            }
            None => Err(RemoteBoolError::Protocol(
                "worker closed its response stream".to_string(),
            )),
        }
    }

    /// Kill the worker and wait for it to exit. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.kill().await
    }

    async fn kill(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(pid = ?self.pid, %status, "Worker had already exited");
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to poll worker status"),
        }

        child
            .kill()
            .await
            .map_err(|e| RemoteBoolError::Terminate(e.to_string()))?;
        tracing::info!(pid = ?self.pid, "Worker closed");
        Ok(())
    }

    async fn ensure_alive(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RemoteBoolError::Closed);
        }

        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(None) => Ok(()),
            Ok(Some(status)) => {
                tracing::warn!(pid = ?self.pid, %status, "Worker exited unexpectedly");
                self.closed.store(true, Ordering::SeqCst);
                Err(RemoteBoolError::Closed)
            }
            Err(e) => Err(RemoteBoolError::Protocol(format!(
                "failed to check worker status: {e}"
            ))),
        }
    }
}

/// Best-effort kill of a worker that never became usable.
fn abandon(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::warn!(error = %e, "Failed to kill abandoned worker");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::spawner::SpawnError;

    struct FailingSpawner;

    impl WorkerSpawner for FailingSpawner {
        fn spawn(&self, _config: &WorkerSpawnConfig) -> Result<Child, SpawnError> {
            Err(SpawnError::Other("no workers today".to_string()))
        }
    }

    /// Spawns `sh` with a script instead of the real worker.
    #[cfg(unix)]
    struct ShellSpawner(&'static str);

    #[cfg(unix)]
    impl WorkerSpawner for ShellSpawner {
        fn spawn(&self, _config: &WorkerSpawnConfig) -> Result<Child, SpawnError> {
            let child = tokio::process::Command::new("sh")
                .args(["-c", self.0])
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::null())
                .kill_on_drop(true)
                .spawn()?;
            Ok(child)
        }
    }

    #[test]
    fn config_defaults() {
        let config = RemoteBoolConfig::default();
        assert!(!config.default_value);
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert!(config.response_timeout.is_none());
    }

    #[test]
    fn config_builder() {
        let config = RemoteBoolConfig::new(true)
            .with_poll_interval(Duration::from_micros(500))
            .with_response_timeout(Duration::from_secs(2));
        assert!(config.default_value);
        assert_eq!(config.poll_interval, Duration::from_micros(500));
        assert_eq!(config.response_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn error_messages() {
        insta::assert_snapshot!(RemoteBoolError::Closed.to_string(), @"remote boolean has been closed");
        insta::assert_snapshot!(
            RemoteBoolError::Launch("spawner failed".to_string()).to_string(),
            @"failed to launch worker: spawner failed"
        );
    }

    #[tokio::test]
    async fn spawner_failure_is_launch_error() {
        let config = RemoteBoolConfig::new(false).with_spawner(Arc::new(FailingSpawner));
        let err = RemoteBool::spawn_with(config).await.unwrap_err();
        assert!(matches!(err, RemoteBoolError::Launch(_)), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn garbage_response_is_protocol_error() {
        // Swallows instructions and answers with nonsense.
        let config = RemoteBoolConfig::new(false)
            .with_spawner(Arc::new(ShellSpawner("echo maybe; exec cat > /dev/null")));
        let remote = RemoteBool::spawn_with(config).await.unwrap();

        let err = remote.get_value().await.unwrap_err();
        assert!(matches!(err, RemoteBoolError::Protocol(_)), "got {err:?}");
        remote.close().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_worker_times_out_and_is_closed() {
        // Holds stdout open without ever writing to it.
        let config = RemoteBoolConfig::new(false)
            .with_response_timeout(Duration::from_millis(100))
            .with_spawner(Arc::new(ShellSpawner("exec sleep 60")));
        let remote = RemoteBool::spawn_with(config).await.unwrap();

        let err = remote.get_value().await.unwrap_err();
        assert!(matches!(err, RemoteBoolError::Protocol(_)), "got {err:?}");

        assert!(!remote.is_alive().await);
        let err = remote.set_value(true).await.unwrap_err();
        assert!(matches!(err, RemoteBoolError::Closed), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn close_fails_a_blocked_get() {
        let config =
            RemoteBoolConfig::new(false).with_spawner(Arc::new(ShellSpawner("exec sleep 60")));
        let remote = Arc::new(RemoteBool::spawn_with(config).await.unwrap());

        let blocked = {
            let remote = Arc::clone(&remote);
            tokio::spawn(async move { remote.get_value().await })
        };

        // Wait until the query holds the round-trip lock and is reading.
        while remote.conversation.try_lock().is_ok() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        remote.close().await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), blocked)
            .await
            .expect("get_value still blocked after close")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, RemoteBoolError::Protocol(_)), "got {err:?}");
        assert!(!remote.is_alive().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exited_worker_is_closed() {
        let config = RemoteBoolConfig::new(false).with_spawner(Arc::new(ShellSpawner("exit 0")));
        // The initial write may or may not race the exit; either outcome is a clean error.
        let remote = match RemoteBool::spawn_with(config).await {
            Ok(remote) => remote,
            Err(RemoteBoolError::Protocol(_)) => return,
            Err(other) => panic!("unexpected error: {other:?}"),
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while remote.is_alive().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("worker did not exit");

        let err = remote.get_value().await.unwrap_err();
        assert!(matches!(err, RemoteBoolError::Closed), "got {err:?}");
    }
}
