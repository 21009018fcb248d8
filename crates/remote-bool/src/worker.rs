//! Worker loop - runs inside the spawned worker process.
//!
//! This module provides the child side of the protocol. The parent side
//! (spawning, round trips, teardown) is in handle.rs.
//!
//! The loop owns the boolean and reacts to two things:
//! - instruction bytes arriving on its input (stdin in production)
//! - poll ticks, on each of which the parent's liveness is re-checked
//!
//! It never blocks on input alone, so an orphaned worker notices within one
//! poll interval even when no instruction ever arrives.

use std::io;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::MissedTickBehavior;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::{InstructionCodec, ResponseCodec};
use crate::bridge::protocol::Instruction;
use crate::liveness::ParentProbe;

/// Environment variable through which the parent hands the poll interval
/// (in microseconds) to the worker.
pub const POLL_INTERVAL_ENV: &str = "REMOTE_BOOL_POLL_INTERVAL_US";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

const MIN_POLL_INTERVAL: Duration = Duration::from_micros(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// How often parent liveness is re-checked.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl WorkerConfig {
    /// Read the poll interval exported by the parent.
    ///
    /// Missing or invalid values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(POLL_INTERVAL_ENV).ok().as_deref())
    }

    fn from_env_value(value: Option<&str>) -> Self {
        let poll_interval = match value {
            None => DEFAULT_POLL_INTERVAL,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(micros) if micros > 0 => Duration::from_micros(micros),
                _ => {
                    tracing::warn!(
                        value = raw,
                        default_interval = ?DEFAULT_POLL_INTERVAL,
                        "Invalid poll interval in {}, using default",
                        POLL_INTERVAL_ENV
                    );
                    DEFAULT_POLL_INTERVAL
                }
            },
        };
        Self { poll_interval }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Why the worker loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The parent process no longer exists.
    ParentGone,
    /// The instruction channel reached end of file; nothing can reach us anymore.
    InputClosed,
}

/// Run the worker event loop until the parent dies or the input closes.
///
/// Reads instructions from `input`, writes query responses to `output`.
/// I/O errors on either stream end the loop with `Err`.
pub async fn run_worker<R, W, P>(
    input: R,
    output: W,
    parent: P,
    config: WorkerConfig,
) -> io::Result<WorkerExit>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    P: ParentProbe,
{
    let mut instructions = FramedRead::new(input, InstructionCodec);
    let mut responses = FramedWrite::new(output, ResponseCodec::new());

    // Placeholder until the parent's first Set arrives.
    let mut value = false;

    let poll_interval = config.poll_interval.max(MIN_POLL_INTERVAL);
    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(?poll_interval, "Worker loop started");

    loop {
        tokio::select! {
            // Liveness first: a flood of instructions must not starve the check.
            biased;

            _ = poll.tick() => {
                if !parent.is_alive() {
                    tracing::info!("Parent process is gone, exiting");
                    return Ok(WorkerExit::ParentGone);
                }
            }

            instruction = instructions.next() => {
                match instruction {
                    Some(Ok(Instruction::SetFalse)) => value = false,
                    Some(Ok(Instruction::SetTrue)) => value = true,
                    Some(Ok(Instruction::Query)) => {
                        tracing::trace!(value, "Answering query");
                        responses.send(value).await?;
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Instruction channel error");
                        return Err(e);
                    }
                    None => {
                        tracing::info!("Instruction channel closed, exiting");
                        return Ok(WorkerExit::InputClosed);
                    }
                }
            }
        }
    }
}
