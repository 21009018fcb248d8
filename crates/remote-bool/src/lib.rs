//! remote-bool: a boolean whose storage lives in a supervised worker process.

mod handle;
mod liveness;
mod spawner;

pub mod bridge;
pub mod logging;
pub mod worker;

pub use bridge::protocol::Instruction;
pub use handle::{RemoteBool, RemoteBoolConfig, RemoteBoolError, Result};
pub use liveness::{ParentPid, ParentProbe, is_pid_alive};
pub use spawner::{
    SpawnError, WORKER_BIN_NAME, WORKER_PATH_ENV, WorkerCommand, WorkerSpawnConfig, WorkerSpawner,
};
pub use worker::{WorkerConfig, WorkerExit, run_worker};
