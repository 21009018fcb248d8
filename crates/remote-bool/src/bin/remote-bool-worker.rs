//! Worker process entry point: `remote-bool-worker <PARENT_PID>`.

use std::process;

use clap::Parser;

use remote_bool::logging::init_tracing;
use remote_bool::{ParentPid, WorkerConfig, run_worker};

/// Hosts one boolean on behalf of the parent process.
///
/// Reads instruction bytes on stdin (0 = false, 1 = true, 2 = print) and
/// exits once the parent process is gone.
#[derive(Debug, Parser)]
#[command(name = "remote-bool-worker", version)]
struct Args {
    /// Process id of the parent.
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    parent_pid: u32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    init_tracing();

    let parent = ParentPid::new(args.parent_pid);
    let config = WorkerConfig::from_env();
    tracing::debug!(%parent, ?config, "Worker starting");

    let code = match run_worker(tokio::io::stdin(), tokio::io::stdout(), parent, config).await {
        Ok(exit) => {
            tracing::debug!(?exit, "Worker finished");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "Worker failed");
            1
        }
    };

    // Exit directly: tokio's stdin reader sits in a blocking read that would
    // otherwise keep the runtime from shutting down.
    process::exit(code);
}
