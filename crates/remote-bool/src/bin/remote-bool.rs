use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use remote_bool::logging::init_tracing;
use remote_bool::{RemoteBool, RemoteBoolConfig, WorkerCommand};

#[derive(Debug, Parser)]
#[command(name = "remote-bool", version, about = "A boolean stored in another process")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a remote boolean, read it, flip it and read it again.
    Demo {
        /// Value stored when the worker starts.
        #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
        initial: bool,

        /// Path to the worker executable [default: next to this binary].
        #[arg(long)]
        worker: Option<PathBuf>,

        /// How often the worker checks that this process is still alive.
        #[arg(long, default_value_t = 1000)]
        poll_interval_us: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    match Cli::parse().command {
        Command::Demo {
            initial,
            worker,
            poll_interval_us,
        } => demo(initial, worker, Duration::from_micros(poll_interval_us)).await,
    }
}

async fn demo(initial: bool, worker: Option<PathBuf>, poll_interval: Duration) -> Result<()> {
    let command = match worker {
        Some(path) => WorkerCommand::new(path),
        None => WorkerCommand::locate(),
    };
    tracing::debug!(program = %command.program().display(), "Using worker");
    let config = RemoteBoolConfig::new(initial)
        .with_poll_interval(poll_interval)
        .with_worker(command);

    println!("Creating remote boolean...");
    let remote = RemoteBool::spawn_with(config)
        .await
        .context("failed to create remote boolean")?;

    report(&remote, initial).await?;

    remote.set_value(!initial).await.context("failed to set value")?;
    report(&remote, !initial).await?;

    remote.close().await.context("failed to close worker")?;
    Ok(())
}

async fn report(remote: &RemoteBool, expected: bool) -> Result<()> {
    let value = remote.get_value().await.context("failed to read value")?;
    println!("====================================");
    println!("Current value = {value}");
    println!("Expects = {expected}");
    anyhow::ensure!(value == expected, "remote value {value} does not match {expected}");
    Ok(())
}
