//! Command definitions and dispatch

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use procwarden::{ProcessFailure, Supervisor};
use tokio::sync::broadcast;

use crate::error::CliResult;
use crate::output::OutputStyle;

pub mod check;
pub mod run;
pub mod up;

/// Default manifest location
pub const DEFAULT_MANIFEST: &str = "procwarden.toml";

#[derive(Parser, Debug)]
#[command(name = "procwarden", version, about = "Supervise the services a command depends on")]
pub struct Cli {
    /// Show every probe, signal and exit (also PROCWARDEN_VERBOSE=1)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only show warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bring services up, run a command, then tear the services down
    Run {
        /// Manifest describing the services
        #[arg(short, long, default_value = DEFAULT_MANIFEST)]
        manifest: PathBuf,

        /// Program and arguments to run once everything is ready
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Bring services up and keep them running until Ctrl-C
    Up {
        /// Manifest describing the services
        #[arg(short, long, default_value = DEFAULT_MANIFEST)]
        manifest: PathBuf,
    },

    /// Report which services are already reachable
    Check {
        /// Manifest describing the services
        #[arg(short, long, default_value = DEFAULT_MANIFEST)]
        manifest: PathBuf,
    },
}

/// Execute a parsed command, returning the process exit code
pub async fn dispatch(command: Command, style: &OutputStyle) -> CliResult<i32> {
    match command {
        Command::Run { manifest, command } => run::execute(&manifest, &command, style).await,
        Command::Up { manifest } => up::execute(&manifest, style).await,
        Command::Check { manifest } => check::execute(&manifest, style).await,
    }
}

/// Next unexpected exit; `None` once the supervisor is gone
pub(crate) async fn next_failure(
    failures: &mut broadcast::Receiver<ProcessFailure>,
) -> Option<ProcessFailure> {
    loop {
        match failures.recv().await {
            Ok(failure) => return Some(failure),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Stop everything, reporting but not propagating cleanup errors
pub(crate) async fn teardown(supervisor: &Supervisor, style: &OutputStyle) {
    if let Err(e) = supervisor.cleanup().await {
        eprintln!("{}", style.warning(&format!("Cleanup incomplete: {}", e)));
    }
}
