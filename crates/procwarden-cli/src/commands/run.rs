//! `procwarden run`

use std::path::Path;

use procwarden::{Manifest, ProcessFailure, Supervisor, SupervisorError};
use tokio::process::Command;
use tracing::{debug, info};

use super::{next_failure, teardown};
use crate::error::{CliError, CliResult};
use crate::output::OutputStyle;

/// Exit code used when interrupted by Ctrl-C
const INTERRUPTED: i32 = 130;

enum Outcome {
    Finished(std::io::Result<std::process::ExitStatus>),
    ServiceDied(ProcessFailure),
    Interrupted,
}

/// Bring the manifest's services up, run `command`, tear everything down
pub async fn execute(
    manifest_path: &Path,
    command: &[String],
    style: &OutputStyle,
) -> CliResult<i32> {
    let (program, args) = command.split_first().ok_or_else(|| CliError::InvalidArgument {
        message: "no command given after --".to_string(),
    })?;

    let manifest = Manifest::load(manifest_path)?;
    let supervisor = Supervisor::with_config(manifest.supervisor_config());
    let _guard = supervisor.install_exit_guard();
    let mut failures = supervisor.failures();

    if let Err(e) = supervisor.spawn_multiple(manifest.specs()).await {
        teardown(&supervisor, style).await;
        return Err(e.into());
    }
    println!(
        "{}",
        style.success(&format!("{} service(s) ready", manifest.processes.len()))
    );

    info!(program = %program, "Running command");
    let mut child = match Command::new(program).args(args).kill_on_drop(true).spawn() {
        Ok(child) => child,
        Err(e) => {
            teardown(&supervisor, style).await;
            return Err(e.into());
        }
    };

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Finished(status),
        Some(failure) = next_failure(&mut failures) => Outcome::ServiceDied(failure),
        _ = tokio::signal::ctrl_c() => Outcome::Interrupted,
    };

    let result = match outcome {
        Outcome::Finished(status) => status.map(|s| s.code().unwrap_or(1)).map_err(CliError::from),
        Outcome::ServiceDied(failure) => {
            eprintln!(
                "{}",
                style.error(&format!(
                    "{} died while the command was running",
                    style.tag(&failure.tag)
                ))
            );
            let _ = child.kill().await;
            Err(CliError::Supervisor(SupervisorError::from(failure)))
        }
        Outcome::Interrupted => {
            debug!("Interrupted");
            let _ = child.kill().await;
            Ok(INTERRUPTED)
        }
    };

    teardown(&supervisor, style).await;
    result
}
