//! `procwarden up`

use std::path::Path;

use procwarden::{Manifest, Supervisor, SupervisorError};

use super::{next_failure, teardown};
use crate::error::{CliError, CliResult};
use crate::output::OutputStyle;

/// Bring the manifest's services up and hold them until Ctrl-C
pub async fn execute(manifest_path: &Path, style: &OutputStyle) -> CliResult<i32> {
    let manifest = Manifest::load(manifest_path)?;
    let supervisor = Supervisor::with_config(manifest.supervisor_config());
    let _guard = supervisor.install_exit_guard();
    let mut failures = supervisor.failures();

    if let Err(e) = supervisor.spawn_multiple(manifest.specs()).await {
        teardown(&supervisor, style).await;
        return Err(e.into());
    }

    for process in supervisor.processes() {
        let how = if process.is_adopted() {
            "adopted".to_string()
        } else {
            match process.pid() {
                Some(pid) => format!("pid {}", pid),
                None => "detached".to_string(),
            }
        };
        println!(
            "{}",
            style.success(&format!(
                "{} on port {} ({})",
                style.tag(process.tag()),
                process.port(),
                how
            ))
        );
    }
    println!("{}", style.info("Press Ctrl-C to stop"));

    let result = tokio::select! {
        Some(failure) = next_failure(&mut failures) => {
            Err(CliError::Supervisor(SupervisorError::from(failure)))
        }
        interrupted = tokio::signal::ctrl_c() => interrupted.map(|_| 0).map_err(CliError::from),
    };

    teardown(&supervisor, style).await;
    result
}
