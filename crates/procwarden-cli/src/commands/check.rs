//! `procwarden check`

use std::path::Path;

use procwarden::{Manifest, PortProbe, ProbeOutcome};

use crate::error::CliResult;
use crate::output::OutputStyle;

/// Probe every manifest port once; exit code 1 if any is unreachable
pub async fn execute(manifest_path: &Path, style: &OutputStyle) -> CliResult<i32> {
    let manifest = Manifest::load(manifest_path)?;
    let config = manifest.supervisor_config();
    let mut unreachable = 0;

    for entry in &manifest.processes {
        let probe = PortProbe::new(config.host.clone(), entry.port)
            .retry_interval(config.initial_retry_interval);
        let line = match probe.probe(config.initial_probe_timeout).await {
            Ok(ProbeOutcome::Ready) => {
                style.success(&format!("{} reachable at {}", style.tag(&entry.tag), probe.addr()))
            }
            Ok(ProbeOutcome::Timeout) => {
                unreachable += 1;
                style.error(&format!("{} not reachable at {}", style.tag(&entry.tag), probe.addr()))
            }
            Err(e) => {
                unreachable += 1;
                style.error(&format!(
                    "{} probe failed at {}: {}",
                    style.tag(&entry.tag),
                    probe.addr(),
                    e
                ))
            }
        };
        println!("{}", line);
    }

    Ok(if unreachable == 0 { 0 } else { 1 })
}
