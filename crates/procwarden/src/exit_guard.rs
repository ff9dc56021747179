//! Exit-time cleanup
//!
//! Nothing here may wait: at parent exit there is no event loop left to
//! drive timers, so every action is a single fire-and-forget signal and
//! every failure is swallowed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::debug;

use crate::supervisor::Supervisor;

/// A daemonized process known only through the PID file it wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonRecord {
    /// Tag of the spec that forked it
    pub tag: String,
    /// File holding the daemon's decimal PID
    pub pid_file: PathBuf,
    /// Signal to send at exit
    pub kill_signal: Signal,
}

impl DaemonRecord {
    /// Read the PID and signal it
    pub fn signal(&self) -> io::Result<Pid> {
        let pid = read_pid_file(&self.pid_file)?;
        signal::kill(pid, self.kill_signal).map_err(io::Error::from)?;
        Ok(pid)
    }
}

/// Parse a PID file holding a decimal integer
///
/// Zero and negative values are rejected: `kill(2)` would treat them as
/// process-group targets.
pub fn read_pid_file(path: &Path) -> io::Result<Pid> {
    let text = fs::read_to_string(path)?;
    let raw: i32 = text
        .trim()
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if raw <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("refusing non-positive pid {}", raw),
        ));
    }
    Ok(Pid::from_raw(raw))
}

/// Signal every daemon in `records`, returning how many signals were delivered
pub(crate) fn kill_daemons(records: &[DaemonRecord]) -> usize {
    records
        .iter()
        .filter(|record| match record.signal() {
            Ok(pid) => {
                debug!(
                    tag = %record.tag,
                    pid = %pid,
                    signal = ?record.kill_signal,
                    "Signalled daemon"
                );
                true
            }
            Err(e) => {
                debug!(
                    tag = %record.tag,
                    pid_file = %record.pid_file.display(),
                    error = %e,
                    "Daemon cleanup skipped"
                );
                false
            }
        })
        .count()
}

/// Runs last-resort cleanup when dropped
///
/// Hold it in `main` for as long as supervised processes should live. On drop
/// it signals every managed process that was not stopped through
/// [`Supervisor::cleanup`] and every recorded daemon.
#[must_use = "cleanup runs when the guard is dropped"]
pub struct ExitGuard {
    supervisor: Option<Supervisor>,
}

impl ExitGuard {
    pub(crate) fn armed(supervisor: Supervisor) -> Self {
        Self {
            supervisor: Some(supervisor),
        }
    }

    pub(crate) fn inert() -> Self {
        Self { supervisor: None }
    }

    /// Whether dropping this guard does anything
    pub fn is_armed(&self) -> bool {
        self.supervisor.is_some()
    }

    /// Drop without cleaning up
    pub fn disarm(mut self) {
        self.supervisor = None;
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.cleanup_of_last_resort();
            supervisor.kill_daemons();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn pid_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn test_read_pid_file_trims_whitespace() {
        let file = pid_file("4242\n");
        assert_eq!(read_pid_file(file.path()).unwrap(), Pid::from_raw(4242));
    }

    #[test]
    fn test_read_pid_file_rejects_garbage() {
        let file = pid_file("not-a-pid");
        let err = read_pid_file(file.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_read_pid_file_rejects_group_targets() {
        assert!(read_pid_file(pid_file("0").path()).is_err());
        assert!(read_pid_file(pid_file("-1").path()).is_err());
    }

    #[test]
    fn test_kill_daemons_swallows_missing_files() {
        let records = vec![DaemonRecord {
            tag: "gone".to_string(),
            pid_file: PathBuf::from("/nonexistent/procwarden/daemon.pid"),
            kill_signal: Signal::SIGTERM,
        }];
        assert_eq!(kill_daemons(&records), 0);
    }

    #[test]
    fn test_kill_daemons_signals_live_pid() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let file = pid_file(&child.id().to_string());

        let records = vec![DaemonRecord {
            tag: "sleeper".to_string(),
            pid_file: file.path().to_path_buf(),
            kill_signal: Signal::SIGTERM,
        }];

        assert_eq!(kill_daemons(&records), 1);
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
