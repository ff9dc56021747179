//! # procwarden
//!
//! **Purpose**: Start-or-adopt supervision of the helper processes a program
//! depends on
//!
//! Each process is identified by a tag and a TCP port. If something already
//! listens on the port it is adopted as-is; otherwise the process is spawned
//! and the port is probed until it opens. Everything spawned is stopped again
//! on cleanup, and daemons that fork away are signalled through their PID
//! files when the parent exits.
//!
//! ## Features
//!
//! - **Readiness Probing**: TCP-connect probes with retry and deadline
//! - **Spawn or Adopt**: Already-running services are reused, not respawned
//! - **Graceful Shutdown**: Kill signal→SIGKILL escalation after a timeout
//! - **Output Capture**: Stdout/stderr buffered for diagnostics, optional sinks
//! - **Daemon Tracking**: Fork-and-exit processes tracked by PID file
//! - **Exit Guard**: Synchronous best-effort cleanup when the parent exits
//!
//! ## Usage
//!
//! ```rust,no_run
//! use procwarden::{ProcessSpec, Supervisor};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let supervisor = Supervisor::new();
//! let _guard = supervisor.install_exit_guard();
//!
//! supervisor
//!     .spawn_multiple(vec![
//!         ProcessSpec::new("redis", "redis-server --port 6390", 6390),
//!         ProcessSpec::new("mysql", "mysqld_safe", 3306).daemon("/tmp/mysqld.pid"),
//!     ])
//!     .await?;
//!
//! let redis = supervisor.tagged("redis").expect("registered");
//! println!("redis adopted: {}", redis.is_adopted());
//!
//! supervisor.cleanup().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Unix only: process control is signal based.

pub mod config;
pub mod error;
pub mod exit_guard;
pub mod manifest;
pub mod probe;
pub mod process;
pub mod registry;
pub mod spec;
pub mod supervisor;

pub use config::SupervisorConfig;
pub use error::{Result, SupervisorError};
pub use exit_guard::{DaemonRecord, ExitGuard};
pub use manifest::Manifest;
pub use nix::sys::signal::Signal;
pub use probe::{PortProbe, ProbeOutcome};
pub use process::{ExitEvent, ExitKind, ManagedProcess, ProcessFailure, ProcessState, StopOutcome};
pub use registry::ProcessRegistry;
pub use spec::ProcessSpec;
pub use supervisor::Supervisor;
