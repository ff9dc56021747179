//! Error types for process supervision

use std::io;

use nix::sys::signal::Signal;
use thiserror::Error;

use crate::process::ProcessState;

/// Supervision errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A process specification is unusable as given
    #[error("Invalid process specification '{tag}': {reason}")]
    InvalidSpec { tag: String, reason: String },

    /// The subprocess could not be launched
    #[error("Failed to spawn process '{tag}': {source}")]
    Spawn {
        tag: String,
        #[source]
        source: io::Error,
    },

    /// A spawned process never became reachable on its port
    #[error("Process '{tag}' failed to come up at port {port} within {timeout_ms}ms")]
    ReadinessTimeout {
        tag: String,
        port: u16,
        timeout_ms: u64,
    },

    /// A non-daemon process exited while nobody asked it to
    #[error("Process '{tag}' exited ({status}).\nOutput:\n{stdout}\nError:\n{stderr}")]
    UnexpectedExit {
        tag: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    /// The readiness probe hit a network error other than "nobody listening"
    #[error("Readiness probe for '{tag}' at {addr} failed: {source}")]
    Probe {
        tag: String,
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Signal delivery failed
    #[error("Failed to send {signal:?} to '{tag}': {source}")]
    Signal {
        tag: String,
        signal: Signal,
        #[source]
        source: nix::Error,
    },

    /// Operation not allowed in the current lifecycle state
    #[error("Process '{tag}' cannot do that while {state:?}")]
    InvalidState { tag: String, state: ProcessState },

    /// Manifest could not be read, parsed or validated
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<config::ConfigError> for SupervisorError {
    fn from(err: config::ConfigError) -> Self {
        SupervisorError::Manifest(err.to_string())
    }
}

impl From<toml::de::Error> for SupervisorError {
    fn from(err: toml::de::Error) -> Self {
        SupervisorError::Manifest(err.to_string())
    }
}

impl SupervisorError {
    /// Tag of the process the error concerns, if any
    pub fn tag(&self) -> Option<&str> {
        match self {
            SupervisorError::InvalidSpec { tag, .. }
            | SupervisorError::Spawn { tag, .. }
            | SupervisorError::ReadinessTimeout { tag, .. }
            | SupervisorError::UnexpectedExit { tag, .. }
            | SupervisorError::Probe { tag, .. }
            | SupervisorError::Signal { tag, .. }
            | SupervisorError::InvalidState { tag, .. } => Some(tag),
            SupervisorError::Manifest(_) | SupervisorError::Io(_) => None,
        }
    }
}

/// Result type for supervision operations
pub type Result<T> = std::result::Result<T, SupervisorError>;
