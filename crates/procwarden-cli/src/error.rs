//! CLI error types

use procwarden::SupervisorError;
use thiserror::Error;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            CliError::InvalidArgument { message } => {
                format!(
                    "Invalid argument: {}\n\nRun 'procwarden help' for usage information.",
                    message
                )
            }
            CliError::Supervisor(SupervisorError::Manifest(msg)) => {
                format!("Manifest error: {}\n\nCheck the file passed with --manifest.", msg)
            }
            CliError::Supervisor(SupervisorError::ReadinessTimeout { tag, port, .. }) => {
                format!(
                    "{}\n\nIs '{}' configured to listen on port {}? \
                     Raise [supervisor] verify_timeout_ms if it is just slow.",
                    self, tag, port
                )
            }
            CliError::Supervisor(e) => e.to_string(),
            CliError::Io(e) => format!("Command failed: {}", e),
        }
    }

    /// Get technical details for verbose mode
    pub fn technical_details(&self) -> String {
        format!("{:?}", self)
    }
}

pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_timeout_message_names_port() {
        let err = CliError::from(SupervisorError::ReadinessTimeout {
            tag: "redis".to_string(),
            port: 6390,
            timeout_ms: 5000,
        });
        let message = err.user_message();
        assert!(message.contains("redis"));
        assert!(message.contains("6390"));
    }

    #[test]
    fn test_manifest_message() {
        let err = CliError::from(SupervisorError::Manifest("bad".to_string()));
        assert!(err.user_message().contains("--manifest"));
    }
}
