//! Supervisor configuration

use std::time::Duration;

/// Timing and addressing knobs for a [`crate::Supervisor`]
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Host every readiness probe connects to
    pub host: String,
    /// Deadline of the "already running?" probe
    pub initial_probe_timeout: Duration,
    /// Retry interval of the "already running?" probe
    pub initial_retry_interval: Duration,
    /// Deadline for a freshly spawned process to open its port
    pub verify_timeout: Duration,
    /// Retry interval while verifying a spawned process
    pub verify_retry_interval: Duration,
    /// Time between the graceful signal and SIGKILL
    pub escalation_timeout: Duration,
    /// How long an exited process's output pipes may take to drain
    pub output_drain_timeout: Duration,
    /// Capacity of the failure broadcast channel
    pub failure_channel_capacity: usize,
}

impl SupervisorConfig {
    /// Create configuration with default timings
    pub fn new() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            initial_probe_timeout: Duration::from_millis(100),
            initial_retry_interval: Duration::from_millis(10),
            verify_timeout: Duration::from_millis(5000),
            verify_retry_interval: Duration::from_millis(100),
            escalation_timeout: Duration::from_secs(5),
            output_drain_timeout: Duration::from_millis(250),
            failure_channel_capacity: 64,
        }
    }

    /// Set probe host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the initial probe deadline
    pub fn initial_probe_timeout(mut self, timeout: Duration) -> Self {
        self.initial_probe_timeout = timeout;
        self
    }

    /// Set the initial probe retry interval
    pub fn initial_retry_interval(mut self, interval: Duration) -> Self {
        self.initial_retry_interval = interval;
        self
    }

    /// Set the verification deadline
    pub fn verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    /// Set the verification retry interval
    pub fn verify_retry_interval(mut self, interval: Duration) -> Self {
        self.verify_retry_interval = interval;
        self
    }

    /// Set the graceful-stop window
    pub fn escalation_timeout(mut self, timeout: Duration) -> Self {
        self.escalation_timeout = timeout;
        self
    }

    /// Set the output drain window
    pub fn output_drain_timeout(mut self, timeout: Duration) -> Self {
        self.output_drain_timeout = timeout;
        self
    }

    /// Set how many unread failures a subscriber may fall behind by
    pub fn failure_channel_capacity(mut self, capacity: usize) -> Self {
        self.failure_channel_capacity = capacity;
        self
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::new()
    }
}
