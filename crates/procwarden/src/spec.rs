//! Process specifications

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use nix::sys::signal::Signal;

use crate::error::{Result, SupervisorError};
use crate::process::ManagedProcess;

/// Async hook run once the port is reachable, before the process counts as ready
pub type ConnectHook = Arc<dyn Fn(Arc<ManagedProcess>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Receiver for raw subprocess output chunks
pub type OutputSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Description of one supervised process
#[derive(Clone)]
pub struct ProcessSpec {
    /// Unique identifier
    pub tag: String,
    /// Executable
    pub program: String,
    /// Executable arguments
    pub args: Vec<String>,
    /// TCP port whose reachability means "ready"
    pub port: u16,
    /// Signal used for graceful stop (None = SIGTERM)
    pub kill_signal: Option<Signal>,
    /// Process forks a long-lived child and exits
    pub daemon: bool,
    /// Where a daemon writes its real PID
    pub pid_file: Option<PathBuf>,
    /// Readiness hook
    pub on_connect: Option<ConnectHook>,
    /// Stdout sink
    pub on_stdout: Option<OutputSink>,
    /// Stderr sink
    pub on_stderr: Option<OutputSink>,
}

impl ProcessSpec {
    /// Create a spec from a command line
    ///
    /// The command is split on whitespace; quoting is not interpreted. Use
    /// [`ProcessSpec::from_args`] for arguments that contain spaces.
    pub fn new(tag: impl Into<String>, cmd: &str, port: u16) -> Self {
        let (program, args) = split_command(cmd);
        Self::from_args(tag, program, args, port)
    }

    /// Create a spec from an explicit program and argument list
    pub fn from_args<I, S>(
        tag: impl Into<String>,
        program: impl Into<String>,
        args: I,
        port: u16,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tag: tag.into(),
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            port,
            kill_signal: None,
            daemon: false,
            pid_file: None,
            on_connect: None,
            on_stdout: None,
            on_stderr: None,
        }
    }

    /// Set the graceful stop signal
    pub fn kill_signal(mut self, signal: Signal) -> Self {
        self.kill_signal = Some(signal);
        self
    }

    /// Declare the process as daemonizing, writing its PID to `pid_file`
    pub fn daemon(mut self, pid_file: impl Into<PathBuf>) -> Self {
        self.daemon = true;
        self.pid_file = Some(pid_file.into());
        self
    }

    /// Run `hook` once the port is reachable; readiness waits for it
    pub fn on_connect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<ManagedProcess>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_connect = Some(Arc::new(move |process| -> BoxFuture<'static, ()> {
            Box::pin(hook(process))
        }));
        self
    }

    /// Forward stdout chunks to `sink`
    pub fn on_stdout<F>(mut self, sink: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.on_stdout = Some(Arc::new(sink));
        self
    }

    /// Forward stderr chunks to `sink`
    pub fn on_stderr<F>(mut self, sink: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.on_stderr = Some(Arc::new(sink));
        self
    }

    /// Graceful stop signal after defaulting
    pub fn resolved_kill_signal(&self) -> Signal {
        self.kill_signal.unwrap_or(Signal::SIGTERM)
    }

    /// Program and arguments joined for display
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Check the spec is usable
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| SupervisorError::InvalidSpec {
            tag: self.tag.clone(),
            reason: reason.to_string(),
        };

        if self.tag.trim().is_empty() {
            return Err(invalid("tag must not be empty"));
        }
        if self.program.is_empty() {
            return Err(invalid("command must not be empty"));
        }
        if self.port == 0 {
            return Err(invalid("port must be non-zero"));
        }
        if self.daemon && self.pid_file.is_none() {
            return Err(invalid("daemon processes require a pid file"));
        }
        Ok(())
    }
}

impl fmt::Debug for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSpec")
            .field("tag", &self.tag)
            .field("program", &self.program)
            .field("args", &self.args)
            .field("port", &self.port)
            .field("kill_signal", &self.kill_signal)
            .field("daemon", &self.daemon)
            .field("pid_file", &self.pid_file)
            .field("on_connect", &self.on_connect.is_some())
            .field("on_stdout", &self.on_stdout.is_some())
            .field("on_stderr", &self.on_stderr.is_some())
            .finish()
    }
}

/// Split a command line into program and arguments on whitespace
pub fn split_command(cmd: &str) -> (String, Vec<String>) {
    let mut parts = cmd.split_whitespace().map(str::to_string);
    let program = parts.next().unwrap_or_default();
    (program, parts.collect())
}

/// Parse a signal name such as `SIGTERM`, `term` or `Int`
pub fn parse_signal(name: &str) -> Option<Signal> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };
    Signal::from_str(&full).ok()
}
