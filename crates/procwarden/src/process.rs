//! Managed subprocess lifecycle

use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SupervisorError};
use crate::exit_guard::DaemonRecord;
use crate::spec::{OutputSink, ProcessSpec};

/// Signal used when graceful stop runs out of time
const FORCE_KILL: Signal = Signal::SIGKILL;

/// Output read buffer size
const READ_CHUNK: usize = 8 * 1024;

/// Lifecycle state of a managed process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Created, nothing spawned
    Idle,
    /// Port was already reachable; nothing spawned
    Adopted,
    /// Spawn in progress
    Starting,
    /// Spawned, waiting for the port
    Verifying,
    /// Spawned and ready
    Running,
    /// Stop requested
    Stopping,
    /// Subprocess gone
    Stopped,
    /// Forked a daemon and exited before the port came up
    Detached,
}

/// How a subprocess exit was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exit after a stop was requested
    Expected,
    /// Daemon fork-and-exit before readiness
    Detached,
    /// Exit nobody asked for
    Unexpected,
}

/// Observed subprocess exit
#[derive(Debug, Clone, Copy)]
pub struct ExitEvent {
    /// Exit status, if it could be collected
    pub status: Option<ExitStatus>,
    /// Classification
    pub kind: ExitKind,
}

/// Result of [`ManagedProcess::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No live subprocess
    NotRunning,
    /// Exited after the graceful signal
    Graceful,
    /// Escalation window elapsed; SIGKILL was sent
    Forced,
}

/// An unexpected exit, with captured output for diagnostics
#[derive(Debug, Clone)]
pub struct ProcessFailure {
    pub tag: String,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl From<ProcessFailure> for SupervisorError {
    fn from(failure: ProcessFailure) -> Self {
        SupervisorError::UnexpectedExit {
            tag: failure.tag,
            status: failure.status,
            stdout: failure.stdout,
            stderr: failure.stderr,
        }
    }
}

/// Supervisor-wide pieces a process reports into
#[derive(Clone)]
pub(crate) struct ProcessContext {
    pub escalation_timeout: Duration,
    pub output_drain_timeout: Duration,
    pub daemons: Arc<Mutex<Vec<DaemonRecord>>>,
    pub failures: broadcast::Sender<ProcessFailure>,
}

#[derive(Debug)]
struct Lifecycle {
    state: ProcessState,
    pid: Option<Pid>,
    shutting_down: bool,
    ready: bool,
}

/// One supervised subprocess
///
/// Created per spec by the supervisor and shared through the registry. A
/// process is started at most once; the exit observer installed by
/// [`ManagedProcess::start`] is the only place that moves it to `Stopped`
/// after a natural exit.
pub struct ManagedProcess {
    spec: ProcessSpec,
    kill_signal: Signal,
    ctx: ProcessContext,
    lifecycle: Mutex<Lifecycle>,
    stdout: Arc<Mutex<String>>,
    stderr: Arc<Mutex<String>>,
    exit_tx: watch::Sender<Option<ExitEvent>>,
}

impl ManagedProcess {
    pub(crate) fn new(spec: ProcessSpec, ctx: ProcessContext) -> Self {
        let (exit_tx, _) = watch::channel(None);
        Self {
            kill_signal: spec.resolved_kill_signal(),
            spec,
            ctx,
            lifecycle: Mutex::new(Lifecycle {
                state: ProcessState::Idle,
                pid: None,
                shutting_down: false,
                ready: false,
            }),
            stdout: Arc::new(Mutex::new(String::new())),
            stderr: Arc::new(Mutex::new(String::new())),
            exit_tx,
        }
    }

    /// Get the tag
    pub fn tag(&self) -> &str {
        &self.spec.tag
    }

    /// Get the spec this process was created from
    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// Get the readiness port
    pub fn port(&self) -> u16 {
        self.spec.port
    }

    /// Get the graceful stop signal
    pub fn kill_signal(&self) -> Signal {
        self.kill_signal
    }

    /// Get the current state
    pub fn state(&self) -> ProcessState {
        self.lifecycle.lock().state
    }

    /// Get the subprocess PID while one is live
    pub fn pid(&self) -> Option<u32> {
        self.live_pid().map(|pid| pid.as_raw() as u32)
    }

    /// Check whether a subprocess handle is live
    pub fn is_alive(&self) -> bool {
        self.live_pid().is_some()
    }

    /// Check whether the process was found running instead of spawned
    pub fn is_adopted(&self) -> bool {
        self.state() == ProcessState::Adopted
    }

    /// Check whether readiness (including the connect hook) completed
    pub fn is_ready(&self) -> bool {
        self.lifecycle.lock().ready
    }

    /// Everything captured from stdout so far
    pub fn stdout(&self) -> String {
        self.stdout.lock().clone()
    }

    /// Everything captured from stderr so far
    pub fn stderr(&self) -> String {
        self.stderr.lock().clone()
    }

    /// Exit event, once the subprocess has exited
    pub fn exit_event(&self) -> Option<ExitEvent> {
        *self.exit_tx.borrow()
    }

    /// Watch for the subprocess exit
    pub fn subscribe_exit(&self) -> watch::Receiver<Option<ExitEvent>> {
        self.exit_tx.subscribe()
    }

    /// Spawn the subprocess
    ///
    /// Wires stdout/stderr into the capture buffers and any sinks, then
    /// installs the exit observer. Must be called within a tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != ProcessState::Idle {
                return Err(SupervisorError::InvalidState {
                    tag: self.spec.tag.clone(),
                    state: lifecycle.state,
                });
            }
            lifecycle.state = ProcessState::Starting;
        }

        debug!(
            tag = %self.spec.tag,
            command = %self.spec.command_line(),
            port = self.spec.port,
            "Spawning process"
        );

        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(tag = %self.spec.tag, error = %e, "Failed to spawn process");
                self.lifecycle.lock().state = ProcessState::Stopped;
                return Err(SupervisorError::Spawn {
                    tag: self.spec.tag.clone(),
                    source: e,
                });
            }
        };

        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(capture(out, Arc::clone(&self.stdout), self.spec.on_stdout.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(capture(err, Arc::clone(&self.stderr), self.spec.on_stderr.clone()));
        }

        let pid = child.id().map(|id| Pid::from_raw(id as i32));
        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.pid = pid;
            lifecycle.state = ProcessState::Verifying;
        }
        info!(tag = %self.spec.tag, pid = ?child.id(), "Process spawned");

        let process = Arc::clone(self);
        tokio::spawn(async move { process.observe_exit(child, readers).await });
        Ok(())
    }

    /// Send `signal` to the subprocess
    ///
    /// Returns `Ok(false)` without doing anything when there is no live
    /// subprocess. SIGKILL returns as soon as it is sent; any other signal
    /// returns once the exit observer has seen the subprocess go.
    pub async fn kill(&self, signal: Signal) -> Result<bool> {
        let mut exits = self.exit_tx.subscribe();
        let Some(pid) = self.live_pid() else {
            return Ok(false);
        };

        debug!(tag = %self.spec.tag, pid = %pid, signal = ?signal, "Sending signal");
        match signal::kill(pid, signal) {
            Ok(()) => {}
            Err(Errno::ESRCH) => debug!(tag = %self.spec.tag, pid = %pid, "Process already gone"),
            Err(source) => {
                return Err(SupervisorError::Signal {
                    tag: self.spec.tag.clone(),
                    signal,
                    source,
                })
            }
        }

        if signal == FORCE_KILL {
            return Ok(true);
        }

        let _ = exits.wait_for(Option::is_some).await;
        Ok(true)
    }

    /// Stop gracefully, escalating to SIGKILL
    ///
    /// Sends the configured kill signal and waits up to the escalation
    /// timeout for the subprocess to exit. If it does not, SIGKILL is sent
    /// and the process counts as stopped immediately.
    pub async fn stop(&self) -> Result<StopOutcome> {
        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.shutting_down = true;
            if lifecycle.pid.is_none() || !is_live_state(lifecycle.state) {
                return Ok(StopOutcome::NotRunning);
            }
            lifecycle.state = ProcessState::Stopping;
        }

        match timeout(self.ctx.escalation_timeout, self.kill(self.kill_signal)).await {
            Ok(result) => {
                result?;
                debug!(tag = %self.spec.tag, "Process stopped");
                Ok(StopOutcome::Graceful)
            }
            Err(_) => {
                warn!(
                    tag = %self.spec.tag,
                    signal = ?self.kill_signal,
                    timeout_ms = self.ctx.escalation_timeout.as_millis() as u64,
                    "Unable to stop process, sending SIGKILL"
                );
                self.kill(FORCE_KILL).await?;
                self.lifecycle.lock().state = ProcessState::Stopped;
                Ok(StopOutcome::Forced)
            }
        }
    }

    /// Send the kill signal without waiting for anything
    ///
    /// Used on the exit path where nothing can be awaited. Returns whether a
    /// signal was delivered.
    pub fn signal_now(&self) -> bool {
        let pid = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.shutting_down = true;
            match lifecycle.pid {
                Some(pid) if is_live_state(lifecycle.state) => pid,
                _ => return false,
            }
        };
        signal::kill(pid, self.kill_signal).is_ok()
    }

    pub(crate) fn mark_adopted(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == ProcessState::Idle {
            lifecycle.state = ProcessState::Adopted;
        }
    }

    /// Returns false, leaving the process not ready, if it already exited
    pub(crate) fn mark_ready(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == ProcessState::Stopped {
            return false;
        }
        lifecycle.ready = true;
        if lifecycle.state == ProcessState::Verifying {
            lifecycle.state = ProcessState::Running;
        }
        true
    }

    /// Failure report built from the captured output
    pub fn failure(&self) -> ProcessFailure {
        ProcessFailure {
            tag: self.spec.tag.clone(),
            status: describe_status(self.exit_event().and_then(|event| event.status)),
            stdout: self.stdout(),
            stderr: self.stderr(),
        }
    }

    fn live_pid(&self) -> Option<Pid> {
        let lifecycle = self.lifecycle.lock();
        lifecycle.pid.filter(|_| is_live_state(lifecycle.state))
    }

    async fn observe_exit(self: Arc<Self>, mut child: Child, readers: Vec<JoinHandle<()>>) {
        let status = match child.wait().await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(tag = %self.spec.tag, error = %e, "Failed to collect exit status");
                None
            }
        };

        // A forked grandchild may hold the pipes open; don't wait on it forever
        let _ = timeout(self.ctx.output_drain_timeout, futures::future::join_all(readers)).await;

        let kind = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.pid = None;
            if lifecycle.shutting_down {
                lifecycle.state = ProcessState::Stopped;
                ExitKind::Expected
            } else if self.spec.daemon && !lifecycle.ready {
                lifecycle.state = ProcessState::Detached;
                ExitKind::Detached
            } else {
                lifecycle.state = ProcessState::Stopped;
                ExitKind::Unexpected
            }
        };

        match kind {
            ExitKind::Expected => {
                debug!(
                    tag = %self.spec.tag,
                    status = %describe_status(status),
                    "Exited during shutdown"
                );
            }
            ExitKind::Detached => {
                if let Some(pid_file) = &self.spec.pid_file {
                    self.ctx.daemons.lock().push(DaemonRecord {
                        tag: self.spec.tag.clone(),
                        pid_file: pid_file.clone(),
                        kill_signal: self.kill_signal,
                    });
                }
                info!(
                    tag = %self.spec.tag,
                    pid_file = ?self.spec.pid_file,
                    "Process daemonized"
                );
            }
            ExitKind::Unexpected => {}
        }

        self.exit_tx.send_replace(Some(ExitEvent { status, kind }));

        if kind == ExitKind::Unexpected {
            let failure = self.failure();
            error!(
                tag = %failure.tag,
                status = %failure.status,
                stderr = %failure.stderr,
                "Process exited unexpectedly"
            );
            let _ = self.ctx.failures.send(failure);
        }
    }
}

impl fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.lifecycle.lock();
        f.debug_struct("ManagedProcess")
            .field("tag", &self.spec.tag)
            .field("state", &lifecycle.state)
            .field("pid", &lifecycle.pid)
            .field("kill_signal", &self.kill_signal)
            .finish()
    }
}

fn is_live_state(state: ProcessState) -> bool {
    matches!(
        state,
        ProcessState::Starting
            | ProcessState::Verifying
            | ProcessState::Running
            | ProcessState::Stopping
    )
}

fn describe_status(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "unknown status".to_string(),
    }
}

fn capture<R>(
    mut reader: R,
    buffer: Arc<Mutex<String>>,
    sink: Option<OutputSink>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let data = &chunk[..n];
                    buffer.lock().push_str(&String::from_utf8_lossy(data));
                    if let Some(sink) = &sink {
                        sink(data);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Instant;

    pub(crate) fn test_context(escalation: Duration) -> ProcessContext {
        let (failures, _) = broadcast::channel(16);
        ProcessContext {
            escalation_timeout: escalation,
            output_drain_timeout: Duration::from_millis(250),
            daemons: Arc::new(Mutex::new(Vec::new())),
            failures,
        }
    }

    fn sh(tag: &str, script: &str) -> ProcessSpec {
        ProcessSpec::from_args(tag, "sh", ["-c", script], 1)
    }

    async fn wait_exit(process: &ManagedProcess) -> ExitEvent {
        let mut exits = process.subscribe_exit();
        let event = timeout(Duration::from_secs(5), exits.wait_for(Option::is_some))
            .await
            .expect("process did not exit")
            .unwrap();
        (*event).unwrap()
    }

    async fn wait_for_output(process: &ManagedProcess, needle: &str) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !process.stdout().contains(needle) {
            assert!(Instant::now() < deadline, "never saw {:?} on stdout", needle);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[test]
    fn test_new_process_is_idle() {
        let process = ManagedProcess::new(
            ProcessSpec::new("idle", "sleep 1", 1),
            test_context(Duration::from_secs(5)),
        );
        assert_eq!(process.state(), ProcessState::Idle);
        assert_eq!(process.kill_signal(), Signal::SIGTERM);
        assert!(process.pid().is_none());
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn test_kill_without_subprocess_is_noop() {
        let process = ManagedProcess::new(
            ProcessSpec::new("idle", "sleep 1", 1),
            test_context(Duration::from_secs(5)),
        );
        assert!(!process.kill(Signal::SIGTERM).await.unwrap());
        assert_eq!(process.stop().await.unwrap(), StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_start_then_stop_gracefully() {
        let process = Arc::new(ManagedProcess::new(
            ProcessSpec::new("sleeper", "sleep 30", 1),
            test_context(Duration::from_secs(5)),
        ));

        process.start().unwrap();
        assert_eq!(process.state(), ProcessState::Verifying);
        assert!(process.pid().is_some());

        let outcome = process.stop().await.unwrap();
        assert_eq!(outcome, StopOutcome::Graceful);
        assert_eq!(process.state(), ProcessState::Stopped);
        assert!(process.pid().is_none());
        assert_eq!(process.exit_event().unwrap().kind, ExitKind::Expected);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let process = Arc::new(ManagedProcess::new(
            ProcessSpec::new("sleeper", "sleep 30", 1),
            test_context(Duration::from_secs(5)),
        ));

        process.start().unwrap();
        assert!(matches!(
            process.start(),
            Err(SupervisorError::InvalidState { .. })
        ));
        process.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_reports_tag() {
        let process = Arc::new(ManagedProcess::new(
            ProcessSpec::new("missing", "/nonexistent/procwarden-binary", 1),
            test_context(Duration::from_secs(5)),
        ));

        match process.start() {
            Err(SupervisorError::Spawn { tag, .. }) => assert_eq!(tag, "missing"),
            other => panic!("expected spawn failure, got {:?}", other),
        }
        assert_eq!(process.state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_unexpected_exit_is_broadcast_with_output() {
        let ctx = test_context(Duration::from_secs(5));
        let mut failures = ctx.failures.subscribe();
        let process = Arc::new(ManagedProcess::new(
            sh("crashy", "echo boom; echo broken >&2; exit 3"),
            ctx,
        ));

        process.start().unwrap();
        let event = wait_exit(&process).await;
        assert_eq!(event.kind, ExitKind::Unexpected);
        assert_eq!(process.state(), ProcessState::Stopped);

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.tag, "crashy");
        assert!(failure.stdout.contains("boom"));
        assert!(failure.stderr.contains("broken"));

        let err: SupervisorError = failure.into();
        assert!(err.to_string().contains("crashy"));
    }

    #[tokio::test]
    async fn test_daemon_exit_records_pid_file() {
        let ctx = test_context(Duration::from_secs(5));
        let daemons = Arc::clone(&ctx.daemons);
        let process = Arc::new(ManagedProcess::new(
            sh("forker", "exit 0").daemon("/tmp/forker.pid"),
            ctx,
        ));

        process.start().unwrap();
        let event = wait_exit(&process).await;

        assert_eq!(event.kind, ExitKind::Detached);
        assert_eq!(process.state(), ProcessState::Detached);
        let records = daemons.lock().clone();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tag, "forker");
        assert_eq!(records[0].kill_signal, Signal::SIGTERM);
    }

    #[tokio::test]
    async fn test_exit_after_ready_is_unexpected_even_for_daemon() {
        let process = Arc::new(ManagedProcess::new(
            sh("late", "sleep 0.3").daemon("/tmp/late.pid"),
            test_context(Duration::from_secs(5)),
        ));

        process.start().unwrap();
        assert!(process.mark_ready());
        assert_eq!(process.state(), ProcessState::Running);

        let event = wait_exit(&process).await;
        assert_eq!(event.kind, ExitKind::Unexpected);
    }

    #[tokio::test]
    async fn test_exited_process_cannot_become_ready() {
        let process = Arc::new(ManagedProcess::new(
            sh("gone", "exit 3"),
            test_context(Duration::from_secs(5)),
        ));

        process.start().unwrap();
        let event = wait_exit(&process).await;
        assert_eq!(event.kind, ExitKind::Unexpected);

        assert!(!process.mark_ready());
        assert!(!process.is_ready());
        assert_eq!(process.state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_escalates_when_term_is_ignored() {
        let escalation = Duration::from_millis(300);
        let process = Arc::new(ManagedProcess::new(
            sh("stubborn", "trap '' TERM; echo armed; while :; do sleep 1; done"),
            test_context(escalation),
        ));

        process.start().unwrap();
        wait_for_output(&process, "armed").await;

        let started = Instant::now();
        let outcome = process.stop().await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(outcome, StopOutcome::Forced);
        assert!(elapsed >= escalation, "escalated early: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(3), "escalated late: {:?}", elapsed);
        assert_eq!(process.state(), ProcessState::Stopped);

        let event = wait_exit(&process).await;
        assert_eq!(event.kind, ExitKind::Expected);
    }

    #[tokio::test]
    async fn test_custom_kill_signal() {
        let process = Arc::new(ManagedProcess::new(
            sh("hup", "trap 'exit 0' HUP; echo armed; while :; do sleep 0.1; done")
                .kill_signal(Signal::SIGHUP),
            test_context(Duration::from_secs(5)),
        ));

        process.start().unwrap();
        wait_for_output(&process, "armed").await;

        assert_eq!(process.stop().await.unwrap(), StopOutcome::Graceful);
    }

    #[tokio::test]
    async fn test_output_sinks_receive_chunks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let process = Arc::new(ManagedProcess::new(
            sh("chatty", "echo hello").on_stdout(move |data| sink.lock().extend_from_slice(data)),
            test_context(Duration::from_secs(5)),
        ));

        process.start().unwrap();
        wait_exit(&process).await;

        assert_eq!(String::from_utf8_lossy(&seen.lock()), "hello\n");
        assert_eq!(process.stdout(), "hello\n");
    }

    #[tokio::test]
    async fn test_signal_now_marks_shutdown() {
        let process = Arc::new(ManagedProcess::new(
            ProcessSpec::new("sleeper", "sleep 30", 1),
            test_context(Duration::from_secs(5)),
        ));

        process.start().unwrap();
        assert!(process.signal_now());

        let event = wait_exit(&process).await;
        assert_eq!(event.kind, ExitKind::Expected);
        assert!(!process.signal_now());
    }
}
