//! Spawn-or-adopt supervision of a batch of processes

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::{join_all, try_join_all};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError};
use crate::exit_guard::{self, DaemonRecord, ExitGuard};
use crate::probe::{PortProbe, ProbeOutcome};
use crate::process::{ExitKind, ManagedProcess, ProcessContext, ProcessFailure};
use crate::registry::ProcessRegistry;
use crate::spec::{ConnectHook, ProcessSpec};

struct Shared {
    config: SupervisorConfig,
    registry: RwLock<ProcessRegistry>,
    daemons: Arc<Mutex<Vec<DaemonRecord>>>,
    failures: broadcast::Sender<ProcessFailure>,
    cleaned_up: AtomicBool,
    guard_installed: AtomicBool,
}

/// Owns the process registry and drives every lifecycle operation
///
/// Cloning is cheap; clones share the same registry.
///
/// ```no_run
/// use procwarden::{ProcessSpec, Supervisor};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let supervisor = Supervisor::new();
/// let _guard = supervisor.install_exit_guard();
///
/// supervisor
///     .spawn_multiple(vec![ProcessSpec::new("redis", "redis-server --port 6390", 6390)])
///     .await?;
///
/// // ... run tests against 127.0.0.1:6390 ...
///
/// supervisor.cleanup().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    /// Create a supervisor with default configuration
    pub fn new() -> Self {
        Self::with_config(SupervisorConfig::default())
    }

    /// Create a supervisor with custom configuration
    pub fn with_config(config: SupervisorConfig) -> Self {
        let (failures, _) = broadcast::channel(config.failure_channel_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                registry: RwLock::new(ProcessRegistry::new()),
                daemons: Arc::new(Mutex::new(Vec::new())),
                failures,
                cleaned_up: AtomicBool::new(false),
                guard_installed: AtomicBool::new(false),
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &SupervisorConfig {
        &self.shared.config
    }

    /// Bring every spec up, spawning only what is not already listening
    ///
    /// All specs proceed concurrently. Returns once every one of them is
    /// reachable and its connect hook (if any) has completed, or with the
    /// first fatal error. There is no partial success: on error, processes
    /// that were already spawned stay registered for [`Supervisor::cleanup`].
    pub async fn spawn_multiple(&self, specs: Vec<ProcessSpec>) -> Result<()> {
        let mut seen = HashSet::new();
        for spec in &specs {
            spec.validate()?;
            if !seen.insert(spec.tag.as_str()) {
                return Err(SupervisorError::InvalidSpec {
                    tag: spec.tag.clone(),
                    reason: "tag appears more than once in the batch".to_string(),
                });
            }
        }

        debug!(count = specs.len(), "Starting processes");
        try_join_all(specs.into_iter().map(|spec| self.bring_up(spec))).await?;
        info!("All processes ready");

        // Complete on a later poll than the final readiness event
        tokio::task::yield_now().await;
        Ok(())
    }

    /// Latest process registered under `tag`
    pub fn tagged(&self, tag: &str) -> Option<Arc<ManagedProcess>> {
        self.shared.registry.read().tagged(tag)
    }

    /// All processes created so far, in creation order
    pub fn processes(&self) -> Vec<Arc<ManagedProcess>> {
        self.shared.registry.read().all().to_vec()
    }

    /// Subscribe to unexpected exits
    pub fn failures(&self) -> broadcast::Receiver<ProcessFailure> {
        self.shared.failures.subscribe()
    }

    /// Daemons recorded so far
    pub fn daemon_records(&self) -> Vec<DaemonRecord> {
        self.shared.daemons.lock().clone()
    }

    /// Whether [`Supervisor::cleanup`] has completed
    pub fn is_cleaned_up(&self) -> bool {
        self.shared.cleaned_up.load(Ordering::SeqCst)
    }

    /// Stop every process with a live subprocess, concurrently
    ///
    /// Waits for all stops to finish and reports the first error, if any.
    /// Adopted and daemonized processes are left alone; daemons are handled
    /// by [`Supervisor::kill_daemons`].
    pub async fn cleanup(&self) -> Result<()> {
        let targets = self.shared.registry.read().live();
        debug!(count = targets.len(), "Cleaning up processes");

        let results = join_all(targets.iter().map(|process| process.stop())).await;
        self.shared.cleaned_up.store(true, Ordering::SeqCst);

        for (process, result) in targets.iter().zip(&results) {
            if let Ok(outcome) = result {
                debug!(tag = %process.tag(), outcome = ?outcome, "Stopped");
            }
        }
        results.into_iter().find_map(|result| result.err()).map_or(Ok(()), Err)
    }

    /// Synchronous best-effort signal pass for exit hooks
    ///
    /// No-op if [`Supervisor::cleanup`] already completed. Otherwise sends
    /// each live process its kill signal without waiting. Returns whether the
    /// pass ran.
    pub fn cleanup_of_last_resort(&self) -> bool {
        if self.is_cleaned_up() {
            return false;
        }

        warn!("Cleaning up processes that weren't cleaned up yet");
        let targets = self.shared.registry.read().live();
        for process in &targets {
            if !process.signal_now() {
                debug!(tag = %process.tag(), "Last-resort signal not delivered");
            }
        }
        true
    }

    /// Signal every recorded daemon through its PID file
    ///
    /// Failures (missing file, process already gone) are swallowed. Returns
    /// how many signals were delivered.
    pub fn kill_daemons(&self) -> usize {
        let records = self.daemon_records();
        exit_guard::kill_daemons(&records)
    }

    /// Arm the exit guard for this supervisor
    ///
    /// Only the first call returns an armed guard; later calls return a
    /// guard that does nothing on drop.
    pub fn install_exit_guard(&self) -> ExitGuard {
        if self.shared.guard_installed.swap(true, Ordering::SeqCst) {
            debug!("Exit guard already installed");
            return ExitGuard::inert();
        }
        ExitGuard::armed(self.clone())
    }

    fn register(&self, spec: ProcessSpec) -> Arc<ManagedProcess> {
        let ctx = ProcessContext {
            escalation_timeout: self.shared.config.escalation_timeout,
            output_drain_timeout: self.shared.config.output_drain_timeout,
            daemons: Arc::clone(&self.shared.daemons),
            failures: self.shared.failures.clone(),
        };
        let process = Arc::new(ManagedProcess::new(spec, ctx));

        if let Some(previous) = self.shared.registry.write().insert(Arc::clone(&process)) {
            if previous.is_alive() {
                warn!(
                    tag = %previous.tag(),
                    pid = ?previous.pid(),
                    "Replacing tag whose subprocess is still running; it stays tracked for cleanup"
                );
            }
        }
        process
    }

    async fn bring_up(&self, spec: ProcessSpec) -> Result<()> {
        let config = &self.shared.config;
        let hook = spec.on_connect.clone();
        let process = self.register(spec);

        let initial = PortProbe::new(config.host.clone(), process.port())
            .retry_interval(config.initial_retry_interval);
        let outcome = initial
            .probe(config.initial_probe_timeout)
            .await
            .map_err(|source| probe_error(&process, &initial, source))?;

        match outcome {
            ProbeOutcome::Ready => {
                process.mark_adopted();
                info!(tag = %process.tag(), port = process.port(), "Adopted running process");
            }
            ProbeOutcome::Timeout => {
                process.start()?;
                self.await_reachable(&process).await?;
            }
        }
        debug!(tag = %process.tag(), "UP (TCP connect)");

        if let Some(hook) = hook {
            self.run_hook(&process, hook).await?;
        }

        if !process.mark_ready() {
            return Err(exited_before_ready(&process).await);
        }
        info!(tag = %process.tag(), port = process.port(), "Process ready");
        Ok(())
    }

    /// Run the connect hook, racing the subprocess exit
    ///
    /// An unexpected exit while the hook runs fails the spec; the hook future
    /// is dropped. A daemon's fork-and-exit does not interrupt it.
    async fn run_hook(&self, process: &Arc<ManagedProcess>, hook: ConnectHook) -> Result<()> {
        let started = Instant::now();
        let mut connected = hook(Arc::clone(process));
        let mut exits = process.subscribe_exit();
        let mut watching = true;

        loop {
            tokio::select! {
                _ = &mut connected => break,
                exited = exits.wait_for(Option::is_some), if watching => {
                    let kind = match exited {
                        Ok(event) => (*event).map(|event| event.kind),
                        Err(_) => None,
                    };
                    watching = false;
                    if kind == Some(ExitKind::Unexpected) {
                        warn!(tag = %process.tag(), "Process exited during connect hook");
                        return Err(process.failure().into());
                    }
                }
            }
        }

        debug!(
            tag = %process.tag(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Connect hook completed"
        );
        Ok(())
    }

    /// Probe a freshly spawned process, racing its exit
    ///
    /// A daemon exiting here is its fork; the probe keeps going. Any other
    /// exit is fatal.
    async fn await_reachable(&self, process: &Arc<ManagedProcess>) -> Result<()> {
        let config = &self.shared.config;
        let probe = PortProbe::new(config.host.clone(), process.port())
            .retry_interval(config.verify_retry_interval);

        let verify = probe.probe(config.verify_timeout);
        tokio::pin!(verify);

        let mut exits = process.subscribe_exit();
        let mut watching = true;

        loop {
            tokio::select! {
                outcome = &mut verify => {
                    return match outcome.map_err(|source| probe_error(process, &probe, source))? {
                        ProbeOutcome::Ready => Ok(()),
                        ProbeOutcome::Timeout => Err(SupervisorError::ReadinessTimeout {
                            tag: process.tag().to_string(),
                            port: process.port(),
                            timeout_ms: config.verify_timeout.as_millis() as u64,
                        }),
                    };
                }
                exited = exits.wait_for(Option::is_some), if watching => {
                    let kind = match exited {
                        Ok(event) => (*event).map(|event| event.kind),
                        Err(_) => None,
                    };
                    watching = false;
                    match kind {
                        Some(ExitKind::Unexpected) => return Err(process.failure().into()),
                        Some(ExitKind::Detached) => {
                            debug!(
                                tag = %process.tag(),
                                "Parent exited after fork, waiting for daemon port"
                            );
                        }
                        Some(ExitKind::Expected) | None => {}
                    }
                }
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Error for a process found stopped when it was about to become ready
async fn exited_before_ready(process: &ManagedProcess) -> SupervisorError {
    // The state flips before the exit event is published
    let mut exits = process.subscribe_exit();
    let kind = match exits.wait_for(Option::is_some).await {
        Ok(event) => (*event).map(|event| event.kind),
        Err(_) => None,
    };
    match kind {
        Some(ExitKind::Unexpected) => process.failure().into(),
        _ => SupervisorError::InvalidState {
            tag: process.tag().to_string(),
            state: process.state(),
        },
    }
}

fn probe_error(
    process: &ManagedProcess,
    probe: &PortProbe,
    source: std::io::Error,
) -> SupervisorError {
    SupervisorError::Probe {
        tag: process.tag().to_string(),
        addr: probe.addr(),
        source,
    }
}
