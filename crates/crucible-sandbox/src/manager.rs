//! Execution manager: admission, supervision and teardown of sessions.
//!
//! Each started session gets a supervisor task that races the runner's exit
//! against the wall-clock deadline and stop requests, samples resource use on
//! a fixed cadence, and releases the artifact slot once the runner is gone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crucible_core::{
    obs, ExecutionConfig, FailureReason, LimitedResource, ResourceLimits, ResourceUsage, SessionId,
    SessionState, METRICS,
};
use crucible_pipeline::Program;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{ExecError, Result};
use crate::events::{EventCursor, EventKind, EventLog};
use crate::runner::{ExitStatus, IsolatedRunner, RunnerExit, RunnerHandle, RunnerOutput, RunnerSample};
use crate::session::{ExecutionSession, Outcome, SessionCell, SessionHandle};
use crate::vm::VmRunner;

/// How long output forwarding may lag behind the runner's exit.
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, Arc<SessionCell>>,
    /// Artifact digest to the session currently running it.
    running: HashMap<String, SessionId>,
}

struct Inner {
    runner: Arc<dyn IsolatedRunner>,
    config: ExecutionConfig,
    registry: Mutex<Registry>,
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Free the artifact slot, then wake everyone waiting on the session.
    fn release(&self, cell: &SessionCell) {
        {
            let mut registry = self.registry();
            if registry.running.get(&cell.artifact_id) == Some(&cell.id) {
                registry.running.remove(&cell.artifact_id);
            }
        }
        cell.mark_released();
    }
}

/// Ends a Pending session as a runner fault and frees its slot unless
/// disarmed, so a `start` dropped mid-launch leaves nothing behind.
struct PendingLaunch<'a> {
    inner: &'a Inner,
    cell: Arc<SessionCell>,
    armed: bool,
}

impl<'a> PendingLaunch<'a> {
    fn new(inner: &'a Inner, cell: Arc<SessionCell>) -> Self {
        Self { inner, cell, armed: true }
    }

    fn fail(&mut self, message: String) {
        if !std::mem::take(&mut self.armed) {
            return;
        }
        let fault = FailureReason::RunnerFault { message };
        self.cell
            .finish(SessionState::Pending, Outcome::failed(fault, None), ResourceUsage::default());
        self.inner.release(&self.cell);
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingLaunch<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(session = %self.cell.id, "start cancelled while launching");
            self.fail("launch cancelled before the runner started".into());
        }
    }
}

/// Runs compiled programs in isolated sessions.
///
/// Cheap to clone; clones share sessions and capacity.
#[derive(Clone)]
pub struct ExecutionManager {
    inner: Arc<Inner>,
}

impl ExecutionManager {
    pub fn new(runner: Arc<dyn IsolatedRunner>, config: ExecutionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                config,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Manager backed by the in-process interpreter.
    pub fn with_vm(config: ExecutionConfig) -> Self {
        Self::new(Arc::new(VmRunner::new()), config)
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.inner.config
    }

    /// Start executing `program`, with the configured default limits when
    /// `limits` is `None`.
    ///
    /// At most one session per artifact runs at a time. Failures after a
    /// successful start surface through the session's terminal state.
    pub async fn start(&self, program: Arc<Program>, limits: Option<ResourceLimits>) -> Result<SessionHandle> {
        let limits = limits.unwrap_or(self.inner.config.default_limits);
        limits.validate().map_err(ExecError::InvalidLimits)?;
        if program.entry_function().is_none() {
            return Err(ExecError::NoEntryPoint);
        }

        let cell = {
            let mut registry = self.inner.registry();
            if let Some(session) = registry.running.get(&program.digest) {
                return Err(ExecError::SessionConflict {
                    artifact: program.digest.clone(),
                    session: *session,
                });
            }
            if registry.running.len() >= self.inner.config.max_sessions {
                return Err(ExecError::CapacityExceeded {
                    limit: self.inner.config.max_sessions,
                });
            }
            let cell = SessionCell::new(program.digest.clone(), limits);
            registry.running.insert(program.digest.clone(), cell.id);
            registry.sessions.insert(cell.id, Arc::clone(&cell));
            cell
        };
        info!(
            session = %cell.id,
            artifact = %cell.artifact_id,
            cpu_millis = limits.cpu_millis,
            memory_bytes = limits.memory_bytes,
            wall_clock_ms = limits.wall_clock_ms,
            "starting session"
        );

        let mut pending = PendingLaunch::new(&self.inner, Arc::clone(&cell));
        let mut handle = match self.inner.runner.launch(program, limits).await {
            Ok(handle) => handle,
            Err(err) => {
                obs::emit_runner_error(cell.id, &err);
                pending.fail(err.to_string());
                return Err(ExecError::Launch(err));
            }
        };
        pending.disarm();

        cell.transition(SessionState::Pending, SessionState::Running);
        METRICS.inc_sessions_started();
        let output = handle.events();
        tokio::spawn(supervise(
            Arc::clone(&self.inner),
            Arc::clone(&cell),
            Arc::from(handle),
            output,
        ));
        Ok(SessionHandle::new(cell))
    }

    /// Stop a session and wait until its runner is released.
    ///
    /// Stopping an already-ended session returns its final record.
    pub async fn stop(&self, id: SessionId) -> Result<ExecutionSession> {
        let cell = self.cell(id)?;
        if !cell.state().is_terminal() {
            info!(session = %id, "stop requested");
        }
        cell.request_stop();
        cell.released().await;
        Ok(cell.snapshot())
    }

    /// Stop every session that has not ended yet.
    pub async fn stop_all(&self) -> Vec<ExecutionSession> {
        let live: Vec<SessionId> = self
            .inner
            .registry()
            .sessions
            .values()
            .filter(|cell| !cell.state().is_terminal())
            .map(|cell| cell.id)
            .collect();
        let mut stopped = Vec::with_capacity(live.len());
        for id in live {
            if let Ok(session) = self.stop(id).await {
                stopped.push(session);
            }
        }
        stopped
    }

    fn cell(&self, id: SessionId) -> Result<Arc<SessionCell>> {
        self.inner
            .registry()
            .sessions
            .get(&id)
            .cloned()
            .ok_or(ExecError::UnknownSession(id))
    }

    pub fn session(&self, id: SessionId) -> Result<ExecutionSession> {
        Ok(self.cell(id)?.snapshot())
    }

    pub fn handle(&self, id: SessionId) -> Result<SessionHandle> {
        Ok(SessionHandle::new(self.cell(id)?))
    }

    /// Replaying event stream for a session, live or ended.
    pub fn subscribe(&self, id: SessionId) -> Result<EventCursor> {
        Ok(self.cell(id)?.log.cursor())
    }

    /// Sessions currently holding an artifact slot.
    pub fn running(&self) -> Vec<SessionId> {
        self.inner.registry().running.values().copied().collect()
    }

    pub fn sessions(&self) -> Vec<ExecutionSession> {
        let mut all: Vec<ExecutionSession> = self
            .inner
            .registry()
            .sessions
            .values()
            .map(|cell| cell.snapshot())
            .collect();
        all.sort_by_key(|s| s.started_at);
        all
    }

    /// Drop records of ended sessions. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut registry = self.inner.registry();
        let before = registry.sessions.len();
        registry.sessions.retain(|_, cell| !cell.state().is_terminal());
        before - registry.sessions.len()
    }
}

impl std::fmt::Debug for ExecutionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.registry();
        f.debug_struct("ExecutionManager")
            .field("sessions", &registry.sessions.len())
            .field("running", &registry.running.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Supervision
// ---------------------------------------------------------------------------

enum End {
    Exited(RunnerExit),
    Deadline,
    Stop,
}

async fn supervise(
    inner: Arc<Inner>,
    cell: Arc<SessionCell>,
    handle: Arc<dyn RunnerHandle>,
    output: Option<mpsc::UnboundedReceiver<RunnerOutput>>,
) {
    let started = Instant::now();
    let limits = cell.limits;
    let pump = output.map(|rx| tokio::spawn(pump_output(rx, Arc::clone(&cell.log))));
    let sampler = tokio::spawn(sample_loop(
        Arc::clone(&cell),
        Arc::clone(&handle),
        Duration::from_millis(inner.config.sample_interval_ms.max(1)),
        started,
    ));
    let deadline = started + Duration::from_millis(limits.wall_clock_ms);

    let end = tokio::select! {
        biased;
        exit = handle.wait() => End::Exited(exit),
        _ = tokio::time::sleep_until(deadline) => End::Deadline,
        _ = cell.stopping() => End::Stop,
    };

    let (outcome, exit) = match end {
        End::Exited(exit) => (classify(&cell, &exit), exit),
        End::Deadline => {
            debug!(session = %cell.id, wall_clock_ms = limits.wall_clock_ms, "wall clock exhausted");
            handle.kill().await;
            let exit = handle.wait().await;
            METRICS.inc_sessions_timed_out();
            (Outcome::ended(SessionState::TimedOut), exit)
        }
        End::Stop => {
            handle.terminate().await;
            let grace = Duration::from_millis(inner.config.stop_grace_ms);
            let exit = match tokio::time::timeout(grace, handle.wait()).await {
                Ok(exit) => exit,
                Err(_) => {
                    warn!(session = %cell.id, grace_ms = inner.config.stop_grace_ms, "runner ignored terminate, killing");
                    handle.kill().await;
                    handle.wait().await
                }
            };
            (Outcome::ended(SessionState::Cancelled), exit)
        }
    };

    sampler.abort();
    if let Some(pump) = pump {
        if tokio::time::timeout(OUTPUT_DRAIN, pump).await.is_err() {
            debug!(session = %cell.id, "output still open after runner exit, detaching");
        }
    }

    let usage = ResourceUsage {
        cpu_millis_used: exit.sample.cpu_millis,
        peak_memory_bytes: exit.sample.peak_memory_bytes.max(exit.sample.memory_bytes),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    if let ExitStatus::Fault { message } = &exit.status {
        obs::emit_runner_error(cell.id, message);
    }
    info!(
        session = %cell.id,
        state = %outcome.state,
        exit_code = ?outcome.exit_code,
        elapsed_ms = usage.elapsed_ms,
        "session ended"
    );
    cell.finish(SessionState::Running, outcome, usage);
    inner.release(&cell);
}

/// Terminal outcome for a runner that ended without a deadline or stop.
fn classify(cell: &SessionCell, exit: &RunnerExit) -> Outcome {
    let limit_exceeded = |resource| Outcome::failed(FailureReason::ResourceLimitExceeded { resource }, None);
    match &exit.status {
        ExitStatus::Exited { code: 0 } => Outcome::completed(0),
        ExitStatus::Exited { code } => match cell.breach() {
            Some(resource) => limit_exceeded(resource),
            None => Outcome::failed(FailureReason::NonZeroExit { code: *code }, Some(*code)),
        },
        ExitStatus::LimitExceeded { resource } => limit_exceeded(*resource),
        ExitStatus::Killed => match cell.breach() {
            Some(resource) => limit_exceeded(resource),
            None if cell.stop_requested() => Outcome::ended(SessionState::Cancelled),
            None => Outcome::failed(
                FailureReason::RunnerFault {
                    message: "runner was killed outside the manager".into(),
                },
                None,
            ),
        },
        ExitStatus::Fault { message } => Outcome::failed(
            FailureReason::RunnerFault {
                message: message.clone(),
            },
            None,
        ),
    }
}

async fn pump_output(mut rx: mpsc::UnboundedReceiver<RunnerOutput>, log: Arc<EventLog>) {
    while let Some(output) = rx.recv().await {
        let kind = match output {
            RunnerOutput::Stdout(text) => EventKind::Stdout { text },
            RunnerOutput::Stderr(text) => EventKind::Stderr { text },
        };
        if log.push(kind).is_none() {
            break;
        }
    }
}

async fn sample_loop(
    cell: Arc<SessionCell>,
    handle: Arc<dyn RunnerHandle>,
    every: Duration,
    started: Instant,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut previous = (0u64, started);
    loop {
        ticker.tick().await;
        let sample = handle.sample();
        let now = Instant::now();
        let wall_ms = now.duration_since(previous.1).as_millis() as f64;
        let cpu_percent = if wall_ms > 0.0 {
            sample.cpu_millis.saturating_sub(previous.0) as f64 / wall_ms * 100.0
        } else {
            0.0
        };
        previous = (sample.cpu_millis, now);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        cell.log.push(EventKind::MetricSample {
            cpu_percent,
            memory_bytes: sample.memory_bytes,
            elapsed_ms,
        });
        cell.set_usage(ResourceUsage {
            cpu_millis_used: sample.cpu_millis,
            peak_memory_bytes: sample.peak_memory_bytes,
            elapsed_ms,
        });

        if let Some(resource) = breached(&sample, &cell.limits) {
            if cell.record_breach(resource) {
                warn!(session = %cell.id, %resource, "resource limit exceeded, killing runner");
                handle.kill().await;
            }
        }
    }
}

fn breached(sample: &RunnerSample, limits: &ResourceLimits) -> Option<LimitedResource> {
    if sample.peak_memory_bytes.max(sample.memory_bytes) > limits.memory_bytes {
        Some(LimitedResource::Memory)
    } else if sample.cpu_millis > limits.cpu_millis {
        Some(LimitedResource::Cpu)
    } else {
        None
    }
}
