//! Session records and their lifecycle.
//!
//! State lives in an atomic and only moves forward:
//!
//! ```text
//! Pending -> Running -> Completed | Failed | Cancelled | TimedOut
//! Pending -> Failed                     (launch failure)
//! ```
//!
//! Every transition is a compare-and-swap, so a stop racing a natural exit
//! resolves to exactly one terminal state.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use crucible_core::{
    obs, FailureReason, LimitedResource, ResourceLimits, ResourceUsage, SessionId, SessionState,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::events::{EventCursor, EventKind, EventLog, ExecEvent};

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSession {
    pub id: SessionId,
    /// Digest of the executed program.
    pub artifact_id: String,
    pub state: SessionState,
    pub limits: ResourceLimits,
    /// Present once the program exited on its own.
    pub exit_code: Option<i32>,
    /// Present when `state` is `Failed`.
    pub failure: Option<FailureReason>,
    pub usage: ResourceUsage,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Outcome {
    pub state: SessionState,
    pub exit_code: Option<i32>,
    pub failure: Option<FailureReason>,
}

impl Outcome {
    pub fn completed(code: i32) -> Self {
        Self {
            state: SessionState::Completed,
            exit_code: Some(code),
            failure: None,
        }
    }

    pub fn failed(failure: FailureReason, exit_code: Option<i32>) -> Self {
        Self {
            state: SessionState::Failed,
            exit_code,
            failure: Some(failure),
        }
    }

    pub fn ended(state: SessionState) -> Self {
        Self {
            state,
            exit_code: None,
            failure: None,
        }
    }
}

#[derive(Debug)]
struct Record {
    exit_code: Option<i32>,
    failure: Option<FailureReason>,
    usage: ResourceUsage,
    finished_at: Option<DateTime<Utc>>,
    breach: Option<LimitedResource>,
}

/// Shared state of one session, owned by the manager's registry and its
/// supervisor task.
pub(crate) struct SessionCell {
    pub id: SessionId,
    pub artifact_id: String,
    pub limits: ResourceLimits,
    pub started_at: DateTime<Utc>,
    state: AtomicU8,
    record: Mutex<Record>,
    pub log: Arc<EventLog>,
    stop: watch::Sender<bool>,
    released: watch::Sender<bool>,
}

impl SessionCell {
    pub fn new(artifact_id: String, limits: ResourceLimits) -> Arc<Self> {
        let (stop, _) = watch::channel(false);
        let (released, _) = watch::channel(false);
        Arc::new(Self {
            id: SessionId::new(),
            artifact_id,
            limits,
            started_at: Utc::now(),
            state: AtomicU8::new(SessionState::Pending.as_u8()),
            record: Mutex::new(Record {
                exit_code: None,
                failure: None,
                usage: ResourceUsage::default(),
                finished_at: None,
                breach: None,
            }),
            log: EventLog::new(),
            stop,
            released,
        })
    }

    fn record(&self) -> MutexGuard<'_, Record> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(SessionState::Failed)
    }

    fn swap(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn announce(&self, from: SessionState, to: SessionState) {
        self.log.push(EventKind::StateChanged { from, to });
        obs::emit_session_transition(self.id, from, to);
    }

    /// Move `from -> to`. `false` when the session was not in `from`.
    pub fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let moved = self.swap(from, to);
        if moved {
            self.announce(from, to);
        }
        moved
    }

    /// Make the session terminal with `outcome`, then close the event log.
    /// `false` when the session was not in `from`.
    pub fn finish(&self, from: SessionState, outcome: Outcome, usage: ResourceUsage) -> bool {
        let to = outcome.state;
        let moved = {
            // Snapshots read the record under this lock, so they never see
            // the terminal state without its outcome.
            let mut record = self.record();
            let moved = self.swap(from, to);
            if moved {
                record.exit_code = outcome.exit_code;
                record.failure = outcome.failure;
                record.usage = usage;
                record.finished_at = Some(Utc::now());
            }
            moved
        };
        if moved {
            self.announce(from, to);
        }
        self.log.close();
        moved
    }

    pub fn set_usage(&self, usage: ResourceUsage) {
        self.record().usage = usage;
    }

    /// Remember the first limit the session overran.
    pub fn record_breach(&self, resource: LimitedResource) -> bool {
        let mut record = self.record();
        if record.breach.is_some() {
            return false;
        }
        record.breach = Some(resource);
        true
    }

    pub fn breach(&self) -> Option<LimitedResource> {
        self.record().breach
    }

    pub fn request_stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// Resolves once a stop has been requested.
    pub async fn stopping(&self) {
        let mut rx = self.stop.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }

    /// Signal that the session's runner and registry slot are released.
    pub fn mark_released(&self) {
        self.released.send_replace(true);
    }

    pub async fn released(&self) {
        let mut rx = self.released.subscribe();
        let _ = rx.wait_for(|released| *released).await;
    }

    pub fn snapshot(&self) -> ExecutionSession {
        let record = self.record();
        let state = self.state();
        ExecutionSession {
            id: self.id,
            artifact_id: self.artifact_id.clone(),
            state,
            limits: self.limits,
            exit_code: record.exit_code,
            failure: record.failure.clone(),
            usage: record.usage,
            started_at: self.started_at,
            finished_at: record.finished_at,
        }
    }
}

/// Caller-side view of a session.
#[derive(Clone)]
pub struct SessionHandle {
    cell: Arc<SessionCell>,
}

impl SessionHandle {
    pub(crate) fn new(cell: Arc<SessionCell>) -> Self {
        Self { cell }
    }

    pub fn id(&self) -> SessionId {
        self.cell.id
    }

    pub fn state(&self) -> SessionState {
        self.cell.state()
    }

    pub fn snapshot(&self) -> ExecutionSession {
        self.cell.snapshot()
    }

    /// Every event from the first, then live ones until the session ends.
    pub fn subscribe(&self) -> EventCursor {
        self.cell.log.cursor()
    }

    /// Events emitted so far.
    pub fn events(&self) -> Vec<ExecEvent> {
        self.cell.log.snapshot()
    }

    /// Wait for the session to end and its resources to be released.
    pub async fn wait(&self) -> ExecutionSession {
        self.cell.released().await;
        self.cell.snapshot()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.cell.id)
            .field("state", &self.cell.state())
            .finish()
    }
}
