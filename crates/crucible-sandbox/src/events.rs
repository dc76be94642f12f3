//! Per-session append-only event log with replaying cursors.
//!
//! Every cursor starts at sequence 0, so a subscriber that attaches late
//! still sees everything the session emitted. A cursor ends once the log is
//! closed and fully read.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Instant;

use chrono::{DateTime, Utc};
use crucible_core::SessionState;
use futures::future::BoxFuture;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// What an event carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Stdout {
        text: String,
    },
    Stderr {
        text: String,
    },
    MetricSample {
        cpu_percent: f64,
        memory_bytes: u64,
        elapsed_ms: u64,
    },
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
}

/// One entry of a session's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecEvent {
    /// Position in the log, from 0.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the log was created.
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Default)]
struct LogState {
    events: Vec<ExecEvent>,
    closed: bool,
}

/// Append-only buffer shared by the session supervisor and its subscribers.
pub struct EventLog {
    state: Mutex<LogState>,
    changed: watch::Sender<u64>,
    created: Instant,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        let (changed, _) = watch::channel(0);
        Arc::new(Self {
            state: Mutex::new(LogState::default()),
            changed,
            created: Instant::now(),
        })
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event. Returns its sequence number, or `None` once closed.
    pub fn push(&self, kind: EventKind) -> Option<u64> {
        let seq = {
            let mut state = self.state();
            if state.closed {
                return None;
            }
            let seq = state.events.len() as u64;
            state.events.push(ExecEvent {
                seq,
                timestamp: Utc::now(),
                elapsed_ms: self.created.elapsed().as_millis() as u64,
                kind,
            });
            seq
        };
        self.changed.send_replace(seq + 1);
        Some(seq)
    }

    /// Stop accepting events and wake every cursor.
    pub fn close(&self) {
        let len = {
            let mut state = self.state();
            state.closed = true;
            state.events.len() as u64
        };
        self.changed.send_replace(len);
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn len(&self) -> usize {
        self.state().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, seq: usize) -> Option<ExecEvent> {
        self.state().events.get(seq).cloned()
    }

    /// Copy of every event so far.
    pub fn snapshot(&self) -> Vec<ExecEvent> {
        self.state().events.clone()
    }

    /// A cursor positioned at the first event.
    pub fn cursor(self: &Arc<Self>) -> EventCursor {
        EventCursor {
            log: Arc::clone(self),
            next: 0,
            waiting: None,
        }
    }

    /// Resolves on the next push or close after this call.
    fn next_change(&self) -> BoxFuture<'static, ()> {
        let mut rx = self.changed.subscribe();
        Box::pin(async move {
            let _ = rx.changed().await;
        })
    }
}

/// Reader over an [`EventLog`] with its own position.
pub struct EventCursor {
    log: Arc<EventLog>,
    next: usize,
    waiting: Option<BoxFuture<'static, ()>>,
}

impl EventCursor {
    /// Sequence number of the next event this cursor yields.
    pub fn position(&self) -> usize {
        self.next
    }
}

impl Stream for EventCursor {
    type Item = ExecEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ExecEvent>> {
        let this = &mut *self;
        loop {
            if let Some(event) = this.log.get(this.next) {
                this.next += 1;
                this.waiting = None;
                return Poll::Ready(Some(event));
            }
            if this.log.is_closed() {
                return Poll::Ready(None);
            }
            let Some(change) = this.waiting.as_mut() else {
                // Arm before re-checking so a push in between is not missed.
                this.waiting = Some(this.log.next_change());
                continue;
            };
            if change.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }
            this.waiting = None;
        }
    }
}
