//! # Lifecycle events emitted by the master.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Child lifecycle**: listener spawned/ready/stopped, worker started/stopped
//! - **Operator requests**: rotation, pause, resume, shutdown (signal-driven)
//! - **Supervision**: spawn failure, backoff scheduled before a respawn
//!
//! The [`Event`] struct carries the metadata observers need: the child pid,
//! the listener ordinal, an error message, or a backoff delay.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically, so events can be ordered correctly even when delivered
//! through async channels.
//!
//! ## Event flow examples
//!
//! ### Clean boot
//! ```text
//! ListenerSpawned ──► (child writes "running") ──► ListenerReady
//! ```
//!
//! ### Graceful rotation (HUP)
//! ```text
//! RotationRequested
//!   → ListenerSpawned (replacement, handed the old-workers roster)
//!   → ListenerReady   (replacement)
//!   → ListenerStopped (retired listener, after it exits)
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of master lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Child lifecycle ===
    /// A listener child was forked.
    ListenerSpawned,
    /// A listener finished booting and reported `running`.
    ListenerReady,
    /// A listener exited and was reaped.
    ListenerStopped,
    /// A listener reported a new worker pid.
    WorkerStarted,
    /// A worker finished its job.
    WorkerStopped,

    // === Operator requests ===
    /// `HUP` received: rotate the listener against the current config paths.
    RotationRequested,
    /// `USR2` received: stop accepting work, quit the current listener.
    PauseRequested,
    /// `CONT` received: resume; a fresh listener will be spawned.
    ResumeRequested,
    /// `INT`/`TERM`/`QUIT` received: forward and wait for children.
    ShutdownRequested,

    // === Supervision ===
    /// Forking a listener failed; backoff advanced.
    SpawnFailed,
    /// A respawn is delayed after a crash.
    BackoffScheduled,
}

/// Master lifecycle event with optional metadata.
///
/// ## Fields
/// - `seq`: unique sequence number (monotonically increasing)
/// - `at`: wall-clock timestamp (may go backwards under NTP; logging only)
/// - `kind`: event classification
/// - `pid`, `listener_id`, `error`, `delay`: optional metadata
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Process id of the child the event is about. For worker events this
    /// is the *worker* pid, not the listener that reported it.
    pub pid: Option<i32>,
    /// Ordinal of the listener involved (from the master's spawn counter).
    pub listener_id: Option<u64>,
    /// Error message, if the event represents a failure.
    pub error: Option<String>,
    /// Backoff delay before the next spawn attempt (if relevant).
    pub delay: Option<Duration>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            pid: None,
            listener_id: None,
            error: None,
            delay: None,
        }
    }

    /// Attaches a child pid.
    pub fn with_pid(mut self, pid: i32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches a listener ordinal.
    pub fn with_listener_id(mut self, id: u64) -> Self {
        self.listener_id = Some(id);
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    /// Attaches a backoff delay.
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }
}
