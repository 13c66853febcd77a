//! Supervision core: the master loop and its building blocks.
//!
//! The only types most callers need from here are [`Master`] and the
//! signal queue it drains. Everything else is a building block the master
//! wires together.
//!
//! ## Files & responsibilities
//! - **core.rs**: the supervision loop; owns the listener state machine
//!   (`current` / `last_good`), reaps children, forwards worker events,
//!   honors operator signals, drives terminal shutdown.
//! - **listener.rs**: per-child proxy; spawning, status-channel parsing,
//!   worker accounting, signalling, disposal.
//! - **signals.rs**: bounded signal FIFO fed by `tokio::signal` streams;
//!   `manual()` is the programmatic driver for tests and embedders.
//! - **backoff.rs**: restart throttle (exponential while flapping, reset
//!   after a stable run).
//! - **census.rs**: `INFO` diagnostics — process statistics with deltas.
//!
//! ## Signal timeline (graceful rotation)
//! ```text
//! HUP ──► reopen log ──► last_good := current, current := none
//!   loop iteration: fork replacement (given the old-workers roster)
//!   replacement writes "running" ──► QUIT last_good ──► reap ──► stop event
//! ```

mod backoff;
mod census;
mod core;
mod listener;
mod signals;

pub use self::backoff::{BackoffSettings, ListenerBackoff};
pub use self::census::Census;
pub use self::core::Master;
pub use self::listener::{parse_event, ListenerEvent, ListenerProxy, ListenerState};
pub use self::signals::{MasterSignal, SignalQueue};
