//! # resqued
//!
//! **Resqued** is a master process that supervises a pool of background
//! job workers through an intermediate *listener* child. The master never
//! touches queues or jobs itself: it keeps the right listener alive,
//! rotates listeners when configuration changes, hands running workers
//! across rotations so they are never needlessly killed, and propagates
//! operator signals.
//!
//! ## Features
//!
//! | Area            | Description                                                        | Key types                                  |
//! |-----------------|--------------------------------------------------------------------|--------------------------------------------|
//! | **Supervision** | Listener state machine, reaping, graceful rotation and handoff.    | [`Master`], [`Config`]                     |
//! | **Signals**     | Bounded FIFO of operator/child signals with a programmatic driver. | [`SignalQueue`], [`MasterSignal`]          |
//! | **Backoff**     | Restart throttle after listener crashes.                           | [`ListenerBackoff`], [`BackoffSettings`]   |
//! | **Observers**   | Non-blocking event fan-out: logs, status pipe, custom.             | [`Subscribe`], [`LogWriter`], [`StatusPipe`] |
//! | **Events**      | Typed lifecycle events with stable ordering.                       | [`Event`], [`EventKind`]                   |
//! | **Errors**      | Typed startup/loop failures.                                       | [`MasterError`]                            |
//!
//! ## Signals
//!
//! | Signal | Effect |
//! |---|---|
//! | `HUP` | Reopen the log file; rotate the listener against the current config paths. |
//! | `USR2` | Pause: quit the current listener, stop forking replacements. |
//! | `CONT` | Resume: forward `CONT`, fork a fresh listener. |
//! | `INT` / `TERM` / `QUIT` | Forward to all listeners, wait for them, exit. |
//! | `INFO` (`USR1` on Linux) | Log a process census with deltas. |
//!
//! ```no_run
//! use std::sync::Arc;
//! use resqued::{Config, LogWriter, Master, SignalQueue, Subscribe};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config {
//!         config_paths: vec!["resqued.conf".into()],
//!         ..Config::default()
//!     };
//!
//!     let signals = SignalQueue::os()?;
//!     let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
//!     let master = Master::new(cfg, signals, subscribers);
//!     master.run(None).await?;
//!     Ok(())
//! }
//! ```
//!
//! The listener executable is an external collaborator. Its contract:
//! accept `--status-fd <fd> --listener-id <id> [--old-workers <pids>]`
//! followed by the config paths; write `running`, `worker <pid> start`,
//! and `worker <pid> stop` lines on the status descriptor; quiesce on
//! `QUIT`; resume on `CONT`.
//!
//! ---

mod config;
mod daemon;
mod error;
mod events;
mod logging;
mod master;
mod pidfile;
mod procline;
mod subscribers;

// ---- Public re-exports ----

pub use config::Config;
pub use daemon::daemonize;
pub use error::MasterError;
pub use events::{Event, EventKind};
pub use logging::{init as init_logging, install_panic_hook, LogHandle};
pub use master::{
    BackoffSettings, ListenerBackoff, Master, MasterSignal, SignalQueue,
};
pub use pidfile::Pidfile;
pub use subscribers::{status_line, LogWriter, StatusPipe, Subscribe, SubscriberSet};
