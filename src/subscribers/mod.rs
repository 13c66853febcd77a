//! # Event subscribers for the resqued master.
//!
//! This module provides the [`Subscribe`] trait and the built-in
//! implementations that observe the supervision loop's event stream.
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   Master ── publish(Event) ──► event channel ──► pump ──► SubscriberSet
//!                                                               │
//!                                                     ┌─────────┼──────────┐
//!                                                     ▼         ▼          ▼
//!                                                 LogWriter  StatusPipe  Custom
//! ```
//!
//! ## Subscriber types
//! - [`LogWriter`] — renders events through `tracing`
//! - [`StatusPipe`] — emits `<kind>,<pid>,<state>` lines on an inherited
//!   descriptor for an external supervisor
//! - Custom — anything implementing [`Subscribe`]

mod log;
mod set;
mod status;
mod subscriber;

pub use self::log::LogWriter;
pub use self::set::SubscriberSet;
pub use self::status::{status_line, StatusPipe};
pub use self::subscriber::Subscribe;
