//! Master lifecycle events.
//!
//! [`EventKind`] and [`Event`] are the typed record of what the
//! supervision loop did: listeners forked, readiness reports, reaped
//! children, worker starts and stops, operator requests, spawn failures.
//!
//! The master is the only producer, and the fan-out pump in
//! `Master::run` is the only direct consumer — events travel between
//! them over a private channel, and multi-observer delivery happens in
//! the per-observer queues of
//! [`SubscriberSet`](crate::subscribers::SubscriberSet) (log writer,
//! status pipe, embedder-supplied observers).

mod event;

pub use event::{Event, EventKind};
