//! # Event subscriber trait.
//!
//! Provides [`Subscribe`] — the extension point for plugging custom event
//! handlers into the master (the built-in log writer and status pipe are
//! implementations of it).
//!
//! Each subscriber gets:
//! - **Dedicated worker task** (runs independently of the supervision loop)
//! - **Bounded queue** (configurable capacity via [`Subscribe::queue_capacity`])
//! - **Panic containment** (a panicking subscriber is detached;
//!   supervision continues without it)
//!
//! ## Rules
//! - Slow subscribers only affect themselves (queue overflow → event drop)
//! - Subscribers **never block** the supervision loop
//! - Queue capacity is per-subscriber, not global

use async_trait::async_trait;

use crate::events::Event;

/// Event subscriber for master observability.
///
/// Receives events via a dedicated worker task with a bounded queue. A
/// subscriber that falls behind loses the newest events, which is
/// acceptable for observers: the master's own state never depends on a
/// subscriber having seen anything.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event.
    ///
    /// Called from the subscriber's worker task, sequentially, in queue
    /// order. Handle errors internally; a panic detaches the subscriber
    /// for the rest of the master's life.
    async fn on_event(&self, event: &Event);

    /// Returns the subscriber name for logging.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Returns the preferred queue capacity for this subscriber.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
