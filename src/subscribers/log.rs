//! # Logging subscriber.
//!
//! [`LogWriter`] renders every master lifecycle event through `tracing`.
//! This is the default observer installed by the binary; embedders can
//! leave it out or add their own [`Subscribe`] implementations alongside.

use async_trait::async_trait;

use crate::events::{Event, EventKind};

use super::Subscribe;

/// Renders lifecycle events as structured log lines.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let pid = e.pid;
        let listener = e.listener_id;
        match e.kind {
            EventKind::ListenerSpawned => {
                tracing::info!(pid, listener, "listener started");
            }
            EventKind::ListenerReady => {
                tracing::info!(pid, listener, "listener ready");
            }
            EventKind::ListenerStopped => {
                tracing::info!(pid, listener, "listener stopped");
            }
            EventKind::WorkerStarted => {
                tracing::info!(pid, listener, "worker started");
            }
            EventKind::WorkerStopped => {
                tracing::info!(pid, listener, "worker finished");
            }
            EventKind::RotationRequested => {
                tracing::info!("rotating listener (HUP)");
            }
            EventKind::PauseRequested => {
                tracing::info!("pausing (USR2)");
            }
            EventKind::ResumeRequested => {
                tracing::info!("resuming (CONT)");
            }
            EventKind::ShutdownRequested => {
                tracing::info!("shutting down");
            }
            EventKind::SpawnFailed => {
                tracing::error!(error = e.error.as_deref(), "spawning listener failed");
            }
            EventKind::BackoffScheduled => {
                tracing::warn!(delay = ?e.delay, "listener respawn delayed");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
