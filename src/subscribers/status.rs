//! # Status pipe subscriber.
//!
//! [`StatusPipe`] emits structured lifecycle events for an external
//! observer on a descriptor inherited from a supervisor. The wire format
//! is line-oriented ASCII, comma-separated, newline terminated:
//!
//! ```text
//! <kind>,<pid>,<state>
//! ```
//!
//! with `kind ∈ {listener, worker}` and `state ∈ {start, ready, stop}`
//! (`ready` for listeners only). Events without a wire representation
//! (operator requests, spawn failures) are not emitted.
//!
//! The pipe is best-effort: the first write failure is logged, further
//! writes are dropped silently, and the master keeps running.

use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::net::unix::pipe;

use crate::events::{Event, EventKind};

use super::Subscribe;

/// Formats an event as a status-pipe line, newline included.
///
/// Returns `None` for events that have no wire representation.
pub fn status_line(e: &Event) -> Option<String> {
    let (kind, state) = match e.kind {
        EventKind::ListenerSpawned => ("listener", "start"),
        EventKind::ListenerReady => ("listener", "ready"),
        EventKind::ListenerStopped => ("listener", "stop"),
        EventKind::WorkerStarted => ("worker", "start"),
        EventKind::WorkerStopped => ("worker", "stop"),
        _ => return None,
    };
    let pid = e.pid?;
    Some(format!("{kind},{pid},{state}\n"))
}

/// Outward-facing lifecycle reporter over an inherited pipe descriptor.
pub struct StatusPipe {
    pipe: pipe::Sender,
    failed: AtomicBool,
}

impl StatusPipe {
    /// Takes ownership of an inherited descriptor and prepares it for
    /// non-blocking writes.
    ///
    /// # Safety
    /// `fd` must be a valid, open write descriptor that nothing else in the
    /// process owns or will close.
    pub unsafe fn from_raw_fd(fd: RawFd) -> io::Result<Self> {
        let owned = OwnedFd::from_raw_fd(fd);
        set_nonblocking(&owned)?;
        let pipe = pipe::Sender::from_owned_fd(owned)?;
        Ok(Self {
            pipe,
            failed: AtomicBool::new(false),
        })
    }

    fn fail(&self, err: &io::Error) {
        // Log once per pipe, then drop writes silently.
        if !self.failed.swap(true, Ordering::Relaxed) {
            tracing::warn!(error = %err, "status pipe write failed; disabling status reports");
        }
    }
}

#[async_trait]
impl Subscribe for StatusPipe {
    async fn on_event(&self, event: &Event) {
        if self.failed.load(Ordering::Relaxed) {
            return;
        }
        let Some(line) = status_line(event) else {
            return;
        };

        let mut buf = line.as_bytes();
        while !buf.is_empty() {
            if let Err(e) = self.pipe.writable().await {
                return self.fail(&e);
            }
            match self.pipe.try_write(buf) {
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return self.fail(&e),
            }
        }
    }

    fn name(&self) -> &'static str {
        "status-pipe"
    }
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let raw = fd.as_raw_fd();
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_listener_and_worker_lines() {
        let ev = Event::now(EventKind::ListenerSpawned).with_pid(4242);
        assert_eq!(status_line(&ev).as_deref(), Some("listener,4242,start\n"));

        let ev = Event::now(EventKind::ListenerReady).with_pid(4242);
        assert_eq!(status_line(&ev).as_deref(), Some("listener,4242,ready\n"));

        let ev = Event::now(EventKind::WorkerStopped).with_pid(100);
        assert_eq!(status_line(&ev).as_deref(), Some("worker,100,stop\n"));
    }

    #[test]
    fn skips_events_without_wire_representation() {
        assert!(status_line(&Event::now(EventKind::RotationRequested)).is_none());
        assert!(status_line(&Event::now(EventKind::BackoffScheduled)).is_none());
        // A lifecycle event with no pid cannot be reported.
        assert!(status_line(&Event::now(EventKind::WorkerStarted)).is_none());
    }
}
