//! # Signal queue and loop wakeup.
//!
//! Operator and child signals arrive as [`MasterSignal`] tokens on a
//! bounded FIFO that the supervision loop drains one token per iteration.
//! A forwarder task turns `tokio::signal::unix` streams into queue sends;
//! the OS-handler side of those streams does nothing but note delivery and
//! wake the runtime through its internal self-pipe, which satisfies the
//! async-signal-safety constraint (no master state is touched from handler
//! context).
//!
//! ## Semantics
//! - Tokens are consumed in enqueue order.
//! - A burst of identical signals may collapse into fewer tokens (the
//!   streams are level-triggered and the queue is bounded); the loop is
//!   written so that this is harmless.
//! - `CHLD` enqueues a wake-only token: reaping is driven by non-blocking
//!   `waitpid` at the top of every iteration, never by the token itself.
//!
//! ## Platform notes
//! The census dump is wired to `SIGINFO` where the platform defines it
//! (BSD, macOS) and to `SIGUSR1` elsewhere; Linux has no `SIGINFO`.

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use crate::error::MasterError;

/// Depth of the pending-signal FIFO.
const QUEUE_DEPTH: usize = 64;

/// Signals the master reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterSignal {
    /// `HUP`: reopen the log file and rotate the listener.
    Hup,
    /// `USR2`: pause; quit the current listener and stop spawning.
    Usr2,
    /// `CONT`: resume; forward `CONT` to all listeners.
    Cont,
    /// `INT`: terminal shutdown.
    Int,
    /// `TERM`: terminal shutdown.
    Term,
    /// `QUIT`: terminal shutdown.
    Quit,
    /// `INFO`/`USR1`: dump the process census.
    Info,
    /// `CHLD`: wake the loop so it reaps.
    Child,
}

impl MasterSignal {
    /// Short lowercase name for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            MasterSignal::Hup => "hup",
            MasterSignal::Usr2 => "usr2",
            MasterSignal::Cont => "cont",
            MasterSignal::Int => "int",
            MasterSignal::Term => "term",
            MasterSignal::Quit => "quit",
            MasterSignal::Info => "info",
            MasterSignal::Child => "chld",
        }
    }
}

/// Bounded FIFO of pending signals, drained by the supervision loop.
pub struct SignalQueue {
    rx: mpsc::Receiver<MasterSignal>,
}

impl SignalQueue {
    /// Installs OS signal handlers and returns the queue they feed.
    ///
    /// Call once, from within the runtime. Handler registration failures
    /// are fatal: a master that cannot hear its operator is useless.
    pub fn os() -> Result<Self, MasterError> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);

        let setup = || -> std::io::Result<()> {
            let mut hup = signal(SignalKind::hangup())?;
            let mut usr2 = signal(SignalKind::user_defined2())?;
            let mut cont = signal(SignalKind::from_raw(libc::SIGCONT))?;
            let mut int = signal(SignalKind::interrupt())?;
            let mut term = signal(SignalKind::terminate())?;
            let mut quit = signal(SignalKind::quit())?;
            let mut child = signal(SignalKind::child())?;
            let mut info = signal(info_kind())?;

            tokio::spawn(async move {
                loop {
                    let sig = tokio::select! {
                        r = hup.recv() => r.map(|()| MasterSignal::Hup),
                        r = usr2.recv() => r.map(|()| MasterSignal::Usr2),
                        r = cont.recv() => r.map(|()| MasterSignal::Cont),
                        r = int.recv() => r.map(|()| MasterSignal::Int),
                        r = term.recv() => r.map(|()| MasterSignal::Term),
                        r = quit.recv() => r.map(|()| MasterSignal::Quit),
                        r = child.recv() => r.map(|()| MasterSignal::Child),
                        r = info.recv() => r.map(|()| MasterSignal::Info),
                    };
                    let Some(sig) = sig else { break };
                    match tx.try_send(sig) {
                        Ok(()) => {}
                        // Queue full: identical bursts collapse, by contract.
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::trace!(signal = sig.as_str(), "signal queue full; token dropped");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
            });
            Ok(())
        };

        setup().map_err(|source| MasterError::SignalSetup { source })?;
        Ok(Self { rx })
    }

    /// Builds a queue fed by the returned sender instead of the OS.
    ///
    /// This is the injection seam used by tests and embedders that drive
    /// the master programmatically.
    pub fn manual() -> (Self, mpsc::Sender<MasterSignal>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        (Self { rx }, tx)
    }

    /// Pops the next pending token without blocking.
    pub fn try_next(&mut self) -> Option<MasterSignal> {
        self.rx.try_recv().ok()
    }

    /// Waits for the next token. Returns `None` when every sender is gone
    /// (a manual driver hung up), which the loop treats as a shutdown
    /// request.
    pub async fn recv(&mut self) -> Option<MasterSignal> {
        self.rx.recv().await
    }
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
fn info_kind() -> SignalKind {
    SignalKind::info()
}

#[cfg(not(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
fn info_kind() -> SignalKind {
    SignalKind::user_defined1()
}
