//! # In-master handle for one spawned listener child.
//!
//! [`ListenerProxy`] owns everything the master knows about a listener:
//! its pid, its ordinal, the master side of the status channel, the set of
//! worker pids it has announced, and its lifecycle state.
//!
//! ## Status channel
//! Each listener shares one Unix socketpair with the master. The child
//! writes newline-terminated events upward:
//!
//! ```text
//! running
//! worker <pid> start
//! worker <pid> stop
//! ```
//!
//! and the master writes `worker_finished <pid>` downward when a worker
//! tracked by *another* listener ends, so a retired listener can drop the
//! pid from its own accounting.
//!
//! Reads are non-blocking and line-buffered: partial lines stay in the
//! proxy until a newline arrives. EOF is latched but the descriptor is
//! only closed by [`dispose`](ListenerProxy::dispose), after reaping, so
//! in-flight bytes are drained first.
//!
//! ## Rules
//! - A malformed line is logged and discarded; it never kills the child.
//! - Lifecycle: `Booting` → `Ready` on the first `running`; → `Dying` once
//!   the master has signalled it to quit.

use std::collections::BTreeSet;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::net::UnixStream;

use crate::config::Config;

/// Upstream events a listener reports on its status channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerEvent {
    /// The listener finished booting and accepts workers.
    Running,
    /// The listener forked a worker with this pid.
    WorkerStarted(u32),
    /// A worker finished its job.
    WorkerStopped(u32),
}

/// Lifecycle state of a listener child, as seen by the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Forked, has not reported `running` yet.
    Booting,
    /// Reported `running`; presumed to be accepting work.
    Ready,
    /// Signalled to quit; expected to exit soon.
    Dying,
}

/// Parses one status line. Returns `None` for anything outside the wire
/// grammar.
pub fn parse_event(line: &str) -> Option<ListenerEvent> {
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "running" => parts.next().is_none().then_some(ListenerEvent::Running),
        "worker" => {
            let pid: u32 = parts.next()?.parse().ok()?;
            let ev = match parts.next()? {
                "start" => ListenerEvent::WorkerStarted(pid),
                "stop" => ListenerEvent::WorkerStopped(pid),
                _ => return None,
            };
            parts.next().is_none().then_some(ev)
        }
        _ => None,
    }
}

/// Master-side handle for one listener child.
pub struct ListenerProxy {
    pid: Pid,
    listener_id: u64,
    stream: UnixStream,
    /// Partial status line carried across reads.
    buf: Vec<u8>,
    running_workers: BTreeSet<u32>,
    state: ListenerState,
    eof: bool,
    write_warned: bool,
}

impl ListenerProxy {
    /// Forks a listener child and returns its proxy.
    ///
    /// The child end of the status channel survives `exec` (close-on-exec
    /// is cleared between fork and exec) and its descriptor number is
    /// passed on the command line:
    ///
    /// ```text
    /// <program> --status-fd <fd> --listener-id <id>
    ///           [--old-workers <pid>,<pid>,…] <config-path>…
    /// ```
    pub fn spawn(cfg: &Config, listener_id: u64, old_workers: &[u32]) -> io::Result<Self> {
        let (theirs, ours) = StdUnixStream::pair()?;
        ours.set_nonblocking(true)?;
        let stream = UnixStream::from_std(ours)?;
        let child_fd = theirs.as_raw_fd();

        let mut cmd = Command::new(&cfg.listener_program);
        cmd.arg("--status-fd")
            .arg(child_fd.to_string())
            .arg("--listener-id")
            .arg(listener_id.to_string());
        if !old_workers.is_empty() {
            cmd.arg("--old-workers").arg(roster_arg(old_workers));
        }
        cmd.args(&cfg.config_paths);

        // The child must keep its end of the socketpair across exec.
        unsafe {
            cmd.pre_exec(move || {
                if libc::fcntl(child_fd, libc::F_SETFD, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd.spawn()?;
        let pid = Pid::from_raw(child.id() as i32);
        drop(theirs);

        Ok(Self {
            pid,
            listener_id,
            stream,
            buf: Vec::new(),
            running_workers: BTreeSet::new(),
            state: ListenerState::Booting,
            eof: false,
            write_warned: false,
        })
    }

    /// Child process id.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Ordinal assigned at spawn.
    pub fn listener_id(&self) -> u64 {
        self.listener_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// True once the child's end of the status channel has closed.
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Marks the listener ready (first `running` report).
    pub fn mark_ready(&mut self) {
        self.state = ListenerState::Ready;
    }

    /// Marks the listener as signalled to quit.
    pub fn mark_dying(&mut self) {
        self.state = ListenerState::Dying;
    }

    /// Worker pids this listener has reported active and not yet finished.
    pub fn running_workers(&self) -> &BTreeSet<u32> {
        &self.running_workers
    }

    /// Records a reported worker. Returns false if the pid was already
    /// tracked.
    pub fn note_worker_started(&mut self, pid: u32) -> bool {
        self.running_workers.insert(pid)
    }

    /// Drops a finished worker from this listener's accounting. Returns
    /// true if the pid was tracked here.
    pub fn note_worker_stopped(&mut self, pid: u32) -> bool {
        self.running_workers.remove(&pid)
    }

    /// Tells the child that a worker (tracked by another listener) has
    /// finished, so it can drop the pid from its own roster. Best-effort.
    pub fn worker_finished(&mut self, pid: u32) {
        let line = format!("worker_finished {pid}\n");
        match self.stream.try_write(line.as_bytes()) {
            Ok(n) if n == line.len() => {}
            Ok(_) | Err(_) if self.write_warned => {}
            Ok(n) => {
                self.write_warned = true;
                tracing::warn!(
                    listener = self.listener_id,
                    pid = self.pid.as_raw(),
                    written = n,
                    "short write on listener channel; further failures muted"
                );
            }
            Err(e) => {
                self.write_warned = true;
                tracing::warn!(
                    listener = self.listener_id,
                    pid = self.pid.as_raw(),
                    error = %e,
                    "writing to listener channel failed; further failures muted"
                );
            }
        }
    }

    /// Sends a signal to the child. `ESRCH` (already gone) is not an
    /// error worth surfacing: the exit will be reaped normally.
    pub fn kill(&self, sig: Signal) {
        match signal::kill(self.pid, sig) {
            Ok(()) => {}
            Err(nix::errno::Errno::ESRCH) => {
                tracing::debug!(pid = self.pid.as_raw(), ?sig, "listener already gone");
            }
            Err(e) => {
                tracing::warn!(pid = self.pid.as_raw(), ?sig, error = %e, "signalling listener failed");
            }
        }
    }

    /// Resolves when the status channel has pending data. Pends forever
    /// once EOF has been latched (there will be nothing further to read).
    pub async fn readable(&self) {
        if self.eof {
            std::future::pending::<()>().await;
        }
        let _ = self.stream.readable().await;
    }

    /// Drains any complete status lines without blocking.
    ///
    /// Partial lines stay buffered; malformed lines are logged and
    /// discarded. On EOF the proxy is latched: the master will reap the
    /// child and call [`dispose`](Self::dispose).
    pub fn read_events(&mut self) -> Vec<ListenerEvent> {
        let mut out = Vec::new();
        if !self.eof {
            let mut chunk = [0u8; 4096];
            loop {
                match self.stream.try_read(&mut chunk) {
                    Ok(0) => {
                        self.eof = true;
                        break;
                    }
                    Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::warn!(
                            pid = self.pid.as_raw(),
                            error = %e,
                            "reading listener status failed; treating as EOF"
                        );
                        self.eof = true;
                        break;
                    }
                }
            }
        }

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_event(line) {
                Some(ev) => out.push(ev),
                None => {
                    tracing::warn!(
                        pid = self.pid.as_raw(),
                        line,
                        "discarding malformed status line"
                    );
                }
            }
        }
        out
    }

    /// Releases the proxy, closing the master side of the status channel.
    pub fn dispose(self) {
        tracing::debug!(
            pid = self.pid.as_raw(),
            listener = self.listener_id,
            "listener proxy disposed"
        );
    }
}

fn roster_arg(old_workers: &[u32]) -> String {
    let mut s = String::new();
    for (i, pid) in old_workers.iter().enumerate() {
        if i > 0 {
            s.push(',');
        }
        s.push_str(&pid.to_string());
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_wire_grammar() {
        assert_eq!(parse_event("running"), Some(ListenerEvent::Running));
        assert_eq!(
            parse_event("worker 100 start"),
            Some(ListenerEvent::WorkerStarted(100))
        );
        assert_eq!(
            parse_event("worker 100 stop"),
            Some(ListenerEvent::WorkerStopped(100))
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse_event(""), None);
        assert_eq!(parse_event("runningx"), None);
        assert_eq!(parse_event("running now"), None);
        assert_eq!(parse_event("worker"), None);
        assert_eq!(parse_event("worker abc start"), None);
        assert_eq!(parse_event("worker 100 pause"), None);
        assert_eq!(parse_event("worker 100 start extra"), None);
        assert_eq!(parse_event("restart everything"), None);
    }

    #[test]
    fn roster_is_comma_separated() {
        assert_eq!(roster_arg(&[]), "");
        assert_eq!(roster_arg(&[100]), "100");
        assert_eq!(roster_arg(&[100, 101, 204]), "100,101,204");
    }

    fn test_proxy() -> (ListenerProxy, StdUnixStream) {
        let (theirs, ours) = StdUnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        let proxy = ListenerProxy {
            pid: Pid::from_raw(-1),
            listener_id: 1,
            stream: UnixStream::from_std(ours).unwrap(),
            buf: Vec::new(),
            running_workers: BTreeSet::new(),
            state: ListenerState::Booting,
            eof: false,
            write_warned: false,
        };
        (proxy, theirs)
    }

    #[tokio::test]
    async fn buffers_partial_lines_across_reads() {
        use std::io::Write;

        let (mut proxy, mut theirs) = test_proxy();
        theirs.write_all(b"worker 10").unwrap();
        proxy.readable().await;
        assert!(proxy.read_events().is_empty());

        theirs.write_all(b"0 start\nrunning\nworker ").unwrap();
        proxy.readable().await;
        assert_eq!(
            proxy.read_events(),
            vec![ListenerEvent::WorkerStarted(100), ListenerEvent::Running]
        );

        theirs.write_all(b"100 stop\n").unwrap();
        proxy.readable().await;
        assert_eq!(proxy.read_events(), vec![ListenerEvent::WorkerStopped(100)]);
    }

    #[tokio::test]
    async fn latches_eof_and_drains_remaining_bytes() {
        use std::io::Write;

        let (mut proxy, mut theirs) = test_proxy();
        theirs.write_all(b"running\n").unwrap();
        drop(theirs);

        proxy.readable().await;
        assert_eq!(proxy.read_events(), vec![ListenerEvent::Running]);
        assert!(proxy.eof());
        assert!(proxy.read_events().is_empty());
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped_not_fatal() {
        use std::io::Write;

        let (mut proxy, mut theirs) = test_proxy();
        theirs.write_all(b"nonsense\nworker 7 start\n").unwrap();
        proxy.readable().await;
        assert_eq!(proxy.read_events(), vec![ListenerEvent::WorkerStarted(7)]);
    }
}
