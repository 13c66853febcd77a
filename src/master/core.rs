//! # Master: the supervision loop.
//!
//! The [`Master`] owns the runtime components (event channel, observer
//! fan-out, signal queue, listener proxies) and drives the listener state
//! machine from fork to terminal shutdown.
//!
//! ## Architecture
//! ```text
//! Config ──► Master::run(ready_pipe)
//!                 │
//!                 ├──► acquire pidfile (scoped guard, released on any exit)
//!                 ├──► report master pid on the ready pipe
//!                 │
//!                 └──► loop {
//!                        ├──► drain listener status channels
//!                        ├──► reap dead children (waitpid, WNOHANG)
//!                        ├──► fork a listener if none is current,
//!                        │    not paused, and backoff permits
//!                        └──► process ONE signal token, or block on:
//!                              readable status channel │ signal queue
//!                              │ backoff deadline │ idle tick │ cancel
//!                      }
//! ```
//!
//! ## Rotation state machine (`current` / `last_good`)
//! - `HUP` with no `last_good`: the serving listener becomes `last_good`
//!   and a replacement is forked; jobs keep flowing while it boots.
//! - `HUP` during an in-flight rotation: the booting replacement is
//!   QUIT and re-forked; the proven `last_good` stays.
//! - replacement reports `running`: `last_good` is QUIT and cleared.
//! - a `running` report from anything that is not `current` is stale —
//!   the reporter is re-signalled QUIT, never adopted (a QUIT delivered
//!   before the child installed its traps can be lost).
//!
//! ## Rules
//! - All master state lives on one thread; the only foreign context is
//!   the signal forwarder, which does nothing but enqueue tokens.
//! - Reaping is non-blocking except during terminal shutdown.
//! - A new listener is handed the pids of every running worker across all
//!   live listeners (the old-workers roster) so it adopts them instead of
//!   respawning.
//! - `worker stop` is forwarded to every *other* listener so a retired
//!   listener learns that a worker it adopted has ended.

use std::collections::HashMap;
use std::io::Write;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use futures::future::select_all;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{getpid, Pid};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::MasterError;
use crate::events::{Event, EventKind};
use crate::logging::LogHandle;
use crate::master::backoff::ListenerBackoff;
use crate::master::census::Census;
use crate::master::listener::{ListenerEvent, ListenerProxy};
use crate::master::signals::{MasterSignal, SignalQueue};
use crate::pidfile::Pidfile;
use crate::procline;
use crate::subscribers::{Subscribe, SubscriberSet};

/// What ended one blocked iteration.
enum Wakeup {
    Signal(MasterSignal),
    Io,
    Timeout,
    Cancelled,
}

/// Whether the loop keeps running after a signal.
enum Flow {
    Continue,
    Exit,
}

/// How a reaped child ended.
enum ExitKind {
    Code(i32),
    Signal(Signal),
}

/// Supervisor for a pool of listener children.
///
/// Construct with [`Master::new`] (within a tokio runtime: the event
/// fan-out is spawned immediately so no early event is missed), then call
/// [`Master::run`].
pub struct Master {
    cfg: Config,
    /// Lifecycle events on their way to the observer fan-out.
    events: mpsc::UnboundedSender<Event>,
    subs: Arc<SubscriberSet>,
    pump: Option<JoinHandle<()>>,
    signals: SignalQueue,
    /// Every listener forked and not yet reaped, by pid.
    listeners: HashMap<Pid, ListenerProxy>,
    /// The listener presumed to be accepting new work.
    current: Option<Pid>,
    /// The previous listener, kept alive during a rotation until the
    /// replacement reports ready.
    last_good: Option<Pid>,
    /// Monotonic spawn counter; assigns listener ordinals.
    listeners_created: u64,
    paused: bool,
    /// Terminal shutdown in progress: no more forks, no backoff noise.
    stopping: bool,
    backoff: ListenerBackoff,
    census: Census,
    shutdown: CancellationToken,
    log_handle: LogHandle,
}

impl Master {
    /// Creates a master. Must be called within a tokio runtime.
    pub fn new(cfg: Config, signals: SignalQueue, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        let subs = Arc::new(SubscriberSet::new(subscribers));
        let (events, pump_rx) = mpsc::unbounded_channel();
        let pump = Self::spawn_pump(pump_rx, &subs);
        let backoff = ListenerBackoff::new(cfg.backoff);

        Self {
            cfg,
            events,
            subs,
            pump: Some(pump),
            signals,
            listeners: HashMap::new(),
            current: None,
            last_good: None,
            listeners_created: 0,
            paused: false,
            stopping: false,
            backoff,
            census: Census::default(),
            shutdown: CancellationToken::new(),
            log_handle: LogHandle::default(),
        }
    }

    /// Attaches the log handle so `HUP` can reopen the log file.
    pub fn with_log_handle(mut self, handle: LogHandle) -> Self {
        self.log_handle = handle;
        self
    }

    /// Token that stops the loop as if `TERM` had been received. For
    /// embedders and tests; operators use signals.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the supervision loop until a terminal signal (or cancellation)
    /// has been honored and every child is reaped.
    ///
    /// `ready_pipe`, when present, receives the master pid once startup
    /// has actually succeeded — this is how the daemonizing wrapper learns
    /// the master is up.
    pub async fn run(mut self, ready_pipe: Option<OwnedFd>) -> Result<(), MasterError> {
        self.cfg.validate()?;
        let _pidfile = match &self.cfg.pidfile {
            Some(path) => Some(Pidfile::acquire(path)?),
            None => None,
        };
        self.refresh_procline();
        if let Some(fd) = ready_pipe {
            report_ready(fd);
        }
        tracing::info!(pid = getpid().as_raw(), "master started");

        let result = self.supervise().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, label = e.as_label(), "supervision loop failed");
        }

        // Flush observers: hang up the event channel so the pump drains
        // and exits, then let every observer work through its queue.
        let Master { events, subs, pump, .. } = self;
        drop(events);
        if let Some(pump) = pump {
            let _ = pump.await;
        }
        if let Ok(set) = Arc::try_unwrap(subs) {
            set.shutdown().await;
        }
        result
    }

    /// Records a lifecycle event. The pump outlives the loop, so a failed
    /// send can only happen in teardown races and is safe to swallow.
    fn publish(&self, ev: Event) {
        if self.events.send(ev).is_err() {
            tracing::trace!("event pump gone; lifecycle event dropped");
        }
    }

    async fn supervise(&mut self) -> Result<(), MasterError> {
        loop {
            self.drain_status_channels();
            self.reap_listeners();
            self.maybe_start_listener();

            match self.next_wakeup().await {
                Wakeup::Signal(sig) => {
                    tracing::debug!(signal = sig.as_str(), "processing signal");
                    if let Flow::Exit = self.handle_signal(sig) {
                        return Ok(());
                    }
                }
                Wakeup::Cancelled => {
                    self.publish(Event::now(EventKind::ShutdownRequested));
                    self.shutdown_children(Signal::SIGTERM);
                    return Ok(());
                }
                Wakeup::Io | Wakeup::Timeout => {}
            }
        }
    }

    /// Drains the event channel into the observer fan-out until the
    /// master hangs up. The channel is unbounded on purpose: the loop
    /// keeps publishing while blocked in the terminal reap, when the pump
    /// cannot run, and those events must survive until the flush.
    fn spawn_pump(
        mut rx: mpsc::UnboundedReceiver<Event>,
        subs: &Arc<SubscriberSet>,
    ) -> JoinHandle<()> {
        let subs = Arc::clone(subs);
        tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                subs.emit(&ev);
            }
        })
    }

    // === Signals ===

    fn handle_signal(&mut self, sig: MasterSignal) -> Flow {
        match sig {
            MasterSignal::Hup => {
                self.publish(Event::now(EventKind::RotationRequested));
                self.log_handle.reopen();
                self.rotate();
                Flow::Continue
            }
            MasterSignal::Usr2 => {
                self.publish(Event::now(EventKind::PauseRequested));
                self.paused = true;
                if let Some(pid) = self.current.take() {
                    self.quit_listener(pid);
                }
                self.refresh_procline();
                Flow::Continue
            }
            MasterSignal::Cont => {
                self.publish(Event::now(EventKind::ResumeRequested));
                self.paused = false;
                for proxy in self.listeners.values() {
                    proxy.kill(Signal::SIGCONT);
                }
                self.refresh_procline();
                Flow::Continue
            }
            MasterSignal::Int => self.terminal(Signal::SIGINT),
            MasterSignal::Term => self.terminal(Signal::SIGTERM),
            MasterSignal::Quit => self.terminal(Signal::SIGQUIT),
            MasterSignal::Info => {
                let workers = self.old_workers().len();
                self.census.dump(self.listeners.len(), workers);
                Flow::Continue
            }
            // Wake-only: reaping runs at the top of every iteration.
            MasterSignal::Child => Flow::Continue,
        }
    }

    fn terminal(&mut self, sig: Signal) -> Flow {
        self.publish(Event::now(EventKind::ShutdownRequested));
        self.shutdown_children(sig);
        Flow::Exit
    }

    /// Forwards `sig` to every listener, then blocks until all children
    /// are reaped. Operators needing a hard deadline send a second QUIT
    /// out of band; the master imposes none itself.
    fn shutdown_children(&mut self, sig: Signal) {
        self.stopping = true;
        for proxy in self.listeners.values_mut() {
            proxy.kill(sig);
            proxy.mark_dying();
        }
        self.wait_for_workers();
    }

    fn wait_for_workers(&mut self) {
        loop {
            match waitpid(Pid::from_raw(-1), None) {
                Ok(WaitStatus::Exited(pid, code)) => self.on_child_exit(pid, ExitKind::Code(code)),
                Ok(WaitStatus::Signaled(pid, sig, _)) => {
                    self.on_child_exit(pid, ExitKind::Signal(sig))
                }
                Ok(_) => continue,
                Err(Errno::ECHILD) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "waitpid failed during shutdown");
                    break;
                }
            }
        }
        // Nothing should be left; release stragglers defensibly.
        let leftovers: Vec<Pid> = self.listeners.keys().copied().collect();
        for pid in leftovers {
            if let Some(proxy) = self.listeners.remove(&pid) {
                self.publish(
                    Event::now(EventKind::ListenerStopped)
                        .with_pid(pid.as_raw())
                        .with_listener_id(proxy.listener_id()),
                );
                proxy.dispose();
            }
        }
        self.current = None;
        self.last_good = None;
    }

    // === Reaping ===

    fn reap_listeners(&mut self) {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(WaitStatus::Exited(pid, code)) => self.on_child_exit(pid, ExitKind::Code(code)),
                Ok(WaitStatus::Signaled(pid, sig, _)) => {
                    self.on_child_exit(pid, ExitKind::Signal(sig))
                }
                Ok(_) => continue,
                Err(Errno::ECHILD) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "waitpid failed");
                    break;
                }
            }
        }
    }

    fn on_child_exit(&mut self, pid: Pid, exit: ExitKind) {
        // Drain in-flight status bytes before the proxy goes away.
        let events = match self.listeners.get_mut(&pid) {
            Some(proxy) => proxy.read_events(),
            None => {
                tracing::debug!(pid = pid.as_raw(), "reaped unrelated child");
                return;
            }
        };
        for ev in events {
            self.on_listener_event(pid, ev);
        }

        let Some(proxy) = self.listeners.remove(&pid) else {
            return;
        };
        match exit {
            ExitKind::Code(0) => {
                tracing::info!(pid = pid.as_raw(), listener = proxy.listener_id(), "listener exited");
            }
            ExitKind::Code(code) => {
                tracing::warn!(pid = pid.as_raw(), code, "listener exited non-zero");
            }
            ExitKind::Signal(sig) => {
                tracing::warn!(pid = pid.as_raw(), ?sig, "listener killed by signal");
            }
        }

        if self.current == Some(pid) {
            self.current = None;
            if !self.stopping {
                self.backoff.died();
                if let Some(delay) = self.backoff.how_long() {
                    self.publish(
                        Event::now(EventKind::BackoffScheduled)
                            .with_pid(pid.as_raw())
                            .with_listener_id(proxy.listener_id())
                            .with_delay(delay),
                    );
                }
            }
        }
        if self.last_good == Some(pid) {
            self.last_good = None;
        }

        self.publish(
            Event::now(EventKind::ListenerStopped)
                .with_pid(pid.as_raw())
                .with_listener_id(proxy.listener_id()),
        );
        proxy.dispose();
        self.refresh_procline();
    }

    // === Listener lifecycle ===

    fn maybe_start_listener(&mut self) {
        if self.current.is_some() || self.paused || self.stopping {
            return;
        }
        if self.backoff.how_long().is_some() {
            return;
        }
        self.start_listener();
    }

    fn start_listener(&mut self) {
        let id = self.listeners_created + 1;
        let roster = self.old_workers();

        match ListenerProxy::spawn(&self.cfg, id, &roster) {
            Ok(proxy) => {
                let pid = proxy.pid();
                self.listeners_created = id;
                self.current = Some(pid);
                self.backoff.started();
                tracing::info!(
                    pid = pid.as_raw(),
                    listener = id,
                    old_workers = roster.len(),
                    "listener forked"
                );
                self.publish(
                    Event::now(EventKind::ListenerSpawned)
                        .with_pid(pid.as_raw())
                        .with_listener_id(id),
                );
                self.listeners.insert(pid, proxy);
                self.refresh_procline();
            }
            Err(e) => {
                tracing::error!(
                    program = ?self.cfg.listener_program,
                    error = %e,
                    "forking listener failed"
                );
                self.backoff.died();
                self.publish(Event::now(EventKind::SpawnFailed).with_error(e.to_string()));
            }
        }
    }

    fn rotate(&mut self) {
        match (self.current.take(), self.last_good) {
            // Keep serving from the retiring listener until the
            // replacement reports ready.
            (cur, None) => self.last_good = cur,
            // A rotation is already in flight: restart the boot, keep the
            // proven listener.
            (Some(cur), Some(_)) => self.quit_listener(cur),
            (None, Some(_)) => {}
        }
        self.refresh_procline();
    }

    fn quit_listener(&mut self, pid: Pid) {
        if let Some(proxy) = self.listeners.get_mut(&pid) {
            proxy.kill(Signal::SIGQUIT);
            proxy.mark_dying();
        }
    }

    // === Status-channel events ===

    fn drain_status_channels(&mut self) {
        let pids: Vec<Pid> = self.listeners.keys().copied().collect();
        for pid in pids {
            let events = match self.listeners.get_mut(&pid) {
                Some(proxy) => proxy.read_events(),
                None => continue,
            };
            for ev in events {
                self.on_listener_event(pid, ev);
            }
        }
    }

    fn on_listener_event(&mut self, reporter: Pid, ev: ListenerEvent) {
        match ev {
            ListenerEvent::Running => self.listener_running(reporter),
            ListenerEvent::WorkerStarted(wpid) => {
                let Some(proxy) = self.listeners.get_mut(&reporter) else {
                    return;
                };
                proxy.note_worker_started(wpid);
                let id = proxy.listener_id();
                self.publish(
                    Event::now(EventKind::WorkerStarted)
                        .with_pid(wpid as i32)
                        .with_listener_id(id),
                );
                self.refresh_procline();
            }
            ListenerEvent::WorkerStopped(wpid) => self.worker_stopped(reporter, wpid),
        }
    }

    fn listener_running(&mut self, reporter: Pid) {
        if self.current == Some(reporter) {
            let id = match self.listeners.get_mut(&reporter) {
                Some(proxy) => {
                    proxy.mark_ready();
                    proxy.listener_id()
                }
                None => return,
            };
            self.publish(
                Event::now(EventKind::ListenerReady)
                    .with_pid(reporter.as_raw())
                    .with_listener_id(id),
            );
            if let Some(old) = self.last_good.take() {
                self.quit_listener(old);
            }
            self.refresh_procline();
        } else {
            // A QUIT sent before the child installed its traps can be
            // lost; a retired listener announcing readiness is
            // re-signalled, never adopted.
            tracing::warn!(
                pid = reporter.as_raw(),
                "stale listener reported ready; re-signalling QUIT"
            );
            self.quit_listener(reporter);
        }
    }

    fn worker_stopped(&mut self, reporter: Pid, wpid: u32) {
        let known = self
            .listeners
            .values()
            .any(|p| p.running_workers().contains(&wpid));
        if !known {
            tracing::warn!(worker = wpid, "worker stop for unknown pid; dropped");
            return;
        }

        let reporter_id = self.listeners.get(&reporter).map(|p| p.listener_id());
        for (pid, proxy) in self.listeners.iter_mut() {
            proxy.note_worker_stopped(wpid);
            if *pid != reporter {
                proxy.worker_finished(wpid);
            }
        }

        let mut ev = Event::now(EventKind::WorkerStopped).with_pid(wpid as i32);
        if let Some(id) = reporter_id {
            ev = ev.with_listener_id(id);
        }
        self.publish(ev);
        self.refresh_procline();
    }

    // === Waiting ===

    async fn next_wakeup(&mut self) -> Wakeup {
        if let Some(sig) = self.signals.try_next() {
            return Wakeup::Signal(sig);
        }

        let idle = self.cfg.idle_interval;
        let wait = match self.backoff.how_long() {
            Some(delay) => delay.min(idle),
            None => idle,
        };
        let cancelled = self.shutdown.clone();
        let signals = &mut self.signals;
        let listeners = &self.listeners;

        tokio::select! {
            sig = signals.recv() => match sig {
                Some(sig) => Wakeup::Signal(sig),
                // Every sender is gone: a manual driver hung up.
                None => Wakeup::Cancelled,
            },
            _ = any_readable(listeners) => Wakeup::Io,
            _ = tokio::time::sleep(wait) => Wakeup::Timeout,
            _ = cancelled.cancelled() => Wakeup::Cancelled,
        }
    }

    /// Roster of running worker pids across all live listeners, handed to
    /// the next listener at spawn.
    fn old_workers(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self
            .listeners
            .values()
            .flat_map(|p| p.running_workers().iter().copied())
            .collect();
        pids.sort_unstable();
        pids.dedup();
        pids
    }

    fn refresh_procline(&self) {
        procline::set(&procline::master_title(
            self.listeners_created,
            self.listeners.len(),
            self.old_workers().len(),
            self.paused,
        ));
    }
}

/// Resolves when any live listener's status channel has pending data;
/// pends forever when there is nothing to watch.
async fn any_readable(listeners: &HashMap<Pid, ListenerProxy>) {
    let watched: Vec<_> = listeners
        .values()
        .filter(|p| !p.eof())
        .map(|p| Box::pin(p.readable()))
        .collect();
    if watched.is_empty() {
        std::future::pending::<()>().await;
    }
    select_all(watched).await;
}

/// Writes the master pid to the daemonizing wrapper and closes the pipe.
fn report_ready(fd: OwnedFd) {
    let mut pipe = std::fs::File::from(fd);
    if let Err(e) = write!(pipe, "{}", getpid()) {
        tracing::warn!(error = %e, "reporting readiness failed");
    }
}
