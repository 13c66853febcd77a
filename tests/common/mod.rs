//! Shared harness for master integration tests.
//!
//! Each scenario runs the real supervision loop against fake listeners:
//! small bash scripts honoring the listener contract (`--status-fd`,
//! `--listener-id`, `--old-workers`, config paths; `running` / `worker`
//! lines upstream). Signals are driven through the manual queue and
//! observations come from a channel subscriber on the master's event
//! stream.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use resqued::{
    BackoffSettings, Config, Event, EventKind, Master, MasterError, MasterSignal, SignalQueue,
    Subscribe,
};

/// Masters reap with `waitpid(-1)`, so only one may run per process at a
/// time. Every test takes this lock first.
static LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn serial() -> MutexGuard<'static, ()> {
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

/// Subscriber that copies every event into a channel for assertions.
struct EventLog {
    tx: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl Subscribe for EventLog {
    async fn on_event(&self, event: &Event) {
        let _ = self.tx.send(event.clone());
    }

    fn name(&self) -> &'static str {
        "event-log"
    }
}

/// A workspace holding the config file and fake listener scripts.
pub struct Scenario {
    pub dir: tempfile::TempDir,
    pub config: PathBuf,
}

impl Scenario {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = dir.path().join("resqued.conf");
        std::fs::write(&config, "queue default\n").expect("write config");
        Self { dir, config }
    }

    /// Writes an executable fake-listener script. `body` runs after the
    /// contract arguments are parsed into `$FD`, `$ID`, and `$OLD`.
    pub fn fake_listener(&self, body: &str) -> PathBuf {
        let path = self.dir.path().join("fake-listener");
        let script = format!(
            "#!/bin/bash\n\
             FD=1; ID=0; OLD=\"\"\n\
             while [ $# -gt 0 ]; do\n\
             \x20 case \"$1\" in\n\
             \x20   --status-fd) FD=$2; shift 2;;\n\
             \x20   --listener-id) ID=$2; shift 2;;\n\
             \x20   --old-workers) OLD=$2; shift 2;;\n\
             \x20   *) shift;;\n\
             \x20 esac\n\
             done\n\
             {body}\n"
        );
        std::fs::write(&path, script).expect("write fake listener");
        let mut perms = std::fs::metadata(&path).expect("stat").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    /// A file fake listeners can append to; read back for assertions.
    pub fn outfile(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Config tuned for tests: short idle tick, fast backoff.
    pub fn config(&self, listener: &Path) -> Config {
        Config {
            config_paths: vec![self.config.clone()],
            listener_program: listener.to_path_buf(),
            idle_interval: Duration::from_millis(50),
            backoff: BackoffSettings {
                base: Duration::from_millis(25),
                max: Duration::from_secs(1),
                threshold: Duration::from_secs(60),
            },
            ..Config::default()
        }
    }
}

/// A running master plus its driver handles.
pub struct TestMaster {
    pub handle: JoinHandle<Result<(), MasterError>>,
    pub signals: mpsc::Sender<MasterSignal>,
    pub events: mpsc::UnboundedReceiver<Event>,
}

impl TestMaster {
    pub fn start(cfg: Config) -> Self {
        Self::start_with(cfg, Vec::new())
    }

    pub fn start_with(cfg: Config, mut extra: Vec<std::sync::Arc<dyn Subscribe>>) -> Self {
        let (queue, signals) = SignalQueue::manual();
        let (tx, events) = mpsc::unbounded_channel();
        let mut subscribers: Vec<std::sync::Arc<dyn Subscribe>> =
            vec![std::sync::Arc::new(EventLog { tx })];
        subscribers.append(&mut extra);

        let master = Master::new(cfg, queue, subscribers);
        let handle = tokio::spawn(master.run(None));
        Self {
            handle,
            signals,
            events,
        }
    }

    pub async fn signal(&self, sig: MasterSignal) {
        self.signals.send(sig).await.expect("master gone");
    }

    /// Waits (bounded) for the next event matching `pred`, discarding
    /// everything before it.
    pub async fn expect_event(&mut self, what: &str, pred: impl Fn(&Event) -> bool) -> Event {
        let fut = async {
            loop {
                let ev = self.events.recv().await.expect("event stream ended");
                if pred(&ev) {
                    return ev;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(10), fut)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
    }

    /// Waits until every predicate has matched one event (order between
    /// them unspecified), returning everything seen along the way.
    pub async fn expect_events(
        &mut self,
        what: &str,
        preds: Vec<Box<dyn Fn(&Event) -> bool>>,
    ) -> Vec<Event> {
        let mut unmatched: Vec<_> = preds.into_iter().map(Some).collect();
        let mut seen = Vec::new();
        let fut = async {
            while unmatched.iter().any(Option::is_some) {
                let ev = self.events.recv().await.expect("event stream ended");
                if let Some(slot) = unmatched
                    .iter_mut()
                    .find(|p| p.as_ref().is_some_and(|p| p(&ev)))
                {
                    *slot = None;
                }
                seen.push(ev);
            }
        };
        tokio::time::timeout(Duration::from_secs(10), fut)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
        seen
    }

    /// Asserts that nothing matching `pred` shows up within `window`.
    pub async fn expect_quiet(&mut self, what: &str, window: Duration, pred: impl Fn(&Event) -> bool) {
        let fut = async {
            loop {
                match self.events.recv().await {
                    Some(ev) if pred(&ev) => panic!("unexpected {what}: {ev:?}"),
                    Some(_) => {}
                    None => return,
                }
            }
        };
        let _ = tokio::time::timeout(window, fut).await;
    }

    /// Sends `TERM` and waits for the loop to finish cleanly.
    pub async fn shut_down(self) {
        self.signals
            .send(MasterSignal::Term)
            .await
            .expect("master gone");
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("master did not stop")
            .expect("master task panicked")
            .expect("master returned an error");
    }
}

pub fn is_kind(kind: EventKind) -> impl Fn(&Event) -> bool {
    move |ev| ev.kind == kind
}

pub fn listener_event(kind: EventKind, id: u64) -> impl Fn(&Event) -> bool {
    move |ev| ev.kind == kind && ev.listener_id == Some(id)
}

pub fn worker_event(kind: EventKind, pid: i32) -> impl Fn(&Event) -> bool {
    move |ev| ev.kind == kind && ev.pid == Some(pid)
}
