//! Clean boot, worker lifecycle, and boundary behaviors around a single
//! listener.

mod common;

use std::time::Duration;

use common::{is_kind, listener_event, worker_event, Scenario, TestMaster};
use resqued::{EventKind, MasterSignal};

const READY_LISTENER: &str = "\
trap 'exit 0' QUIT TERM INT
echo running >&$FD
while :; do sleep 0.1; done";

#[tokio::test]
async fn clean_boot_and_terminal_shutdown() {
    let _guard = common::serial();
    let scenario = Scenario::new();
    let listener = scenario.fake_listener(READY_LISTENER);
    let mut master = TestMaster::start(scenario.config(&listener));

    let spawned = master
        .expect_event("listener start", listener_event(EventKind::ListenerSpawned, 1))
        .await;
    let ready = master
        .expect_event("listener ready", listener_event(EventKind::ListenerReady, 1))
        .await;
    assert_eq!(spawned.pid, ready.pid, "start and ready must name the same child");

    // The census dump is purely diagnostic; the loop must carry on.
    master.signal(MasterSignal::Info).await;

    master.signal(MasterSignal::Term).await;
    let stopped = master
        .expect_event("listener stop", listener_event(EventKind::ListenerStopped, 1))
        .await;
    assert_eq!(stopped.pid, spawned.pid);

    tokio::time::timeout(Duration::from_secs(10), master.handle)
        .await
        .expect("master did not stop")
        .expect("master task panicked")
        .expect("master returned an error");
}

#[tokio::test]
async fn worker_lifecycle_is_reported() {
    let _guard = common::serial();
    let scenario = Scenario::new();
    let listener = scenario.fake_listener(
        "\
trap 'exit 0' QUIT TERM INT
echo running >&$FD
echo 'worker 100 start' >&$FD
sleep 0.3
echo 'worker 100 stop' >&$FD
while :; do sleep 0.1; done",
    );
    let mut master = TestMaster::start(scenario.config(&listener));

    master
        .expect_event("listener ready", listener_event(EventKind::ListenerReady, 1))
        .await;
    master
        .expect_event("worker start", worker_event(EventKind::WorkerStarted, 100))
        .await;
    master
        .expect_event("worker stop", worker_event(EventKind::WorkerStopped, 100))
        .await;

    master.shut_down().await;
}

#[tokio::test]
async fn eof_before_running_never_reports_ready() {
    let _guard = common::serial();
    let scenario = Scenario::new();
    // Dies during boot, without ever announcing readiness.
    let listener = scenario.fake_listener("exit 0");
    let mut master = TestMaster::start(scenario.config(&listener));

    master
        .expect_event("listener start", listener_event(EventKind::ListenerSpawned, 1))
        .await;
    let stopped = master
        .expect_event("listener stop", is_kind(EventKind::ListenerStopped))
        .await;
    assert_eq!(stopped.listener_id, Some(1));

    // The proxy went straight from booting to reaped; pause before
    // shutdown so a stray ready event would have time to surface.
    master.signal(MasterSignal::Usr2).await;
    master
        .expect_quiet(
            "ready for a listener that died booting",
            Duration::from_millis(300),
            |ev| ev.kind == EventKind::ListenerReady && ev.listener_id == Some(1),
        )
        .await;

    master.shut_down().await;
}

#[tokio::test]
async fn unknown_worker_stop_is_dropped() {
    let _guard = common::serial();
    let scenario = Scenario::new();
    let listener = scenario.fake_listener(
        "\
trap 'exit 0' QUIT TERM INT
echo running >&$FD
echo 'worker 999 stop' >&$FD
echo 'worker 7 start' >&$FD
while :; do sleep 0.1; done",
    );
    let mut master = TestMaster::start(scenario.config(&listener));

    // The start for worker 7 follows the bogus stop in emission order, so
    // seeing it proves the stop was processed (and dropped) first.
    let seen_before = master
        .expect_event("worker start", worker_event(EventKind::WorkerStarted, 7))
        .await;
    assert_eq!(seen_before.kind, EventKind::WorkerStarted);

    master
        .expect_quiet(
            "stop event for a pid no listener tracks",
            Duration::from_millis(200),
            |ev| ev.kind == EventKind::WorkerStopped,
        )
        .await;

    master.shut_down().await;
}
