//! Crash backoff: respawns after rapid listener deaths are throttled with
//! growing delays.

mod common;

use std::time::Duration;

use common::{is_kind, listener_event, Scenario, TestMaster};
use resqued::{EventKind, MasterSignal};

#[tokio::test]
async fn rapid_crashes_throttle_respawns() {
    let _guard = common::serial();
    let scenario = Scenario::new();
    // Crashes during boot, every time.
    let listener = scenario.fake_listener("exit 1");
    let mut master = TestMaster::start(scenario.config(&listener));

    master
        .expect_event("L1 fork", listener_event(EventKind::ListenerSpawned, 1))
        .await;
    let first = master
        .expect_event("first backoff", is_kind(EventKind::BackoffScheduled))
        .await;
    assert_eq!(first.delay, Some(Duration::from_millis(25)));
    assert_eq!(first.listener_id, Some(1));

    master
        .expect_event("L2 fork", listener_event(EventKind::ListenerSpawned, 2))
        .await;
    let second = master
        .expect_event("second backoff", is_kind(EventKind::BackoffScheduled))
        .await;
    assert_eq!(
        second.delay,
        Some(Duration::from_millis(50)),
        "the wait must double while the listener is flapping"
    );
    assert_eq!(second.listener_id, Some(2));

    master
        .expect_event("L3 fork", listener_event(EventKind::ListenerSpawned, 3))
        .await;

    // Stop the crash loop before shutting down.
    master.signal(MasterSignal::Usr2).await;
    master.shut_down().await;
}
