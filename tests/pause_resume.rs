//! `USR2` / `CONT`: a paused master spawns nothing; resuming forks a
//! fresh listener rather than resurrecting the quit one.

mod common;

use std::time::Duration;

use common::{listener_event, Scenario, TestMaster};
use resqued::{EventKind, MasterSignal};

const READY_LISTENER: &str = "\
trap 'exit 0' QUIT TERM INT
echo running >&$FD
while :; do sleep 0.1; done";

#[tokio::test]
async fn pause_quits_current_and_resume_forks_a_successor() {
    let _guard = common::serial();
    let scenario = Scenario::new();
    let listener = scenario.fake_listener(READY_LISTENER);
    let mut master = TestMaster::start(scenario.config(&listener));

    master
        .expect_event("L1 ready", listener_event(EventKind::ListenerReady, 1))
        .await;

    master.signal(MasterSignal::Usr2).await;
    master
        .expect_event("L1 stop", listener_event(EventKind::ListenerStopped, 1))
        .await;

    // Paused: no replacement may be forked.
    master
        .expect_quiet(
            "listener fork while paused",
            Duration::from_millis(300),
            |ev| ev.kind == EventKind::ListenerSpawned,
        )
        .await;

    master.signal(MasterSignal::Cont).await;
    let spawned = master
        .expect_event("successor fork", |ev: &resqued::Event| {
            ev.kind == EventKind::ListenerSpawned
        })
        .await;
    // The quit listener is not resurrected; its successor takes the next
    // ordinal.
    assert_eq!(spawned.listener_id, Some(2));
    master
        .expect_event("successor ready", listener_event(EventKind::ListenerReady, 2))
        .await;

    master.shut_down().await;
}
