//! Event-driven updates between full syncs.

use chrono::Duration;
use flotilla_core::RunnerStatus;
use flotilla_core::events::RunnerEvent;
use flotilla_tests::{PoolFixture, RunnerFixture, TestFleet};
use pretty_assertions::assert_eq;
use std::time::Duration as StdDuration;

fn event(name: &str, status: RunnerStatus, busy: bool) -> RunnerEvent {
    RunnerEvent {
        name: name.to_string(),
        registration_id: Some(11),
        status,
        busy,
        labels: vec!["linux".to_string(), "x64".to_string()],
    }
}

#[tokio::test]
async fn test_event_updates_single_runner() {
    let pool = PoolFixture::linux(0, 2);
    let tags = pool.tags.clone();
    let t = TestFleet::new(vec![pool]);
    let name = "flotilla-linux-x64-1";
    t.seed(&RunnerFixture::creating(name, &tags, Duration::minutes(1)))
        .await;

    t.fleet
        .handle_event(&event(name, RunnerStatus::Online, true))
        .await
        .unwrap();

    let runner = t.runner(name).await.unwrap();
    assert_eq!(runner.status, RunnerStatus::Running);
    assert_eq!(runner.registration_id, Some(11));
    assert_eq!(t.fleet.stats().events_processed, 1);
}

#[tokio::test]
async fn test_completed_event_triggers_respawn() {
    let pool = PoolFixture::linux(0, 2);
    let tags = pool.tags.clone();
    let t = TestFleet::new(vec![pool]);
    let name = "flotilla-linux-x64-1";
    t.seed(&RunnerFixture::running(name, &tags, 11)).await;

    t.fleet
        .handle_event(&event(name, RunnerStatus::Offline, false))
        .await
        .unwrap();
    t.fleet.wait_provisioned().await;

    let runner = t.runner(name).await.unwrap();
    assert_eq!(runner.status, RunnerStatus::Respawning);
    assert!(runner.instance_id.is_some());
    assert_eq!(t.fleet.stats().runners_respawned, 1);
}

#[tokio::test]
async fn test_offline_event_ignored_while_creating() {
    let pool = PoolFixture::linux(0, 2);
    let tags = pool.tags.clone();
    let t = TestFleet::new(vec![pool]);
    let name = "flotilla-linux-x64-1";
    t.seed(&RunnerFixture::creating(name, &tags, Duration::minutes(1)))
        .await;

    t.fleet
        .handle_event(&event(name, RunnerStatus::Offline, false))
        .await
        .unwrap();

    let runner = t.runner(name).await.unwrap();
    assert_eq!(runner.status, RunnerStatus::Creating);
    assert!(runner.status_history.is_empty());
}

#[tokio::test]
async fn test_unusable_events_are_dropped() {
    let pool = PoolFixture::linux(0, 2);
    let tags = pool.tags.clone();
    let t = TestFleet::new(vec![pool]);

    // Not ours.
    t.fleet
        .handle_event(&event("other-linux-1", RunnerStatus::Online, false))
        .await
        .unwrap();
    // Ours by prefix, but unknown.
    t.fleet
        .handle_event(&event("flotilla-linux-x64-404", RunnerStatus::Online, false))
        .await
        .unwrap();
    // Known, but while paused.
    t.seed(&RunnerFixture::creating("flotilla-linux-x64-1", &tags, Duration::minutes(1)))
        .await;
    t.fleet.pause();
    t.fleet
        .handle_event(&event("flotilla-linux-x64-1", RunnerStatus::Online, false))
        .await
        .unwrap();

    let stats = t.fleet.stats();
    assert_eq!(stats.events_dropped, 3);
    assert_eq!(stats.events_processed, 0);
    assert_eq!(
        t.runner("flotilla-linux-x64-1").await.unwrap().status,
        RunnerStatus::Creating
    );
}

#[tokio::test]
async fn test_submitted_event_processed_by_fleet_loop() {
    let pool = PoolFixture::linux(0, 2);
    let tags = pool.tags.clone();
    let t = TestFleet::new(vec![pool]);
    let name = "flotilla-linux-x64-1";
    t.seed(&RunnerFixture::creating(name, &tags, Duration::minutes(1)))
        .await;
    // Registered too, so the loop's first full sync agrees with the event.
    t.control_plane.register(name, RunnerStatus::Online, false);

    let _loop = t.start();
    t.fleet.submit_event(event(name, RunnerStatus::Online, false));

    tokio::time::timeout(StdDuration::from_secs(5), async {
        while t.fleet.stats().events_processed == 0 {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
    })
    .await
    .expect("event was not processed");

    assert_eq!(t.runner(name).await.unwrap().status, RunnerStatus::Online);
}
