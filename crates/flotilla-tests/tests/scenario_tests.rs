//! Reconciliation scenarios against in-process fakes.

use chrono::Duration;
use flotilla_core::RunnerStatus;
use flotilla_core::control_plane::ControlPlaneRunner;
use flotilla_tests::{PoolFixture, RunnerFixture, TestFleet, init_test_logging};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_empty_pool_fills_to_min() {
    init_test_logging();
    let pool = PoolFixture::linux(2, 4);
    let tags = pool.tags.clone();
    let t = TestFleet::new(vec![pool]);

    let report = t.fleet.reconcile_all().await.unwrap();
    assert_eq!(report.created, 2);

    let runners = t.pool_runners(&tags).await;
    assert_eq!(runners.len(), 2);
    assert!(runners.iter().all(|r| r.status == RunnerStatus::Creating));

    let pool = t.fleet.pool(&tags).unwrap();
    assert!(!pool.need_new_runner().await.unwrap());

    t.fleet.wait_provisioned().await;
    let mut names: Vec<String> = t.pool_runners(&tags).await.into_iter().map(|r| r.name).collect();
    names.sort();
    assert_eq!(names, vec!["flotilla-linux-x64-1", "flotilla-linux-x64-2"]);
    assert_eq!(t.backend.instance_count(), 2);
    assert_eq!(t.control_plane.tokens_issued(), 2);
}

#[tokio::test]
async fn test_provisioning_writes_instance_id() {
    let pool = PoolFixture::linux(1, 1);
    let tags = pool.tags.clone();
    let t = TestFleet::new(vec![pool]);

    t.cycle().await;

    let runner = t.pool_runners(&tags).await.remove(0);
    assert_eq!(runner.status, RunnerStatus::Creating);
    assert_eq!(runner.instance_id, t.backend.instance_id(&runner.name));

    let request = t.backend.requests().remove(0);
    assert_eq!(request.registration.url, "https://github.example/acme");
    assert_eq!(request.registration.token.token, "token-1");
    let download = request.registration.download.unwrap();
    assert_eq!((download.os.as_str(), download.architecture.as_str()), ("linux", "x64"));
}

#[test]
fn test_finished_runner_has_run() {
    let tags = PoolFixture::linux(1, 2).tags;
    let mut runner = RunnerFixture::running("flotilla-linux-x64-1", &tags, 7);
    assert!(!runner.has_run());

    runner.update_status(RunnerStatus::Offline, chrono::Utc::now());
    assert!(runner.has_run());
}

#[tokio::test]
async fn test_stuck_runner_is_respawned() {
    let pool = PoolFixture::linux(1, 2);
    let tags = pool.tags.clone();
    let t = TestFleet::new(vec![pool]);

    let stuck = RunnerFixture::creating("flotilla-linux-x64-7", &tags, Duration::hours(2));
    t.seed(&stuck).await;
    let timeout = t.fleet.settings().timers.timeout_runner();
    assert!(stuck.should_never_spawn(timeout, chrono::Utc::now()));

    let report = t.cycle().await;
    assert_eq!(report.respawned, 1);
    assert_eq!(report.created, 0);

    let runner = t.runner("flotilla-linux-x64-7").await.unwrap();
    assert_eq!(runner.status, RunnerStatus::Respawning);
    assert!(runner.created_at > stuck.created_at);
    assert!(runner.instance_id.is_some());
    assert_eq!(t.fleet.stats().runners_respawned, 1);
}

#[tokio::test]
async fn test_update_runners_keeps_creating_deletes_missing_online() {
    let pool = PoolFixture::linux(0, 4);
    let tags = pool.tags.clone();
    let t = TestFleet::new(vec![pool]);

    let creating = RunnerFixture::creating("flotilla-linux-x64-1", &tags, Duration::minutes(1));
    let online = RunnerFixture::online("flotilla-linux-x64-2", &tags, 99, Duration::minutes(5));
    t.seed(&creating).await;
    t.seed(&online).await;

    let pool = t.fleet.pool(&tags).unwrap();
    let deleted = pool.update_runners(&[]).await.unwrap();

    assert_eq!(deleted, 1);
    assert!(t.runner("flotilla-linux-x64-1").await.is_some());
    assert!(t.runner("flotilla-linux-x64-2").await.is_none());
    assert_eq!(t.pool_runners(&tags).await.len(), 1);
}

#[tokio::test]
async fn test_update_runners_applies_control_plane_status() {
    let pool = PoolFixture::linux(0, 4);
    let tags = pool.tags.clone();
    let t = TestFleet::new(vec![pool]);
    t.seed(&RunnerFixture::creating("flotilla-linux-x64-3", &tags, Duration::minutes(1)))
        .await;

    let records = vec![ControlPlaneRunner {
        id: 42,
        name: "flotilla-linux-x64-3".to_string(),
        status: RunnerStatus::Online,
        busy: true,
        labels: vec!["linux".to_string(), "x64".to_string()],
    }];
    let pool = t.fleet.pool(&tags).unwrap();
    assert_eq!(pool.update_runners(&records).await.unwrap(), 0);

    let runner = t.runner("flotilla-linux-x64-3").await.unwrap();
    assert_eq!(runner.status, RunnerStatus::Running);
    assert_eq!(runner.registration_id, Some(42));
    assert!(runner.started_at.is_some());
    assert_eq!(runner.status_history, vec![RunnerStatus::Creating]);
}

#[tokio::test]
async fn test_orphan_sweep_deletes_unknown_instances_and_registrations() {
    let pool = PoolFixture::linux(0, 4);
    let tags = pool.tags.clone();
    let t = TestFleet::new(vec![pool]);

    let known = RunnerFixture::creating("flotilla-linux-x64-1", &tags, Duration::minutes(1));
    t.seed(&known).await;
    t.backend.insert_instance("flotilla-linux-x64-1", tags.clone());
    t.backend.insert_instance("flotilla-linux-x64-99", tags.clone());
    t.backend.insert_instance("other-fleet-1", tags.clone());
    t.control_plane
        .register("flotilla-linux-x64-98", RunnerStatus::Offline, false);
    t.control_plane
        .register("someone-elses-runner", RunnerStatus::Online, false);
    t.repo.add_to_pool(&tags, "flotilla-linux-x64-50").await.unwrap();

    let report = t.fleet.orphan_sweep().await.unwrap();

    assert_eq!(report.instances_deleted, 1);
    assert_eq!(report.registrations_deleted, 1);
    assert_eq!(report.index_entries_pruned, 1);
    assert_eq!(t.fleet.stats().orphans_deleted, 2);
    assert_eq!(
        t.backend.instance_names(),
        vec!["flotilla-linux-x64-1", "other-fleet-1"]
    );
    assert_eq!(t.control_plane.registered_names(), vec!["someone-elses-runner"]);
    assert_eq!(
        t.repo.pool_members(&tags).await.unwrap(),
        vec!["flotilla-linux-x64-1"]
    );
}
