//! A full fleet manager wired over in-process fakes.

use crate::fakes::{FakeBackend, FakeControlPlane, FlakyStore};
use crate::fixtures::{FAKE_BACKEND, PoolFixture};
use flotilla_backend::BackendRegistry;
use flotilla_core::config::FleetSettings;
use flotilla_core::{PoolSpec, Runner, RunnerStatus, Tags};
use flotilla_manager::{CycleReport, FleetDeps, FleetManager};
use flotilla_store::RunnerRepository;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct TestFleet {
    pub fleet: Arc<FleetManager>,
    pub repo: RunnerRepository,
    pub store: Arc<FlakyStore>,
    pub backend: Arc<FakeBackend>,
    pub control_plane: Arc<FakeControlPlane>,
    shutdown: watch::Sender<bool>,
}

impl TestFleet {
    /// Must be called inside a tokio runtime: the provisioning workers
    /// start immediately.
    pub fn new(pools: Vec<PoolSpec>) -> Self {
        Self::with_settings(PoolFixture::settings(pools))
    }

    pub fn with_settings(settings: FleetSettings) -> Self {
        let store = Arc::new(FlakyStore::new());
        let backend = Arc::new(FakeBackend::new());
        let control_plane = Arc::new(FakeControlPlane::new());

        let mut backends = BackendRegistry::new();
        backends.insert(FAKE_BACKEND, backend.clone());

        let (shutdown, shutdown_rx) = watch::channel(false);
        let fleet = FleetManager::new(
            settings,
            FleetDeps {
                store: store.clone(),
                backends,
                control_plane: control_plane.clone(),
            },
            shutdown_rx,
        )
        .expect("fleet settings should be valid");

        Self {
            fleet,
            repo: RunnerRepository::new(store.clone()),
            store,
            backend,
            control_plane,
            shutdown,
        }
    }

    /// One full reconciliation cycle, then wait for the provisioning it queued.
    pub async fn cycle(&self) -> CycleReport {
        let report = self
            .fleet
            .reconcile_all()
            .await
            .expect("reconciliation cycle failed");
        self.fleet.wait_provisioned().await;
        report
    }

    /// Run the fleet loop in the background until the harness is dropped.
    pub fn start(&self) -> JoinHandle<flotilla_core::Result<()>> {
        tokio::spawn(Arc::clone(&self.fleet).run(self.shutdown.subscribe()))
    }

    /// Signal shutdown to the fleet loop and the provisioning workers.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Register every provisioned runner that has not registered yet, the
    /// way booting agents would. Returns how many registered.
    pub async fn boot_agents(&self) -> usize {
        let mut booted = 0;
        for runner in self.repo.all_runners().await.expect("store read failed") {
            if runner.instance_id.is_some()
                && self.control_plane.registration(&runner.name).is_none()
            {
                self.control_plane
                    .register(&runner.name, RunnerStatus::Online, false);
                booted += 1;
            }
        }
        booted
    }

    /// Current records of the pool with `tags`.
    pub async fn pool_runners(&self, tags: &Tags) -> Vec<Runner> {
        self.repo.pool_runners(tags).await.expect("store read failed")
    }

    pub async fn runner(&self, name: &str) -> Option<Runner> {
        self.repo.get(name).await.expect("store read failed")
    }

    /// Seed a record directly, bypassing the factory.
    pub async fn seed(&self, runner: &Runner) {
        self.repo.insert(runner).await.expect("store write failed");
    }
}

impl Drop for TestFleet {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
