//! Top-level reconciliation across all pools.

use crate::factory::RunnerFactory;
use crate::pool::{PoolManager, PoolReport};
use crate::provisioning::{Provisioner, ProvisioningQueue};
use crate::stats::{FleetStats, StatsSnapshot};
use flotilla_backend::BackendRegistry;
use flotilla_core::config::FleetSettings;
use flotilla_core::control_plane::{RunnerGroup, RunnerGroupSpec};
use flotilla_core::error::IgnoreNotFound;
use flotilla_core::events::{EventRejection, RunnerEvent};
use flotilla_core::ports::{ControlPlane, StateStore};
use flotilla_core::{Error, Result, Runner, Tags};
use flotilla_store::RunnerRepository;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

const EVENT_QUEUE_DEPTH: usize = 1024;

/// External collaborators, constructed once at startup.
pub struct FleetDeps {
    pub store: Arc<dyn StateStore>,
    pub backends: BackendRegistry,
    pub control_plane: Arc<dyn ControlPlane>,
}

/// Outcome of one full reconciliation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub skipped: bool,
    pub synced: bool,
    pub created: usize,
    pub respawned: usize,
    pub deleted: usize,
}

impl CycleReport {
    fn absorb(&mut self, pool: PoolReport) {
        self.created += pool.created;
        self.respawned += pool.respawned;
        self.deleted += pool.deleted;
    }
}

/// Outcome of one orphan sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Managed runner records no configured pool indexes.
    pub records_removed: usize,
    pub instances_deleted: usize,
    pub registrations_deleted: usize,
    pub index_entries_pruned: usize,
}

pub struct FleetManager {
    settings: Arc<FleetSettings>,
    pools: Vec<PoolManager>,
    repo: RunnerRepository,
    backends: BackendRegistry,
    control_plane: Arc<dyn ControlPlane>,
    factory: Arc<RunnerFactory>,
    stats: Arc<FleetStats>,
    paused: AtomicBool,
    /// Serializes full cycles, event handling, sweeps and admin operations.
    cycle: Mutex<()>,
    events_tx: mpsc::Sender<RunnerEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<RunnerEvent>>>,
    workers: Mutex<Option<JoinHandle<()>>>,
}

impl FleetManager {
    /// Validate settings, start the provisioning workers and build one
    /// manager per pool.
    pub fn new(
        settings: FleetSettings,
        deps: FleetDeps,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Arc<Self>> {
        settings.validate(&deps.backends.names())?;
        let settings = Arc::new(settings);
        let repo = RunnerRepository::new(deps.store);
        let stats = FleetStats::new();

        let provisioner = Arc::new(Provisioner::new(
            repo.clone(),
            deps.backends.clone(),
            Arc::clone(&deps.control_plane),
            Arc::clone(&stats),
            settings.runner_group.clone(),
        ));
        let (queue, workers) =
            ProvisioningQueue::start(provisioner, &settings.provisioning, shutdown);

        let factory = Arc::new(RunnerFactory::new(
            repo.clone(),
            deps.backends.clone(),
            Arc::clone(&deps.control_plane),
            queue,
            Arc::clone(&stats),
            settings.name_prefix.clone(),
        ));

        let pools = settings
            .pools
            .iter()
            .map(|spec| {
                PoolManager::new(
                    spec.clone(),
                    repo.clone(),
                    Arc::clone(&factory),
                    Arc::clone(&settings),
                )
            })
            .collect();

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        info!(
            pools = settings.pools.len(),
            prefix = %settings.name_prefix,
            "Fleet manager initialized"
        );

        Ok(Arc::new(Self {
            settings,
            pools,
            repo,
            backends: deps.backends,
            control_plane: deps.control_plane,
            factory,
            stats,
            paused: AtomicBool::new(false),
            cycle: Mutex::new(()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            workers: Mutex::new(Some(workers)),
        }))
    }

    pub fn settings(&self) -> &FleetSettings {
        &self.settings
    }

    pub fn pools(&self) -> &[PoolManager] {
        &self.pools
    }

    pub fn pool(&self, tags: &Tags) -> Option<&PoolManager> {
        self.pools.iter().find(|p| &p.spec().tags == tags)
    }

    pub fn factory(&self) -> &Arc<RunnerFactory> {
        &self.factory
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Wait until every queued provisioning job has finished.
    pub async fn wait_provisioned(&self) {
        self.factory.queue().wait_idle().await;
    }

    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("Reconciliation paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("Reconciliation resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// State store reachability.
    pub async fn ping(&self) -> Result<()> {
        self.repo.store().ping().await
    }

    /// All runner records, managed by this fleet or not.
    pub async fn runners(&self) -> Result<Vec<Runner>> {
        self.repo.all_runners().await
    }

    /// One full cycle: sync every pool with the control plane, then apply
    /// the sizing policy. Only store failures abort the cycle.
    pub async fn reconcile_all(&self) -> Result<CycleReport> {
        if self.is_paused() {
            debug!("Reconciliation paused, skipping cycle");
            return Ok(CycleReport {
                skipped: true,
                ..Default::default()
            });
        }

        let _guard = self.cycle.lock().await;
        let mut report = CycleReport::default();

        let snapshot = match self.control_plane.list_runners().await {
            Ok(records) => Some(records),
            Err(e) => {
                warn!(error = %e, "Control-plane sync failed, applying policy on stored state");
                None
            }
        };

        for pool in &self.pools {
            if let Some(records) = &snapshot {
                report.deleted += pool.update_runners(records).await?;
            }
            report.absorb(pool.reconcile().await?);
        }

        report.synced = snapshot.is_some();
        self.stats.record_cycle();
        debug!(?report, "Reconciliation cycle complete");
        Ok(report)
    }

    /// Queue a runner event without waiting. Full queues drop the event.
    pub fn submit_event(&self, event: RunnerEvent) {
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.stats.record_event_dropped();
                warn!(runner = %event.name, "Event queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.stats.record_event_dropped();
                warn!(runner = %event.name, "Event queue closed, dropping event");
            }
        }
    }

    /// Count and log an event body that could not be turned into a `RunnerEvent`.
    pub fn reject_event(&self, reason: &EventRejection) {
        self.stats.record_event_dropped();
        warn!(%reason, "Dropping unusable event");
    }

    /// Update one runner from an event and re-run policy for its pool only.
    pub async fn handle_event(&self, event: &RunnerEvent) -> Result<()> {
        if !event.name.starts_with(&self.settings.managed_prefix()) {
            debug!(runner = %event.name, "Event for unmanaged runner, ignoring");
            self.stats.record_event_dropped();
            return Ok(());
        }
        if self.is_paused() {
            debug!(runner = %event.name, "Reconciliation paused, ignoring event");
            self.stats.record_event_dropped();
            return Ok(());
        }

        let _guard = self.cycle.lock().await;

        let Some(runner) = self.repo.get(&event.name).await? else {
            debug!(runner = %event.name, "Event for unknown runner, ignoring");
            self.stats.record_event_dropped();
            return Ok(());
        };
        let Some(pool) = self.pool(&runner.pool_tags) else {
            debug!(runner = %event.name, pool = %runner.pool_tags, "Runner belongs to no configured pool");
            self.stats.record_event_dropped();
            return Ok(());
        };

        pool.apply_event(event).await?;
        pool.reconcile().await?;
        self.stats.record_event_processed();
        Ok(())
    }

    /// Drop managed runner records that no configured pool indexes, delete
    /// backend instances and control-plane registrations under the managed
    /// prefix that have no runner record, and prune stale pool index entries.
    pub async fn orphan_sweep(&self) -> Result<SweepReport> {
        let _guard = self.cycle.lock().await;
        let prefix = self.settings.managed_prefix();
        let mut report = SweepReport::default();

        report.records_removed = self.remove_stranded_records(&prefix).await?;
        let known: HashSet<String> = self.repo.all_names().await?.into_iter().collect();

        for (name, backend) in self.backends.iter() {
            let instances = match backend.list(&prefix).await {
                Ok(instances) => instances,
                Err(e) => {
                    warn!(backend = %name, error = %e, "Failed to list instances");
                    continue;
                }
            };
            for instance in instances.iter().filter(|i| !known.contains(&i.name)) {
                match backend.delete(instance).await.ignore_not_found() {
                    Ok(()) => {
                        self.stats.record_orphan_deleted();
                        report.instances_deleted += 1;
                        info!(backend = %name, instance = %instance.name, "Deleted orphan instance");
                    }
                    Err(e) => {
                        warn!(backend = %name, instance = %instance.name, error = %e, "Failed to delete orphan instance");
                    }
                }
            }
        }

        match self.control_plane.list_runners().await {
            Ok(records) => {
                for record in records
                    .iter()
                    .filter(|r| r.name.starts_with(&prefix) && !known.contains(&r.name))
                {
                    match self
                        .control_plane
                        .force_delete_runner(record.id)
                        .await
                        .ignore_not_found()
                    {
                        Ok(()) => {
                            self.stats.record_orphan_deleted();
                            report.registrations_deleted += 1;
                            info!(runner = %record.name, registration_id = record.id, "Deleted orphan registration");
                        }
                        Err(e) => {
                            warn!(runner = %record.name, error = %e, "Failed to delete orphan registration");
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to list control-plane runners"),
        }

        for pool in &self.pools {
            report.index_entries_pruned += self.repo.prune_pool_index(&pool.spec().tags).await?.len();
        }

        if report != SweepReport::default() {
            info!(
                records = report.records_removed,
                instances = report.instances_deleted,
                registrations = report.registrations_deleted,
                pruned = report.index_entries_pruned,
                "Orphan sweep complete"
            );
        }
        Ok(report)
    }

    /// Remove managed records that no pool manager will ever see: their
    /// index entry was never written, or their pool is no longer configured.
    /// Their instances and registrations become orphans for the rest of the
    /// sweep.
    async fn remove_stranded_records(&self, prefix: &str) -> Result<usize> {
        let mut indexed = HashSet::new();
        for pool in &self.pools {
            indexed.extend(self.repo.pool_members(&pool.spec().tags).await?);
        }

        let mut removed = 0;
        for runner in self.repo.all_runners().await? {
            if !runner.name.starts_with(prefix) || indexed.contains(&runner.name) {
                continue;
            }
            warn!(runner = %runner.name, pool = %runner.pool_tags, "Removing runner record no pool tracks");
            self.repo.remove(&runner.name, &runner.pool_tags).await?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Tear down and recreate every runner in every pool.
    pub async fn reset(&self) -> Result<CycleReport> {
        let _guard = self.cycle.lock().await;
        let mut report = CycleReport::default();
        for pool in &self.pools {
            report.absorb(pool.reset().await?);
        }
        warn!(deleted = report.deleted, created = report.created, "Fleet reset");
        Ok(report)
    }

    /// Create up to `count` extra runners in the pool with these tags.
    pub async fn request_runners(&self, tags: &Tags, count: usize) -> Result<usize> {
        let pool = self
            .pool(tags)
            .ok_or_else(|| Error::NotFound(format!("pool {}", tags)))?;
        let _guard = self.cycle.lock().await;
        pool.request_runners(count).await
    }

    /// Make sure the configured runner group exists.
    pub async fn ensure_runner_group(&self) -> Result<Option<RunnerGroup>> {
        let Some(name) = &self.settings.runner_group else {
            return Ok(None);
        };

        let groups = self.control_plane.list_runner_groups().await?;
        if let Some(group) = groups.into_iter().find(|g| &g.name == name) {
            debug!(group = %name, id = group.id, "Runner group present");
            return Ok(Some(group));
        }

        let group = self
            .control_plane
            .create_runner_group(&RunnerGroupSpec::new(name.clone()))
            .await?;
        info!(group = %name, id = group.id, "Runner group created");
        Ok(Some(group))
    }

    /// Drive periodic syncs, orphan sweeps and queued events until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut events = self
            .events_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Internal("fleet loop already running".to_string()))?;

        if let Err(e) = self.ensure_runner_group().await {
            warn!(error = %e, "Could not ensure runner group");
        }

        let timers = &self.settings.timers;
        let mut sync = interval(Duration::from_secs(timers.sync_interval_secs.max(1)));
        let mut sweep = interval(Duration::from_secs(timers.orphan_sweep_interval_secs.max(1)));
        sync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            sync_interval_secs = timers.sync_interval_secs,
            orphan_sweep_interval_secs = timers.orphan_sweep_interval_secs,
            "Fleet loop started"
        );

        loop {
            tokio::select! {
                _ = sync.tick() => {
                    if let Err(e) = self.reconcile_all().await {
                        error!(error = %e, "Reconciliation cycle aborted");
                    }
                }
                _ = sweep.tick() => {
                    if self.is_paused() {
                        continue;
                    }
                    if let Err(e) = self.orphan_sweep().await {
                        error!(error = %e, "Orphan sweep aborted");
                    }
                }
                Some(event) = events.recv() => {
                    if let Err(e) = self.handle_event(&event).await {
                        error!(runner = %event.name, error = %e, "Event handling aborted");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Fleet loop shutting down");
                        break;
                    }
                }
            }
        }

        if let Some(workers) = self.workers.lock().await.take()
            && let Err(e) = workers.await
        {
            warn!(error = %e, "Provisioning workers ended abnormally");
        }
        Ok(())
    }
}
