//! Per-pool runner ownership and sizing.

use crate::factory::RunnerFactory;
use crate::policy::{self, PoolCounts};
use chrono::Utc;
use flotilla_core::config::FleetSettings;
use flotilla_core::control_plane::ControlPlaneRunner;
use flotilla_core::events::RunnerEvent;
use flotilla_core::ports::InstanceEvent;
use flotilla_core::{PoolSpec, Result, Runner};
use flotilla_store::RunnerRepository;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one pass over a pool did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub created: usize,
    pub respawned: usize,
    pub deleted: usize,
}

/// Log a per-runner failure and swallow it, unless it is a store failure.
fn contain(result: Result<()>, runner: &str, action: &str) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_store() => Err(e),
        Err(e) => {
            warn!(runner, action, error = %e, "Runner action failed");
            Ok(false)
        }
    }
}

pub struct PoolManager {
    spec: PoolSpec,
    repo: RunnerRepository,
    factory: Arc<RunnerFactory>,
    settings: Arc<FleetSettings>,
}

impl PoolManager {
    pub fn new(
        spec: PoolSpec,
        repo: RunnerRepository,
        factory: Arc<RunnerFactory>,
        settings: Arc<FleetSettings>,
    ) -> Self {
        Self {
            spec,
            repo,
            factory,
            settings,
        }
    }

    pub fn spec(&self) -> &PoolSpec {
        &self.spec
    }

    /// Whether `runner` belongs to this pool and to this fleet.
    pub fn owns(&self, runner: &Runner) -> bool {
        runner.pool_tags == self.spec.tags
            && runner.name.starts_with(&self.settings.managed_prefix())
    }

    /// Owned runners matching `predicate`.
    pub fn filter_runners<P>(&self, runners: &[Runner], predicate: P) -> Vec<Runner>
    where
        P: Fn(&Runner) -> bool,
    {
        runners
            .iter()
            .filter(|&r| self.owns(r) && predicate(r))
            .cloned()
            .collect()
    }

    /// Fresh read of the pool's runners from the store.
    pub async fn runners(&self) -> Result<Vec<Runner>> {
        let runners = self.repo.pool_runners(&self.spec.tags).await?;
        Ok(self.filter_runners(&runners, |_| true))
    }

    pub async fn counts(&self) -> Result<PoolCounts> {
        let runners = self.runners().await?;
        Ok(PoolCounts::from_runners(&runners, &self.settings.timers, Utc::now()))
    }

    pub async fn need_new_runner(&self) -> Result<bool> {
        let counts = self.counts().await?;
        Ok(policy::need_new_runner(
            &counts,
            &self.spec.quantity,
            self.settings.policy.count_stuck_toward_min,
        ))
    }

    /// Fold a control-plane snapshot into the pool.
    ///
    /// Runners missing from the snapshot are deleted unless still
    /// provisioning; the rest take the control plane's view of their status.
    pub async fn update_runners(&self, records: &[ControlPlaneRunner]) -> Result<usize> {
        let by_name: HashMap<&str, &ControlPlaneRunner> =
            records.iter().map(|r| (r.name.as_str(), r)).collect();
        let mut deleted = 0;

        for runner in self.runners().await? {
            match by_name.get(runner.name.as_str()) {
                None if runner.is_creating() => {
                    debug!(runner = %runner.name, "Not registered yet, keeping");
                }
                None => {
                    info!(runner = %runner.name, status = %runner.status, "Runner gone from control plane");
                    if contain(
                        self.factory.delete_runner(&runner, &self.spec).await,
                        &runner.name,
                        "delete",
                    )? {
                        deleted += 1;
                    }
                }
                Some(record) => {
                    let record = (*record).clone();
                    let now = Utc::now();
                    let updated = self
                        .repo
                        .update(&runner.name, move |r| r.update_from_control_plane(&record, now))
                        .await?;
                    self.after_observation(&runner, updated).await;
                }
            }
        }
        Ok(deleted)
    }

    /// Apply a single-runner event. Returns whether the runner was found.
    pub async fn apply_event(&self, event: &RunnerEvent) -> Result<bool> {
        let status = event.status.clone();
        let busy = event.busy;
        let registration_id = event.registration_id;
        let now = Utc::now();

        let Some(before) = self.repo.get(&event.name).await? else {
            return Ok(false);
        };
        let updated = self
            .repo
            .update(&event.name, move |r| {
                r.observe(status.clone(), busy, registration_id, now)
            })
            .await?;
        let found = updated.is_some();
        self.after_observation(&before, updated).await;
        Ok(found)
    }

    async fn after_observation(&self, before: &Runner, after: Option<Runner>) {
        let Some(after) = after else { return };
        if after.status != before.status {
            debug!(runner = %after.name, from = %before.status, to = %after.status, "Runner status changed");
            let event = InstanceEvent::StatusChanged {
                from: before.status.clone(),
                to: after.status.clone(),
            };
            self.factory.notify_backend(&after, &self.spec, event).await;
        }
    }

    /// Apply the sizing policy: replace finished runners, recover stuck
    /// ones, fill up to `min`, then trim idle runners back down to `min`.
    pub async fn reconcile(&self) -> Result<PoolReport> {
        let mut report = PoolReport::default();
        let timeout = self.settings.timers.timeout_runner();

        let runners = self.runners().await?;
        for runner in self.filter_runners(&runners, Runner::has_run) {
            if contain(
                self.factory.respawn_replace(&runner, &self.spec).await,
                &runner.name,
                "respawn",
            )? {
                report.respawned += 1;
            }
        }

        let now = Utc::now();
        let runners = self.runners().await?;
        for runner in self.filter_runners(&runners, |r| r.should_never_spawn(timeout, now)) {
            warn!(runner = %runner.name, age_secs = runner.time_since_created(now).num_seconds(), "Runner stuck provisioning");
            if contain(
                self.factory.respawn_replace(&runner, &self.spec).await,
                &runner.name,
                "respawn",
            )? {
                report.respawned += 1;
            }
        }

        report.created += self.fill().await?;

        let runners = self.runners().await?;
        let victims = policy::idle_excess(
            &runners,
            &self.spec.quantity,
            self.settings.timers.extra_runner_online(),
            Utc::now(),
        );
        for runner in victims {
            info!(runner = %runner.name, "Deleting idle runner");
            if contain(
                self.factory.delete_runner(&runner, &self.spec).await,
                &runner.name,
                "delete",
            )? {
                report.deleted += 1;
            }
        }

        if report != PoolReport::default() {
            info!(
                pool = %self.spec.tags,
                created = report.created,
                respawned = report.respawned,
                deleted = report.deleted,
                "Pool reconciled"
            );
        }
        Ok(report)
    }

    /// Create runners while the policy asks for more.
    async fn fill(&self) -> Result<usize> {
        let mut created = 0;
        while self.need_new_runner().await? {
            match self.factory.create_runner(&self.spec).await {
                Ok(_) => created += 1,
                Err(e) if e.is_store() => return Err(e),
                Err(e) => {
                    warn!(pool = %self.spec.tags, error = %e, "Runner creation failed");
                    break;
                }
            }
        }
        Ok(created)
    }

    /// Create up to `count` extra runners without exceeding `max`.
    pub async fn request_runners(&self, count: usize) -> Result<usize> {
        let counts = self.counts().await?;
        let allowed = count.min(policy::free_slots(&counts, &self.spec.quantity));
        if allowed < count {
            info!(pool = %self.spec.tags, requested = count, allowed, "Runner request clamped to max");
        }

        let mut created = 0;
        for _ in 0..allowed {
            match self.factory.create_runner(&self.spec).await {
                Ok(_) => created += 1,
                Err(e) if e.is_store() => return Err(e),
                Err(e) => {
                    warn!(pool = %self.spec.tags, error = %e, "Runner creation failed");
                    break;
                }
            }
        }
        Ok(created)
    }

    /// Delete every runner in the pool, then fill back up to `min`.
    pub async fn reset(&self) -> Result<PoolReport> {
        let mut report = PoolReport::default();
        for runner in self.runners().await? {
            if contain(
                self.factory.delete_runner(&runner, &self.spec).await,
                &runner.name,
                "delete",
            )? {
                report.deleted += 1;
            }
        }
        report.created = self.fill().await?;
        info!(pool = %self.spec.tags, deleted = report.deleted, created = report.created, "Pool reset");
        Ok(report)
    }
}
