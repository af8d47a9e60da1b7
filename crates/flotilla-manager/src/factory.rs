//! Creating, respawning and tearing down runners.
//!
//! Only state store failures leave this module as errors. Control-plane and
//! backend failures are logged and counted so one bad runner cannot stall the
//! rest of the fleet.

use crate::provisioning::{ProvisionJob, ProvisioningQueue};
use crate::stats::FleetStats;
use chrono::Utc;
use flotilla_backend::BackendRegistry;
use flotilla_core::error::IgnoreNotFound;
use flotilla_core::ports::{ControlPlane, InstanceEvent};
use flotilla_core::{PoolSpec, Result, Runner, RunnerStatus, Tags};
use flotilla_store::RunnerRepository;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// `{prefix}-{tag slug}-{counter}`.
pub fn runner_name(prefix: &str, tags: &Tags, counter: u64) -> String {
    format!("{}-{}-{}", prefix, tags.slug(), counter)
}

pub struct RunnerFactory {
    repo: RunnerRepository,
    backends: BackendRegistry,
    control_plane: Arc<dyn ControlPlane>,
    queue: ProvisioningQueue,
    stats: Arc<FleetStats>,
    name_prefix: String,
}

impl RunnerFactory {
    pub fn new(
        repo: RunnerRepository,
        backends: BackendRegistry,
        control_plane: Arc<dyn ControlPlane>,
        queue: ProvisioningQueue,
        stats: Arc<FleetStats>,
        name_prefix: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            backends,
            control_plane,
            queue,
            stats,
            name_prefix: name_prefix.into(),
        }
    }

    pub fn queue(&self) -> &ProvisioningQueue {
        &self.queue
    }

    /// Persist a new pending runner for `pool` and queue its provisioning.
    ///
    /// Returns as soon as the record is stored and the job is queued.
    pub async fn create_runner(&self, pool: &PoolSpec) -> Result<Runner> {
        let counter = self.repo.next_counter(&pool.tags).await?;
        let runner = Runner::new(
            runner_name(&self.name_prefix, &pool.tags, counter),
            pool.tags.clone(),
            Utc::now(),
        );
        self.repo.insert(&runner).await?;
        self.stats.record_created();

        self.queue
            .submit(ProvisionJob {
                runner: runner.name.clone(),
                generation: runner.created_at,
                pool: pool.clone(),
            })
            .await?;

        info!(runner = %runner.name, pool = %pool.tags, "Runner created");
        Ok(runner)
    }

    /// Tear down the current instance and provision again under the same name.
    pub async fn respawn_replace(&self, runner: &Runner, pool: &PoolSpec) -> Result<()> {
        let now = Utc::now();
        let marked = self
            .repo
            .update(&runner.name, move |r| {
                r.update_status(RunnerStatus::Respawning, now);
            })
            .await?;
        let Some(current) = marked else {
            debug!(runner = %runner.name, "Runner vanished before respawn");
            return Ok(());
        };

        self.release(&current, pool).await;

        let reset = self
            .repo
            .update(&runner.name, move |r| r.reset_for_respawn(now))
            .await?;
        let Some(reset) = reset else {
            return Ok(());
        };

        self.queue
            .submit(ProvisionJob {
                runner: reset.name.clone(),
                generation: reset.created_at,
                pool: pool.clone(),
            })
            .await?;
        self.stats.record_respawned();

        info!(runner = %runner.name, pool = %pool.tags, previous = %runner.status, "Runner respawning");
        Ok(())
    }

    /// Mark the runner deleting, release its registration and instance, and
    /// drop it from the store. Safe to call repeatedly.
    pub async fn delete_runner(&self, runner: &Runner, pool: &PoolSpec) -> Result<()> {
        let now = Utc::now();
        let marked = self
            .repo
            .update(&runner.name, move |r| {
                r.update_status(RunnerStatus::Deleting, now);
            })
            .await?;
        let existed = marked.is_some();
        let current = marked.unwrap_or_else(|| runner.clone());

        self.release(&current, pool).await;
        self.repo.remove(&runner.name, &runner.pool_tags).await?;

        if existed {
            self.stats.record_deleted();
            info!(runner = %runner.name, pool = %pool.tags, "Runner deleted");
        } else {
            debug!(runner = %runner.name, "Runner record already gone, released leftovers");
        }
        Ok(())
    }

    /// Best-effort push of a status change to the backend instance.
    pub async fn notify_backend(&self, runner: &Runner, pool: &PoolSpec, event: InstanceEvent) {
        let backend = match self.backends.get(&pool.backend) {
            Ok(backend) => backend,
            Err(e) => {
                warn!(runner = %runner.name, error = %e, "Cannot sync instance metadata");
                return;
            }
        };
        if let Err(e) = backend.update(runner, &event).await {
            warn!(runner = %runner.name, error = %e, "Instance metadata sync failed");
        }
    }

    /// Remove the control-plane registration and the backend instance.
    async fn release(&self, runner: &Runner, pool: &PoolSpec) {
        if let Some(id) = runner.registration_id
            && let Err(e) = self
                .control_plane
                .force_delete_runner(id)
                .await
                .ignore_not_found()
        {
            self.stats.record_teardown_failure();
            warn!(runner = %runner.name, registration_id = id, error = %e, "Failed to delete registration");
        }

        let result = match self.backends.get(&pool.backend) {
            Ok(backend) => backend.delete(runner).await.ignore_not_found(),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.stats.record_teardown_failure();
            warn!(runner = %runner.name, backend = %pool.backend, error = %e, "Failed to delete instance");
        }
    }
}
