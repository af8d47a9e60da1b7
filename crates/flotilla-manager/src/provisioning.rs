//! Out-of-band provisioning.
//!
//! The reconciliation cycle only ever submits jobs here. Workers take them off
//! a bounded queue, call the control plane and the backend, and write the
//! resulting instance id back to the runner record. At most
//! `provisioning.workers` jobs run at once.

use crate::stats::FleetStats;
use chrono::{DateTime, Utc};
use flotilla_backend::BackendRegistry;
use flotilla_core::config::ProvisioningConfig;
use flotilla_core::ports::{ControlPlane, ProvisionRequest, Registration};
use flotilla_core::{Error, PoolSpec, Result};
use flotilla_store::RunnerRepository;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Notify, Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One pending provisioning of a runner.
#[derive(Debug, Clone)]
pub struct ProvisionJob {
    pub runner: String,
    /// `created_at` of the lifecycle this job provisions. A respawn starts a
    /// new lifecycle, which makes older jobs for the same name stale.
    pub generation: DateTime<Utc>,
    pub pool: PoolSpec,
}

/// Performs the provisioning work for one job.
pub struct Provisioner {
    repo: RunnerRepository,
    backends: BackendRegistry,
    control_plane: Arc<dyn ControlPlane>,
    stats: Arc<FleetStats>,
    runner_group: Option<String>,
}

impl Provisioner {
    pub fn new(
        repo: RunnerRepository,
        backends: BackendRegistry,
        control_plane: Arc<dyn ControlPlane>,
        stats: Arc<FleetStats>,
        runner_group: Option<String>,
    ) -> Self {
        Self {
            repo,
            backends,
            control_plane,
            stats,
            runner_group,
        }
    }

    /// Provision one runner. Failures are counted and returned for logging;
    /// the runner stays pending and stuck recovery picks it up.
    pub async fn provision(&self, job: &ProvisionJob) -> Result<()> {
        let result = self.try_provision(job).await;
        if let Err(e) = &result
            && !e.is_store()
        {
            self.stats.record_provision_failure();
        }
        result
    }

    async fn try_provision(&self, job: &ProvisionJob) -> Result<()> {
        let Some(runner) = self.repo.get(&job.runner).await? else {
            debug!(runner = %job.runner, "Runner removed before provisioning, skipping");
            return Ok(());
        };
        if !runner.is_creating() || runner.created_at != job.generation {
            debug!(runner = %job.runner, status = %runner.status, "Stale provisioning job, skipping");
            return Ok(());
        }

        let backend = self.backends.get(&job.pool.backend)?;
        let token = self.control_plane.create_registration_token().await?;

        let platform = &job.pool.platform;
        let download = match self
            .control_plane
            .get_download_asset(&platform.os, &platform.arch)
            .await
        {
            Ok(asset) => Some(asset),
            Err(e) => {
                warn!(runner = %job.runner, os = %platform.os, arch = %platform.arch, error = %e, "No runner download, agent image must bring its own");
                None
            }
        };

        let request = ProvisionRequest {
            runner,
            pool: job.pool.clone(),
            registration: Registration {
                token,
                url: self.control_plane.registration_url(),
                download,
                runner_group: self.runner_group.clone(),
            },
        };

        let instance_id = backend.create(&request).await?;

        let generation = job.generation;
        let id = instance_id.clone();
        let stored = self
            .repo
            .update(&job.runner, move |r| {
                if r.created_at == generation && r.is_creating() {
                    r.instance_id = Some(id.clone());
                }
            })
            .await?;

        if stored.and_then(|r| r.instance_id) != Some(instance_id.clone()) {
            // Deleted, being deleted, or respawned while the backend call was
            // in flight.
            let mut orphan = request.runner;
            orphan.instance_id = Some(instance_id);
            warn!(runner = %job.runner, "Runner changed during provisioning, removing new instance");
            backend.delete(&orphan).await?;
            return Ok(());
        }

        info!(runner = %job.runner, instance_id = %instance_id, pool = %job.pool.tags, "Runner provisioned");
        Ok(())
    }
}

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn start(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.current() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Handle for submitting provisioning jobs.
#[derive(Clone)]
pub struct ProvisioningQueue {
    tx: mpsc::Sender<ProvisionJob>,
    in_flight: Arc<InFlight>,
}

impl ProvisioningQueue {
    /// Start the worker loop. It stops when `shutdown` flips to `true`.
    pub fn start(
        provisioner: Arc<Provisioner>,
        config: &ProvisioningConfig,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let in_flight = Arc::new(InFlight::default());
        let workers = Arc::new(Semaphore::new(config.workers.max(1)));

        let handle = tokio::spawn(run_workers(
            rx,
            provisioner,
            workers,
            Arc::clone(&in_flight),
            shutdown,
        ));

        (Self { tx, in_flight }, handle)
    }

    /// Queue a job. Waits only for queue space, never for the job itself.
    pub async fn submit(&self, job: ProvisionJob) -> Result<()> {
        self.in_flight.start();
        if self.tx.send(job).await.is_err() {
            self.in_flight.finish();
            return Err(Error::Internal("provisioning queue is closed".to_string()));
        }
        Ok(())
    }

    /// Jobs queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.current()
    }

    /// Resolve once no job is queued or running.
    pub async fn wait_idle(&self) {
        self.in_flight.wait_idle().await;
    }
}

/// Resolves once `shutdown` reads `true`. Never resolves if the sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn run_workers(
    mut rx: mpsc::Receiver<ProvisionJob>,
    provisioner: Arc<Provisioner>,
    workers: Arc<Semaphore>,
    in_flight: Arc<InFlight>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(workers = workers.available_permits(), "Provisioning workers started");

    loop {
        let job = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let permit = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => {
                in_flight.finish();
                break;
            }
            permit = Arc::clone(&workers).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    in_flight.finish();
                    break;
                }
            },
        };

        let provisioner = Arc::clone(&provisioner);
        let in_flight = Arc::clone(&in_flight);
        tokio::spawn(async move {
            if let Err(e) = provisioner.provision(&job).await {
                error!(runner = %job.runner, pool = %job.pool.tags, error = %e, "Provisioning failed");
            }
            drop(permit);
            in_flight.finish();
        });
    }

    // Queued jobs are abandoned; their runners stay pending for the next run.
    rx.close();
    let mut abandoned = 0;
    while let Ok(job) = rx.try_recv() {
        debug!(runner = %job.runner, "Dropping queued provisioning job");
        in_flight.finish();
        abandoned += 1;
    }
    info!(abandoned, "Provisioning workers stopped");
}
