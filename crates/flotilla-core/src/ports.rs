//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the reconciliation engine and
//! the outside world: the infrastructure that hosts runners, the control
//! plane that schedules jobs onto them, and the durable state store.

use crate::Result;
use crate::control_plane::{
    ControlPlaneRunner, DownloadAsset, RegistrationToken, RunnerGroup, RunnerGroupSpec,
};
use crate::pool::PoolSpec;
use crate::runner::{Runner, RunnerStatus};
use async_trait::async_trait;
use serde_json::Value;

/// Everything a backend needs to bring one runner up.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub runner: Runner,
    pub pool: PoolSpec,
    pub registration: Registration,
}

/// Credentials and endpoints handed to the agent inside the instance.
#[derive(Debug, Clone)]
pub struct Registration {
    pub token: RegistrationToken,
    /// URL the agent registers against.
    pub url: String,
    pub download: Option<DownloadAsset>,
    pub runner_group: Option<String>,
}

/// Metadata change pushed to a backend instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceEvent {
    StatusChanged {
        from: RunnerStatus,
        to: RunnerStatus,
    },
}

/// Infrastructure provider hosting runner instances.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Discriminator this backend is configured under, e.g. `docker`.
    fn kind(&self) -> &'static str;

    /// Provision an instance and return its opaque handle.
    ///
    /// Safe to retry: any instance left over under the same name is removed
    /// first. Transient failures are retried a bounded number of times before
    /// giving up with [`crate::Error::Provision`].
    async fn create(&self, request: &ProvisionRequest) -> Result<String>;

    /// Destroy the runner's instance. Deleting an absent instance succeeds.
    async fn delete(&self, runner: &Runner) -> Result<()>;

    /// List instances whose name starts with `prefix`, reconstructed as
    /// best-effort runners for orphan detection.
    async fn list(&self, prefix: &str) -> Result<Vec<Runner>>;

    /// Best-effort metadata sync. Callers log failures and move on.
    ///
    /// Backends whose instances cannot be relabelled after creation accept
    /// the call and do nothing; the Docker backend is one of them.
    async fn update(&self, runner: &Runner, event: &InstanceEvent) -> Result<()>;
}

/// The remote job-scheduling service.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// All registered runners, aggregated across pages.
    async fn list_runners(&self) -> Result<Vec<ControlPlaneRunner>>;

    async fn create_registration_token(&self) -> Result<RegistrationToken>;

    /// Remove a registration. An unknown id yields [`crate::Error::NotFound`].
    async fn force_delete_runner(&self, id: u64) -> Result<()>;

    async fn get_download_asset(&self, os: &str, arch: &str) -> Result<DownloadAsset>;

    /// URL agents register against.
    fn registration_url(&self) -> String;

    async fn list_runner_groups(&self) -> Result<Vec<RunnerGroup>>;

    async fn create_runner_group(&self, spec: &RunnerGroupSpec) -> Result<RunnerGroup>;

    async fn update_runner_group(&self, id: u64, spec: &RunnerGroupSpec) -> Result<RunnerGroup>;

    async fn delete_runner_group(&self, id: u64) -> Result<()>;
}

/// Read-modify-write function applied atomically to one key.
///
/// Receives the current value (if any) and returns the value to store;
/// returning `None` removes the key.
pub type Mutation<'a> = &'a (dyn Fn(Option<Value>) -> Result<Option<Value>> + Send + Sync);

/// Durable flat key-value store.
///
/// Each single-key operation is atomic. Bulk operations are not
/// transactional across keys.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove a key. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Value>>>;

    async fn set_many(&self, entries: Vec<(String, Value)>) -> Result<()>;

    /// Keys starting with `prefix`, in lexicographic order.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Atomic read-modify-write of one key. Returns the stored value.
    async fn update(&self, key: &str, mutate: Mutation<'_>) -> Result<Option<Value>>;

    /// Connectivity probe.
    async fn ping(&self) -> Result<()>;
}
