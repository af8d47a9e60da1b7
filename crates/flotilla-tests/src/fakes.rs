//! In-process implementations of the port traits.
//!
//! Each fake keeps its state behind a plain mutex and exposes switches to
//! inject failures, so scenario tests can drive the fleet through outages
//! without touching a real provider.

use async_trait::async_trait;
use chrono::Utc;
use flotilla_core::control_plane::{
    ControlPlaneRunner, DownloadAsset, RegistrationToken, RunnerGroup, RunnerGroupSpec,
};
use flotilla_core::ports::{
    ComputeBackend, ControlPlane, InstanceEvent, Mutation, ProvisionRequest, StateStore,
};
use flotilla_core::{Error, Result, Runner, RunnerStatus, Tags};
use flotilla_store::MemoryStore;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Compute backend keeping instances in a map keyed by runner name.
#[derive(Default)]
pub struct FakeBackend {
    instances: Mutex<BTreeMap<String, Runner>>,
    requests: Mutex<Vec<ProvisionRequest>>,
    updates: Mutex<Vec<(String, InstanceEvent)>>,
    next_id: AtomicU64,
    creates: AtomicUsize,
    deletes: AtomicUsize,
    fail_create: AtomicBool,
    fail_delete: AtomicBool,
    create_delay_ms: AtomicU64,
    delete_delay_ms: AtomicU64,
}

async fn pause_for(delay_ms: &AtomicU64) {
    let ms = delay_ms.load(Ordering::SeqCst);
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Slow down `create` after it has cleared any same-name instance.
    pub fn set_create_delay(&self, delay: Duration) {
        self.create_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Slow down `delete` after it has removed the instance.
    pub fn set_delete_delay(&self, delay: Duration) {
        self.delete_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Plant an instance the fleet knows nothing about.
    pub fn insert_instance(&self, name: &str, tags: Tags) -> String {
        let id = self.allocate_id();
        let mut runner = Runner::new(name, tags, Utc::now());
        runner.instance_id = Some(id.clone());
        lock(&self.instances).insert(name.to_string(), runner);
        id
    }

    pub fn instance_names(&self) -> Vec<String> {
        lock(&self.instances).keys().cloned().collect()
    }

    pub fn instance_id(&self, name: &str) -> Option<String> {
        lock(&self.instances)
            .get(name)
            .and_then(|r| r.instance_id.clone())
    }

    pub fn instance_count(&self) -> usize {
        lock(&self.instances).len()
    }

    /// Successful and failed `create` calls.
    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProvisionRequest> {
        lock(&self.requests).clone()
    }

    pub fn updates(&self) -> Vec<(String, InstanceEvent)> {
        lock(&self.updates).clone()
    }

    fn allocate_id(&self) -> String {
        format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl ComputeBackend for FakeBackend {
    fn kind(&self) -> &'static str {
        "fake"
    }

    async fn create(&self, request: &ProvisionRequest) -> Result<String> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let name = &request.runner.name;
        // Same-name leftovers are replaced, never duplicated.
        lock(&self.instances).remove(name);
        pause_for(&self.create_delay_ms).await;

        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::provision(name.clone(), "injected create failure"));
        }

        let id = self.allocate_id();
        let mut instance = request.runner.clone();
        instance.instance_id = Some(id.clone());
        lock(&self.instances).insert(name.clone(), instance);
        lock(&self.requests).push(request.clone());
        Ok(id)
    }

    async fn delete(&self, runner: &Runner) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Error::TransientApi("injected delete failure".to_string()));
        }
        lock(&self.instances).remove(&runner.name);
        pause_for(&self.delete_delay_ms).await;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Runner>> {
        Ok(lock(&self.instances)
            .values()
            .filter(|r| r.name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn update(&self, runner: &Runner, event: &InstanceEvent) -> Result<()> {
        lock(&self.updates).push((runner.name.clone(), event.clone()));
        Ok(())
    }
}

/// Control plane holding registrations and runner groups in memory.
#[derive(Default)]
pub struct FakeControlPlane {
    runners: Mutex<BTreeMap<u64, ControlPlaneRunner>>,
    groups: Mutex<Vec<RunnerGroup>>,
    deleted: Mutex<Vec<u64>>,
    next_id: AtomicU64,
    tokens: AtomicUsize,
    fail_list: AtomicBool,
    fail_token: AtomicBool,
    no_downloads: AtomicBool,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent the way it would after booting. Returns its id.
    pub fn register(&self, name: &str, status: RunnerStatus, busy: bool) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.runners).insert(
            id,
            ControlPlaneRunner {
                id,
                name: name.to_string(),
                status,
                busy,
                labels: Vec::new(),
            },
        );
        id
    }

    /// Change what the control plane reports for `name`.
    pub fn set_status(&self, name: &str, status: RunnerStatus, busy: bool) {
        for record in lock(&self.runners).values_mut() {
            if record.name == name {
                record.status = status.clone();
                record.busy = busy;
            }
        }
    }

    pub fn registration(&self, name: &str) -> Option<ControlPlaneRunner> {
        lock(&self.runners)
            .values()
            .find(|r| r.name == name)
            .cloned()
    }

    pub fn registered_names(&self) -> Vec<String> {
        lock(&self.runners).values().map(|r| r.name.clone()).collect()
    }

    /// Ids passed to successful `force_delete_runner` calls.
    pub fn deleted_ids(&self) -> Vec<u64> {
        lock(&self.deleted).clone()
    }

    pub fn tokens_issued(&self) -> usize {
        self.tokens.load(Ordering::SeqCst)
    }

    pub fn groups(&self) -> Vec<RunnerGroup> {
        lock(&self.groups).clone()
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_token(&self, fail: bool) {
        self.fail_token.store(fail, Ordering::SeqCst);
    }

    pub fn set_no_downloads(&self, missing: bool) {
        self.no_downloads.store(missing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn list_runners(&self) -> Result<Vec<ControlPlaneRunner>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::TransientApi("injected list failure".to_string()));
        }
        Ok(lock(&self.runners).values().cloned().collect())
    }

    async fn create_registration_token(&self) -> Result<RegistrationToken> {
        if self.fail_token.load(Ordering::SeqCst) {
            return Err(Error::Registration("injected token failure".to_string()));
        }
        let n = self.tokens.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RegistrationToken {
            token: format!("token-{}", n),
            expires_at: None,
        })
    }

    async fn force_delete_runner(&self, id: u64) -> Result<()> {
        if lock(&self.runners).remove(&id).is_none() {
            return Err(Error::NotFound(format!("runner {}", id)));
        }
        lock(&self.deleted).push(id);
        Ok(())
    }

    async fn get_download_asset(&self, os: &str, arch: &str) -> Result<DownloadAsset> {
        if self.no_downloads.load(Ordering::SeqCst) {
            return Err(Error::NotFound(format!("download for {}/{}", os, arch)));
        }
        Ok(DownloadAsset {
            os: os.to_string(),
            architecture: arch.to_string(),
            download_url: format!("https://downloads.example/runner-{}-{}.tar.gz", os, arch),
            filename: format!("runner-{}-{}.tar.gz", os, arch),
            sha256_checksum: None,
        })
    }

    fn registration_url(&self) -> String {
        "https://github.example/acme".to_string()
    }

    async fn list_runner_groups(&self) -> Result<Vec<RunnerGroup>> {
        Ok(self.groups())
    }

    async fn create_runner_group(&self, spec: &RunnerGroupSpec) -> Result<RunnerGroup> {
        let mut groups = lock(&self.groups);
        let group = RunnerGroup {
            id: groups.len() as u64 + 1,
            name: spec.name.clone(),
            visibility: spec.visibility.clone(),
            default: false,
        };
        groups.push(group.clone());
        Ok(group)
    }

    async fn update_runner_group(&self, id: u64, spec: &RunnerGroupSpec) -> Result<RunnerGroup> {
        let mut groups = lock(&self.groups);
        let group = groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| Error::NotFound(format!("runner group {}", id)))?;
        group.name = spec.name.clone();
        group.visibility = spec.visibility.clone();
        Ok(group.clone())
    }

    async fn delete_runner_group(&self, id: u64) -> Result<()> {
        let mut groups = lock(&self.groups);
        let before = groups.len();
        groups.retain(|g| g.id != id);
        if groups.len() == before {
            return Err(Error::NotFound(format!("runner group {}", id)));
        }
        Ok(())
    }
}

/// Memory store that can be switched into a simulated outage.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::Store("injected outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Value>>> {
        self.check()?;
        self.inner.get_many(keys).await
    }

    async fn set_many(&self, entries: Vec<(String, Value)>) -> Result<()> {
        self.check()?;
        self.inner.set_many(entries).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.check()?;
        self.inner.keys(prefix).await
    }

    async fn update(&self, key: &str, mutate: Mutation<'_>) -> Result<Option<Value>> {
        self.check()?;
        self.inner.update(key, mutate).await
    }

    async fn ping(&self) -> Result<()> {
        self.check()?;
        self.inner.ping().await
    }
}
