//! Typed runner persistence over the flat key space.
//!
//! Keys are partitioned as:
//!
//! - `runner:<name>`: one serialized [`Runner`]
//! - `pool:<tag-key>`: JSON array of runner names owned by a pool
//! - `counter:<tag-key>`: last name counter handed out for a pool
//!
//! A runner record and its pool index entry are separate keys and are not
//! updated together; every single-key write goes through the store's atomic
//! read-modify-write.

use flotilla_core::ports::StateStore;
use flotilla_core::{Result, Runner, Tags};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

pub const RUNNER_PREFIX: &str = "runner:";
pub const POOL_PREFIX: &str = "pool:";
pub const COUNTER_PREFIX: &str = "counter:";

pub fn runner_key(name: &str) -> String {
    format!("{}{}", RUNNER_PREFIX, name)
}

pub fn pool_key(tags: &Tags) -> String {
    format!("{}{}", POOL_PREFIX, tags.key())
}

pub fn counter_key(tags: &Tags) -> String {
    format!("{}{}", COUNTER_PREFIX, tags.key())
}

fn names_of(value: Option<Value>) -> Result<Vec<String>> {
    Ok(value
        .map(serde_json::from_value::<Vec<String>>)
        .transpose()?
        .unwrap_or_default())
}

/// Runner records and pool membership.
#[derive(Clone)]
pub struct RunnerRepository {
    store: Arc<dyn StateStore>,
}

impl RunnerRepository {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub async fn get(&self, name: &str) -> Result<Option<Runner>> {
        self.store
            .get(&runner_key(name))
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.store.get(&runner_key(name)).await?.is_some())
    }

    /// Index the runner under its pool, then write the record.
    ///
    /// An interrupted insert leaves at worst an index entry without a
    /// record, which [`prune_pool_index`](Self::prune_pool_index) repairs.
    pub async fn insert(&self, runner: &Runner) -> Result<()> {
        self.add_to_pool(&runner.pool_tags, &runner.name).await?;
        self.save(runner).await
    }

    /// Overwrite the record only.
    pub async fn save(&self, runner: &Runner) -> Result<()> {
        self.store
            .set(&runner_key(&runner.name), serde_json::to_value(runner)?)
            .await
    }

    /// Atomically mutate an existing record. Returns `None` if it is gone.
    pub async fn update<F>(&self, name: &str, f: F) -> Result<Option<Runner>>
    where
        F: Fn(&mut Runner) + Send + Sync,
    {
        let mutate = |current: Option<Value>| -> Result<Option<Value>> {
            match current {
                None => Ok(None),
                Some(value) => {
                    let mut runner: Runner = serde_json::from_value(value)?;
                    f(&mut runner);
                    Ok(Some(serde_json::to_value(&runner)?))
                }
            }
        };

        self.store
            .update(&runner_key(name), &mutate)
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    /// Drop the record and its pool index entry. Absent entries are fine.
    pub async fn remove(&self, name: &str, tags: &Tags) -> Result<()> {
        self.store.delete(&runner_key(name)).await?;
        self.remove_from_pool(tags, name).await
    }

    pub async fn pool_members(&self, tags: &Tags) -> Result<Vec<String>> {
        names_of(self.store.get(&pool_key(tags)).await?)
    }

    /// Fresh read of every runner the pool index names. Index entries without
    /// a record are skipped.
    pub async fn pool_runners(&self, tags: &Tags) -> Result<Vec<Runner>> {
        let names = self.pool_members(tags).await?;
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = names.iter().map(|n| runner_key(n)).collect();
        let values = self.store.get_many(&keys).await?;

        let mut runners = Vec::with_capacity(values.len());
        for value in values.into_iter().flatten() {
            runners.push(serde_json::from_value(value)?);
        }
        Ok(runners)
    }

    /// Names of all runner records in the store.
    pub async fn all_names(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .keys(RUNNER_PREFIX)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(RUNNER_PREFIX).map(str::to_string))
            .collect())
    }

    /// Every runner record, ordered by name.
    pub async fn all_runners(&self) -> Result<Vec<Runner>> {
        let keys = self.store.keys(RUNNER_PREFIX).await?;
        let mut runners = Vec::with_capacity(keys.len());
        for value in self.store.get_many(&keys).await?.into_iter().flatten() {
            runners.push(serde_json::from_value(value)?);
        }
        Ok(runners)
    }

    pub async fn add_to_pool(&self, tags: &Tags, name: &str) -> Result<()> {
        let add = |current: Option<Value>| -> Result<Option<Value>> {
            let mut names = names_of(current)?;
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
            Ok(Some(json!(names)))
        };
        self.store.update(&pool_key(tags), &add).await?;
        Ok(())
    }

    pub async fn remove_from_pool(&self, tags: &Tags, name: &str) -> Result<()> {
        let remove = |current: Option<Value>| -> Result<Option<Value>> {
            let names: Vec<String> = names_of(current)?
                .into_iter()
                .filter(|n| n != name)
                .collect();
            if names.is_empty() {
                Ok(None)
            } else {
                Ok(Some(json!(names)))
            }
        };
        self.store.update(&pool_key(tags), &remove).await?;
        Ok(())
    }

    /// Remove pool index entries that no longer have a runner record.
    /// Returns the pruned names.
    pub async fn prune_pool_index(&self, tags: &Tags) -> Result<Vec<String>> {
        let names = self.pool_members(tags).await?;
        let keys: Vec<String> = names.iter().map(|n| runner_key(n)).collect();
        let values = self.store.get_many(&keys).await?;

        let stale: Vec<String> = names
            .into_iter()
            .zip(values)
            .filter(|(_, v)| v.is_none())
            .map(|(n, _)| n)
            .collect();

        for name in &stale {
            debug!(runner = %name, pool = %tags, "Pruning stale pool index entry");
            self.remove_from_pool(tags, name).await?;
        }
        Ok(stale)
    }

    /// Next value of the pool's durable, monotonically increasing counter.
    pub async fn next_counter(&self, tags: &Tags) -> Result<u64> {
        let increment = |current: Option<Value>| -> Result<Option<Value>> {
            let n = current.and_then(|v| v.as_u64()).unwrap_or(0);
            Ok(Some(json!(n + 1)))
        };
        let stored = self.store.update(&counter_key(tags), &increment).await?;
        Ok(stored.and_then(|v| v.as_u64()).unwrap_or(1))
    }
}
