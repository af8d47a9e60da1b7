//! Fleet configuration.

use crate::pool::PoolSpec;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Upper bound for every configured timer: one year.
pub const MAX_TIMER_SECS: u64 = 365 * 24 * 60 * 60;

/// Sizing policy and timers for the whole fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSettings {
    /// Prefix carried by every managed instance and registration name.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    #[serde(default)]
    pub timers: Timers,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    /// Runner group new registrations join, created at startup if missing.
    #[serde(default)]
    pub runner_group: Option<String>,
    #[serde(default)]
    pub pools: Vec<PoolSpec>,
}

fn default_name_prefix() -> String {
    "flotilla".to_string()
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            timers: Timers::default(),
            policy: PolicyConfig::default(),
            provisioning: ProvisioningConfig::default(),
            runner_group: None,
            pools: Vec::new(),
        }
    }
}

impl FleetSettings {
    /// Check pools for consistency. `backends` lists the configured backend names.
    pub fn validate(&self, backends: &[String]) -> Result<()> {
        if self.name_prefix.is_empty() {
            return Err(Error::Config("name_prefix must not be empty".to_string()));
        }
        self.timers.validate()?;

        let mut seen = HashSet::new();
        let mut slugs: HashMap<String, &PoolSpec> = HashMap::new();
        for pool in &self.pools {
            pool.validate()?;
            if !backends.iter().any(|b| b == &pool.backend) {
                return Err(Error::Config(format!(
                    "pool {} uses unknown backend '{}'",
                    pool.tags, pool.backend
                )));
            }
            if !seen.insert(pool.key()) {
                return Err(Error::Config(format!(
                    "pool {} is declared more than once",
                    pool.tags
                )));
            }
            // Pools sharing a name fragment would hand out the same runner names.
            if let Some(other) = slugs.insert(pool.tags.slug(), pool) {
                return Err(Error::Config(format!(
                    "pools {} and {} both name runners '{}-{}-N'",
                    other.tags,
                    pool.tags,
                    self.name_prefix,
                    pool.tags.slug()
                )));
            }
        }
        Ok(())
    }

    /// Prefix plus separator, as matched against instance and registration names.
    pub fn managed_prefix(&self) -> String {
        format!("{}-", self.name_prefix)
    }
}

/// Reconciliation timers, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timers {
    /// How long an online runner that never ran a job may sit idle.
    #[serde(default = "default_extra_runner_online")]
    pub extra_runner_online_secs: u64,
    /// How long a runner may stay in `creating` before it is respawned.
    #[serde(default = "default_timeout_runner")]
    pub timeout_runner_secs: u64,
    /// Interval between full syncs.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    /// Interval between orphan sweeps.
    #[serde(default = "default_orphan_sweep_interval")]
    pub orphan_sweep_interval_secs: u64,
}

fn default_extra_runner_online() -> u64 {
    600
}

fn default_timeout_runner() -> u64 {
    900
}

fn default_sync_interval() -> u64 {
    30
}

fn default_orphan_sweep_interval() -> u64 {
    300
}

impl Default for Timers {
    fn default() -> Self {
        Self {
            extra_runner_online_secs: default_extra_runner_online(),
            timeout_runner_secs: default_timeout_runner(),
            sync_interval_secs: default_sync_interval(),
            orphan_sweep_interval_secs: default_orphan_sweep_interval(),
        }
    }
}

/// Clamped so out-of-range values saturate instead of wrapping.
fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_TIMER_SECS) as i64)
}

impl Timers {
    pub fn validate(&self) -> Result<()> {
        for (name, secs) in [
            ("extra_runner_online_secs", self.extra_runner_online_secs),
            ("timeout_runner_secs", self.timeout_runner_secs),
            ("sync_interval_secs", self.sync_interval_secs),
            ("orphan_sweep_interval_secs", self.orphan_sweep_interval_secs),
        ] {
            if secs > MAX_TIMER_SECS {
                return Err(Error::Config(format!(
                    "timers.{} ({}) exceeds the maximum of {} seconds",
                    name, secs, MAX_TIMER_SECS
                )));
            }
        }
        Ok(())
    }

    pub fn extra_runner_online(&self) -> chrono::Duration {
        seconds(self.extra_runner_online_secs)
    }

    pub fn timeout_runner(&self) -> chrono::Duration {
        seconds(self.timeout_runner_secs)
    }
}

/// Policy switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Whether runners stuck in `creating` past the timeout still count as
    /// warm capacity toward `min`.
    #[serde(default = "default_true")]
    pub count_stuck_toward_min: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            count_stuck_toward_min: true,
        }
    }
}

/// Provisioning worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Provisioning tasks allowed in flight at once.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Pending provisioning tasks buffered before submission blocks.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_workers() -> usize {
    4
}

fn default_queue_depth() -> usize {
    256
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Platform, Quantity, Tags};

    fn pool(tags: &[&str], backend: &str) -> PoolSpec {
        PoolSpec {
            tags: Tags::new(tags.iter().copied()),
            quantity: Quantity { min: 1, max: 2 },
            backend: backend.to_string(),
            platform: Platform::default(),
            config: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_defaults() {
        let settings: FleetSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.name_prefix, "flotilla");
        assert_eq!(settings.timers.timeout_runner_secs, 900);
        assert!(settings.policy.count_stuck_toward_min);
        assert_eq!(settings.provisioning.workers, 4);
    }

    #[test]
    fn test_validate_unknown_backend() {
        let settings = FleetSettings {
            pools: vec![pool(&["linux"], "openstack")],
            ..Default::default()
        };
        let err = settings.validate(&["docker".to_string()]).unwrap_err();
        assert!(err.to_string().contains("unknown backend"));
    }

    #[test]
    fn test_validate_duplicate_pool() {
        let settings = FleetSettings {
            pools: vec![pool(&["linux", "x64"], "docker"), pool(&["x64", "linux"], "docker")],
            ..Default::default()
        };
        assert!(settings.validate(&["docker".to_string()]).is_err());
    }

    #[test]
    fn test_validate_colliding_name_fragments() {
        for (a, b) in [
            (&["a-b"][..], &["a", "b"][..]),
            (&["Linux"][..], &["linux"][..]),
            (&["a.b"][..], &["a-b"][..]),
        ] {
            let settings = FleetSettings {
                pools: vec![pool(a, "docker"), pool(b, "docker")],
                ..Default::default()
            };
            let err = settings.validate(&["docker".to_string()]).unwrap_err();
            assert!(err.to_string().contains("both name runners"), "{:?} vs {:?}", a, b);
        }
    }

    #[test]
    fn test_validate_distinct_name_fragments() {
        let settings = FleetSettings {
            pools: vec![pool(&["linux", "x64"], "docker"), pool(&["linux", "arm64"], "docker")],
            ..Default::default()
        };
        settings.validate(&["docker".to_string()]).unwrap();
    }

    #[test]
    fn test_validate_rejects_oversized_timers() {
        let mut settings = FleetSettings::default();
        settings.timers.timeout_runner_secs = u64::MAX;
        let err = settings.validate(&[]).unwrap_err();
        assert!(err.to_string().contains("timers.timeout_runner_secs"));

        settings.timers.timeout_runner_secs = MAX_TIMER_SECS;
        settings.validate(&[]).unwrap();
    }

    #[test]
    fn test_timer_durations_saturate() {
        let timers = Timers {
            extra_runner_online_secs: u64::MAX,
            timeout_runner_secs: 1 << 63,
            ..Default::default()
        };
        assert_eq!(timers.extra_runner_online().num_seconds(), MAX_TIMER_SECS as i64);
        assert_eq!(timers.timeout_runner().num_seconds(), MAX_TIMER_SECS as i64);
    }
}
