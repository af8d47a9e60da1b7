//! Sample pools and runners.

use chrono::{Duration, Utc};
use flotilla_core::config::FleetSettings;
use flotilla_core::pool::Platform;
use flotilla_core::{PoolSpec, Quantity, Runner, RunnerStatus, Tags};

/// Name of the backend every fixture pool points at.
pub const FAKE_BACKEND: &str = "fake";

/// Factory for pool specs.
pub struct PoolFixture;

impl PoolFixture {
    pub fn linux(min: usize, max: usize) -> PoolSpec {
        Self::with_tags(["linux", "x64"], min, max)
    }

    pub fn with_tags<const N: usize>(tags: [&str; N], min: usize, max: usize) -> PoolSpec {
        PoolSpec {
            tags: Tags::new(tags),
            quantity: Quantity { min, max },
            backend: FAKE_BACKEND.to_string(),
            platform: Platform::default(),
            config: serde_json::Value::Null,
        }
    }

    /// Fleet settings over `pools` with the default `flotilla` prefix.
    pub fn settings(pools: Vec<PoolSpec>) -> FleetSettings {
        let mut settings = FleetSettings {
            pools,
            ..FleetSettings::default()
        };
        settings.provisioning.workers = 2;
        settings
    }
}

/// Factory for runner records in a given lifecycle state.
pub struct RunnerFixture;

impl RunnerFixture {
    /// Freshly created, created `age` ago.
    pub fn creating(name: &str, tags: &Tags, age: Duration) -> Runner {
        Runner::new(name, tags.clone(), Utc::now() - age)
    }

    /// Registered and idle since `online_for` ago.
    pub fn online(name: &str, tags: &Tags, registration_id: u64, online_for: Duration) -> Runner {
        let started = Utc::now() - online_for;
        let mut runner = Runner::new(name, tags.clone(), started - Duration::seconds(30));
        runner.instance_id = Some(format!("{}-instance", name));
        runner.registration_id = Some(registration_id);
        runner.update_status(RunnerStatus::Online, started);
        runner
    }

    /// Busy with a job.
    pub fn running(name: &str, tags: &Tags, registration_id: u64) -> Runner {
        let mut runner = Self::online(name, tags, registration_id, Duration::minutes(1));
        runner.update_status(RunnerStatus::Running, Utc::now());
        runner
    }

    /// Finished its job and went offline.
    pub fn finished(name: &str, tags: &Tags, registration_id: u64) -> Runner {
        let mut runner = Self::running(name, tags, registration_id);
        runner.update_status(RunnerStatus::Offline, Utc::now());
        runner
    }
}
