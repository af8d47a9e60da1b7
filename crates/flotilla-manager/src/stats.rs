//! Fleet activity counters.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the factory, the provisioning workers and the fleet loop.
#[derive(Debug, Default)]
pub struct FleetStats {
    pub runners_created: AtomicU64,
    pub runners_deleted: AtomicU64,
    pub runners_respawned: AtomicU64,
    pub provision_failures: AtomicU64,
    pub teardown_failures: AtomicU64,
    pub orphans_deleted: AtomicU64,
    pub events_processed: AtomicU64,
    pub events_dropped: AtomicU64,
    pub cycles: AtomicU64,
}

impl FleetStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_created(&self) {
        self.runners_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deleted(&self) {
        self.runners_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_respawned(&self) {
        self.runners_respawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provision_failure(&self) {
        self.provision_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_teardown_failure(&self) {
        self.teardown_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_orphan_deleted(&self) {
        self.orphans_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            runners_created: self.runners_created.load(Ordering::Relaxed),
            runners_deleted: self.runners_deleted.load(Ordering::Relaxed),
            runners_respawned: self.runners_respawned.load(Ordering::Relaxed),
            provision_failures: self.provision_failures.load(Ordering::Relaxed),
            teardown_failures: self.teardown_failures.load(Ordering::Relaxed),
            orphans_deleted: self.orphans_deleted.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`FleetStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub runners_created: u64,
    pub runners_deleted: u64,
    pub runners_respawned: u64,
    pub provision_failures: u64,
    pub teardown_failures: u64,
    pub orphans_deleted: u64,
    pub events_processed: u64,
    pub events_dropped: u64,
    pub cycles: u64,
}
