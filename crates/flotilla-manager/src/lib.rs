//! Reconciliation engine for the Flotilla runner fleet.
//!
//! [`FleetManager`] owns one [`PoolManager`] per configured pool and drives
//! them from a periodic full sync, an event queue and a lower-frequency
//! orphan sweep. Runner lifecycles go through the [`RunnerFactory`], which
//! hands slow backend work to the provisioning workers.

pub mod factory;
pub mod fleet;
pub mod policy;
pub mod pool;
pub mod provisioning;
pub mod stats;

pub use factory::{RunnerFactory, runner_name};
pub use fleet::{CycleReport, FleetDeps, FleetManager, SweepReport};
pub use policy::{PoolCounts, need_new_runner};
pub use pool::{PoolManager, PoolReport};
pub use provisioning::{ProvisionJob, Provisioner, ProvisioningQueue};
pub use stats::{FleetStats, StatsSnapshot};
