//! Flotilla Core
//!
//! Domain types, port traits, and error handling for the Flotilla runner
//! fleet manager. This crate has minimal dependencies and defines the shared
//! vocabulary used by the store, backend, control-plane, and manager crates.

pub mod config;
pub mod control_plane;
pub mod error;
pub mod events;
pub mod pool;
pub mod ports;
pub mod runner;

pub use error::{Error, Result};
pub use pool::{PoolSpec, Quantity, Tags};
pub use runner::{Runner, RunnerStatus};
