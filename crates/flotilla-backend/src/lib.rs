//! Compute backends that host Flotilla runner instances.

pub mod bootstrap;
pub mod docker;
pub mod registry;

pub use docker::{DockerBackend, DockerConfig, DockerPoolConfig};
pub use registry::{BackendConfig, BackendRegistry};
