//! Test infrastructure for Flotilla.
//!
//! In-process fakes for the compute backend, the control plane and the state
//! store, runner and pool fixtures, and a [`TestFleet`] harness that wires a
//! full fleet manager over them.
//!
//! # Usage
//!
//! ```ignore
//! use flotilla_tests::{PoolFixture, TestFleet};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let t = TestFleet::new(vec![PoolFixture::linux(1, 2)]);
//!     t.cycle().await;
//! }
//! ```

pub mod containers;
pub mod fakes;
pub mod fixtures;
pub mod harness;
pub mod helpers;

pub use fakes::{FakeBackend, FakeControlPlane, FlakyStore};
pub use fixtures::*;
pub use harness::TestFleet;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,flotilla_manager=debug")),
        )
        .with_test_writer()
        .try_init();
}
