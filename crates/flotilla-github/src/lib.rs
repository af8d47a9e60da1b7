//! GitHub Actions control-plane client for Flotilla.
//!
//! Talks to the self-hosted runner endpoints of either an organization or a
//! single repository. Response statuses are folded into the shared error
//! taxonomy here so nothing above this crate sees HTTP details:
//!
//! - `404` becomes [`flotilla_core::Error::NotFound`]
//! - `401`, `403` and `422` become [`flotilla_core::Error::Registration`]
//! - rate limits, `5xx` and transport failures become
//!   [`flotilla_core::Error::TransientApi`]

pub mod client;
pub mod config;

pub use client::GitHubClient;
pub use config::{GitHubConfig, Scope};
