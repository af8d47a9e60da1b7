//! Records exchanged with the job control plane.

use crate::runner::RunnerStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A runner as registered with the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPlaneRunner {
    pub id: u64,
    pub name: String,
    pub status: RunnerStatus,
    pub busy: bool,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// One-time credential an agent uses to self-register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Installer package for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadAsset {
    pub os: String,
    pub architecture: String,
    pub download_url: String,
    pub filename: String,
    pub sha256_checksum: Option<String>,
}

/// Logical group that runners register into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerGroup {
    pub id: u64,
    pub name: String,
    pub visibility: String,
    #[serde(default)]
    pub default: bool,
}

/// Desired attributes of a runner group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerGroupSpec {
    pub name: String,
    #[serde(default = "default_visibility")]
    pub visibility: String,
    #[serde(default)]
    pub allows_public_repositories: bool,
}

fn default_visibility() -> String {
    "all".to_string()
}

impl RunnerGroupSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visibility: default_visibility(),
            allows_public_repositories: false,
        }
    }
}
