//! Pool sizing policy types.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Sorted, de-duplicated label set. Stable key of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Tags(Vec<String>);

impl Tags {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = tags
            .into_iter()
            .map(Into::into)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        Self(set.into_iter().collect())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Store key fragment, e.g. `linux,x64`.
    pub fn key(&self) -> String {
        self.0.join(",")
    }

    /// Name fragment safe for instance and registration names, e.g. `linux-x64`.
    pub fn slug(&self) -> String {
        self.0
            .iter()
            .map(|tag| {
                tag.chars()
                    .map(|c| {
                        if c.is_ascii_alphanumeric() {
                            c.to_ascii_lowercase()
                        } else {
                            '-'
                        }
                    })
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Label sets compare as sets: order and duplicates do not matter.
    pub fn matches(&self, labels: &[String]) -> bool {
        *self == Tags::new(labels.iter().cloned())
    }
}

impl From<Vec<String>> for Tags {
    fn from(tags: Vec<String>) -> Self {
        Tags::new(tags)
    }
}

impl From<Tags> for Vec<String> {
    fn from(tags: Tags) -> Self {
        tags.0
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Inclusive bounds on concurrently provisioned runners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity {
    pub min: usize,
    pub max: usize,
}

impl Quantity {
    pub fn validate(&self) -> Result<()> {
        if self.min > self.max {
            return Err(Error::Config(format!(
                "quantity.min ({}) exceeds quantity.max ({})",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Operating system and architecture of the runner installer to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default = "default_os")]
    pub os: String,
    #[serde(default = "default_arch")]
    pub arch: String,
}

fn default_os() -> String {
    "linux".to_string()
}

fn default_arch() -> String {
    "x64".to_string()
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            os: default_os(),
            arch: default_arch(),
        }
    }
}

/// One sizing policy: which runners, how many, and where to put them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSpec {
    pub tags: Tags,
    pub quantity: Quantity,
    /// Name of the configured compute backend that hosts this pool.
    pub backend: String,
    #[serde(default)]
    pub platform: Platform,
    /// Backend-specific provisioning parameters, opaque to the manager.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl PoolSpec {
    pub fn key(&self) -> String {
        self.tags.key()
    }

    pub fn validate(&self) -> Result<()> {
        if self.tags.is_empty() {
            return Err(Error::Config("pool tags must not be empty".to_string()));
        }
        if self.backend.is_empty() {
            return Err(Error::Config(format!(
                "pool {} does not name a backend",
                self.tags
            )));
        }
        self.quantity.validate()
    }
}
