use flotilla_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Connection settings for the GitHub control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Base URL agents register against.
    #[serde(default = "default_web_url")]
    pub web_url: String,
    /// Organization, or repository owner when `repo` is set.
    pub owner: String,
    #[serde(default)]
    pub repo: Option<String>,
    pub token: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_web_url() -> String {
    "https://github.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Where runners are registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    Organization(&'a str),
    Repository(&'a str, &'a str),
}

impl GitHubConfig {
    pub fn new(owner: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            api_url: default_api_url(),
            web_url: default_web_url(),
            owner: owner.into(),
            repo: None,
            token: token.into(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn scope(&self) -> Scope<'_> {
        match &self.repo {
            Some(repo) => Scope::Repository(&self.owner, repo),
            None => Scope::Organization(&self.owner),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.owner.is_empty() {
            return Err(Error::Config("control_plane.owner must be set".to_string()));
        }
        if self.token.is_empty() {
            return Err(Error::Config("control_plane.token must be set".to_string()));
        }
        Ok(())
    }
}
