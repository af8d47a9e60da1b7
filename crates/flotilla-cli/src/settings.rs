//! Process configuration.
//!
//! Read from an optional file, then overlaid with `FLOTILLA__*` environment
//! variables (`FLOTILLA__STORE__URL`, `FLOTILLA__CONTROL_PLANE__TOKEN`, ...).

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use flotilla_backend::BackendConfig;
use flotilla_core::config::FleetSettings;
use flotilla_github::GitHubConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub fleet: FleetSettings,
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
    pub control_plane: GitHubConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local; state is lost on restart.
    #[default]
    Memory,
    Postgres {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path` (if given) and the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        builder
            .add_source(
                Environment::with_prefix("FLOTILLA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Cross-section checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let backends: Vec<String> = self.backends.keys().cloned().collect();
        self.fleet.validate(&backends)?;
        self.control_plane.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::config::FileFormat;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
name_prefix: ci
control_plane:
  owner: acme
  token: secret
backends:
  local:
    type: docker
pools:
  - tags: [linux, x64]
    quantity: { min: 1, max: 3 }
    backend: local
store:
  type: postgres
  url: postgres://localhost/flotilla
log:
  format: json
"#;

    fn parse(yaml: &str) -> AppConfig {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_parse_sample() {
        let config = parse(SAMPLE);
        assert_eq!(config.fleet.name_prefix, "ci");
        assert_eq!(config.fleet.pools.len(), 1);
        assert_eq!(config.fleet.pools[0].quantity.max, 3);
        assert!(config.backends.contains_key("local"));
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.api.listen, default_listen());
        assert!(matches!(
            config.store,
            StoreConfig::Postgres { max_connections: 10, .. }
        ));
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_backend_fails_validation() {
        let config = parse(&SAMPLE.replace("backend: local", "backend: missing"));
        assert!(config.validate().is_err());
    }
}
