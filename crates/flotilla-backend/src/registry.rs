//! Named backend instances, built from configuration.

use crate::docker::{DockerBackend, DockerConfig};
use flotilla_core::ports::ComputeBackend;
use flotilla_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

/// Configuration of one backend, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Docker(DockerConfig),
}

impl BackendConfig {
    pub fn build(&self) -> Result<Arc<dyn ComputeBackend>> {
        match self {
            BackendConfig::Docker(cfg) => Ok(Arc::new(DockerBackend::new(cfg.clone())?)),
        }
    }
}

/// Backends by configured name.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn ComputeBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(configs: &HashMap<String, BackendConfig>) -> Result<Self> {
        let mut registry = Self::new();
        for (name, config) in configs {
            let backend = config.build()?;
            info!(backend = %name, kind = backend.kind(), "Backend configured");
            registry.insert(name.clone(), backend);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, name: impl Into<String>, backend: Arc<dyn ComputeBackend>) {
        self.backends.insert(name.into(), backend);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ComputeBackend>> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no backend named '{}'", name)))
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn ComputeBackend>)> {
        self.backends.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_config_tagged_by_type() {
        let cfg: BackendConfig = serde_json::from_value(serde_json::json!({
            "type": "docker",
            "image": "runner:local",
            "max_create_attempts": 5
        }))
        .unwrap();

        let BackendConfig::Docker(docker) = cfg;
        assert_eq!(docker.image, "runner:local");
        assert_eq!(docker.max_create_attempts, 5);
        assert_eq!(docker.retry_delay_ms, 2000);
    }

    #[test]
    fn test_unknown_backend_type_rejected() {
        let result: std::result::Result<BackendConfig, _> =
            serde_json::from_value(serde_json::json!({"type": "openstack"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_backend_is_config_error() {
        let registry = BackendRegistry::new();
        assert!(matches!(registry.get("docker"), Err(Error::Config(_))));
        assert!(registry.names().is_empty());
    }
}
