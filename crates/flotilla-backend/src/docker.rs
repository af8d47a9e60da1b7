//! Runner instances as Docker containers.

use crate::bootstrap::{self, LABEL_MANAGED, LABEL_RUNNER};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerStateStatusEnum, ContainerSummary, HostConfig};
use bollard::{API_DEFAULT_VERSION, Docker};
use chrono::{DateTime, Utc};
use flotilla_core::ports::{ComputeBackend, InstanceEvent, ProvisionRequest};
use flotilla_core::{Error, Result, Runner};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Backend-level settings, one per configured Docker host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Daemon address. Local defaults when unset.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default = "default_max_create_attempts")]
    pub max_create_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_image() -> String {
    "ghcr.io/actions/actions-runner:latest".to_string()
}

fn default_max_create_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: None,
            image: default_image(),
            network: None,
            max_create_attempts: default_max_create_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Per-pool overrides carried in the pool's opaque `config`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DockerPoolConfig {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub memory_mb: Option<i64>,
}

impl DockerPoolConfig {
    pub fn parse(value: &serde_json::Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
            .map_err(|e| Error::Config(format!("invalid docker pool config: {}", e)))
    }
}

fn is_missing(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

pub struct DockerBackend {
    docker: Docker,
    config: DockerConfig,
}

impl DockerBackend {
    pub fn new(config: DockerConfig) -> Result<Self> {
        let docker = match config.host.as_deref() {
            None => Docker::connect_with_local_defaults(),
            Some(host) if host.starts_with("unix://") || host.starts_with('/') => {
                Docker::connect_with_socket(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(host) => Docker::connect_with_http(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION),
        }
        .map_err(|e| Error::Config(format!("Failed to connect to Docker: {}", e)))?;

        Ok(Self { docker, config })
    }

    /// Create with an existing Docker client.
    pub fn with_docker(docker: Docker, config: DockerConfig) -> Self {
        Self { docker, config }
    }

    fn container_config(
        &self,
        request: &ProvisionRequest,
        pool: &DockerPoolConfig,
    ) -> Config<String> {
        let name = &request.runner.name;
        let env: Vec<String> = bootstrap::agent_env(request)
            .into_iter()
            .chain(pool.env.clone())
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        Config {
            image: Some(pool.image.clone().unwrap_or_else(|| self.config.image.clone())),
            env: Some(env),
            labels: Some(bootstrap::instance_labels(name, &request.runner.pool_tags)),
            host_config: Some(HostConfig {
                network_mode: self.config.network.clone(),
                privileged: Some(pool.privileged),
                memory: pool.memory_mb.map(|mb| mb * 1024 * 1024),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn remove(&self, name: &str) -> std::result::Result<(), DockerError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Err(e) if is_missing(&e) => Ok(()),
            other => other,
        }
    }

    /// One attempt: create, start, and confirm the container did not die.
    async fn launch(&self, name: &str, config: Config<String>) -> std::result::Result<String, String> {
        self.remove(name)
            .await
            .map_err(|e| format!("failed to clear previous container: {}", e))?;

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name,
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| format!("failed to create container: {}", e))?;

        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| format!("failed to start container: {}", e))?;

        let inspected = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| format!("failed to inspect container: {}", e))?;

        let status = inspected.state.and_then(|s| s.status);
        if matches!(
            status,
            Some(ContainerStateStatusEnum::EXITED | ContainerStateStatusEnum::DEAD)
        ) {
            return Err(format!("container stopped right after start ({:?})", status));
        }

        Ok(created.id)
    }
}

/// Rebuild a best-effort runner from a container listing entry.
pub(crate) fn runner_from_summary(summary: &ContainerSummary) -> Option<Runner> {
    let labels = summary.labels.clone().unwrap_or_default();
    let name = labels.get(LABEL_RUNNER).cloned().or_else(|| {
        summary
            .names
            .as_ref()
            .and_then(|names| names.first())
            .map(|n| n.trim_start_matches('/').to_string())
    })?;

    let created_at = summary
        .created
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);

    let mut runner = Runner::new(name, bootstrap::tags_from_labels(&labels), created_at);
    runner.instance_id = summary.id.clone();
    Some(runner)
}

#[async_trait]
impl ComputeBackend for DockerBackend {
    fn kind(&self) -> &'static str {
        "docker"
    }

    async fn create(&self, request: &ProvisionRequest) -> Result<String> {
        let name = &request.runner.name;
        let pool = DockerPoolConfig::parse(&request.pool.config)?;
        let attempts = self.config.max_create_attempts.max(1);

        let mut last_error = String::new();
        for attempt in 1..=attempts {
            if attempt > 1 {
                sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }

            match self.launch(name, self.container_config(request, &pool)).await {
                Ok(id) => {
                    info!(runner = %name, container_id = %id, attempt, "Container started");
                    return Ok(id);
                }
                Err(e) => {
                    warn!(runner = %name, attempt, error = %e, "Container launch failed");
                    last_error = e;
                }
            }
        }

        // Leave nothing half-built behind.
        if let Err(e) = self.remove(name).await {
            warn!(runner = %name, error = %e, "Failed to clean up after launch failure");
        }
        Err(Error::provision(
            name.as_str(),
            format!("gave up after {} attempts: {}", attempts, last_error),
        ))
    }

    async fn delete(&self, runner: &Runner) -> Result<()> {
        let target = runner.instance_id.as_deref().unwrap_or(&runner.name);
        self.remove(target)
            .await
            .map_err(|e| Error::Internal(format!("Failed to remove container {}: {}", target, e)))?;
        debug!(runner = %runner.name, "Container removed");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Runner>> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([(
                "label".to_string(),
                vec![format!("{}=true", LABEL_MANAGED)],
            )]),
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| Error::TransientApi(format!("Failed to list containers: {}", e)))?;

        Ok(containers
            .iter()
            .filter_map(runner_from_summary)
            .filter(|r| r.name.starts_with(prefix))
            .collect())
    }

    async fn update(&self, runner: &Runner, event: &InstanceEvent) -> Result<()> {
        // Docker cannot change labels on an existing container, so status is
        // not mirrored onto the instance. Nothing is sent to the daemon.
        debug!(runner = %runner.name, ?event, "Docker containers do not take metadata updates");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pool_config_defaults_from_null() {
        let cfg = DockerPoolConfig::parse(&serde_json::Value::Null).unwrap();
        assert_eq!(cfg, DockerPoolConfig::default());
    }

    #[test]
    fn test_pool_config_rejects_wrong_types() {
        let err = DockerPoolConfig::parse(&json!({"privileged": "yes"})).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_runner_from_summary_prefers_label() {
        let summary = ContainerSummary {
            id: Some("c0ffee".to_string()),
            names: Some(vec!["/something-else".to_string()]),
            labels: Some(HashMap::from([
                (LABEL_MANAGED.to_string(), "true".to_string()),
                (LABEL_RUNNER.to_string(), "flotilla-linux-4".to_string()),
                (bootstrap::LABEL_POOL.to_string(), "linux".to_string()),
            ])),
            created: Some(1_700_000_000),
            ..Default::default()
        };

        let runner = runner_from_summary(&summary).unwrap();
        assert_eq!(runner.name, "flotilla-linux-4");
        assert_eq!(runner.instance_id.as_deref(), Some("c0ffee"));
        assert_eq!(runner.pool_tags.key(), "linux");
        assert_eq!(runner.created_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_runner_from_summary_falls_back_to_container_name() {
        let summary = ContainerSummary {
            names: Some(vec!["/flotilla-linux-5".to_string()]),
            ..Default::default()
        };
        let runner = runner_from_summary(&summary).unwrap();
        assert_eq!(runner.name, "flotilla-linux-5");
        assert!(runner.pool_tags.is_empty());

        assert!(runner_from_summary(&ContainerSummary::default()).is_none());
    }

    #[test]
    fn test_missing_container_classification() {
        let missing = DockerError::DockerResponseServerError {
            status_code: 404,
            message: "No such container".to_string(),
        };
        let conflict = DockerError::DockerResponseServerError {
            status_code: 409,
            message: "conflict".to_string(),
        };
        assert!(is_missing(&missing));
        assert!(!is_missing(&conflict));
    }
}
