//! What an instance needs to register its agent.
//!
//! Every backend hands the agent the same set of environment variables and
//! tags its instance with the same labels, so the sweep can recognize managed
//! instances regardless of which backend created them.

use flotilla_core::Tags;
use flotilla_core::ports::ProvisionRequest;
use std::collections::HashMap;

pub const LABEL_MANAGED: &str = "flotilla.managed";
pub const LABEL_RUNNER: &str = "flotilla.runner";
pub const LABEL_POOL: &str = "flotilla.pool";

/// Environment passed to the agent, sorted by variable name.
pub fn agent_env(request: &ProvisionRequest) -> Vec<(String, String)> {
    let registration = &request.registration;
    let mut env = vec![
        ("RUNNER_NAME".to_string(), request.runner.name.clone()),
        ("RUNNER_TOKEN".to_string(), registration.token.token.clone()),
        ("RUNNER_URL".to_string(), registration.url.clone()),
        ("RUNNER_LABELS".to_string(), request.runner.pool_tags.key()),
        ("RUNNER_EPHEMERAL".to_string(), "true".to_string()),
    ];

    if let Some(group) = &registration.runner_group {
        env.push(("RUNNER_GROUP".to_string(), group.clone()));
    }
    if let Some(download) = &registration.download {
        env.push(("RUNNER_DOWNLOAD_URL".to_string(), download.download_url.clone()));
        if let Some(sha) = &download.sha256_checksum {
            env.push(("RUNNER_DOWNLOAD_SHA256".to_string(), sha.clone()));
        }
    }

    env.sort();
    env
}

pub fn instance_labels(name: &str, tags: &Tags) -> HashMap<String, String> {
    HashMap::from([
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_RUNNER.to_string(), name.to_string()),
        (LABEL_POOL.to_string(), tags.key()),
    ])
}

/// Recover pool tags from instance labels. Unlabelled instances get none.
pub fn tags_from_labels(labels: &HashMap<String, String>) -> Tags {
    labels
        .get(LABEL_POOL)
        .map(|key| Tags::new(key.split(',')))
        .unwrap_or_default()
}
