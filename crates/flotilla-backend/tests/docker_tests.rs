//! Docker backend against a mock daemon.

use chrono::Utc;
use flotilla_backend::{DockerBackend, DockerConfig};
use flotilla_core::control_plane::RegistrationToken;
use flotilla_core::pool::{Platform, PoolSpec, Quantity};
use flotilla_core::ports::{ComputeBackend, InstanceEvent, ProvisionRequest, Registration};
use flotilla_core::{Error, Runner, RunnerStatus, Tags};
use serde_json::json;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NAME: &str = "flotilla-linux-x64-3";

fn backend(server: &MockServer, attempts: u32) -> DockerBackend {
    DockerBackend::new(DockerConfig {
        host: Some(server.uri()),
        image: "runner:test".to_string(),
        network: None,
        max_create_attempts: attempts,
        retry_delay_ms: 0,
    })
    .expect("docker client")
}

fn request() -> ProvisionRequest {
    let tags = Tags::new(["linux", "x64"]);
    ProvisionRequest {
        runner: Runner::new(NAME, tags.clone(), Utc::now()),
        pool: PoolSpec {
            tags,
            quantity: Quantity { min: 1, max: 2 },
            backend: "docker".to_string(),
            platform: Platform::default(),
            config: serde_json::Value::Null,
        },
        registration: Registration {
            token: RegistrationToken {
                token: "AABBCC".to_string(),
                expires_at: None,
            },
            url: "https://github.com/acme".to_string(),
            download: None,
            runner_group: None,
        },
    }
}

/// A daemon with no container named [`NAME`] whose new containers report
/// `state` right after start.
async fn mount_daemon(server: &MockServer, state: &str) {
    Mock::given(method("DELETE"))
        .and(path_regex(format!("/containers/{}$", NAME)))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"message": "No such container"})),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex("/containers/create$"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({"Id": "c0ffee", "Warnings": []})),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(format!("/containers/{}/start$", NAME)))
        .respond_with(ResponseTemplate::new(204))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(format!("/containers/{}/json$", NAME)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"Id": "c0ffee", "State": {"Status": state}})),
        )
        .mount(server)
        .await;
}

/// Requests the daemon saw, as `METHOD /containers/...` without the API
/// version prefix.
async fn calls(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .expect("request recording")
        .iter()
        .map(|r| {
            let path = r.url.path();
            let path = path.find("/containers").map_or(path, |i| &path[i..]);
            format!("{} {}", r.method, path)
        })
        .collect()
}

fn launch_sequence() -> Vec<String> {
    vec![
        format!("DELETE /containers/{}", NAME),
        "POST /containers/create".to_string(),
        format!("POST /containers/{}/start", NAME),
        format!("GET /containers/{}/json", NAME),
    ]
}

#[tokio::test]
async fn test_create_clears_same_name_container_first() {
    let server = MockServer::start().await;
    mount_daemon(&server, "running").await;
    let docker = backend(&server, 3);

    assert_eq!(docker.create(&request()).await.unwrap(), "c0ffee");
    assert_eq!(docker.create(&request()).await.unwrap(), "c0ffee");

    let expected: Vec<String> = launch_sequence().into_iter().cycle().take(8).collect();
    assert_eq!(calls(&server).await, expected);
}

#[tokio::test]
async fn test_create_gives_up_after_bounded_attempts() {
    let server = MockServer::start().await;
    mount_daemon(&server, "exited").await;
    let docker = backend(&server, 2);

    let err = docker.create(&request()).await.unwrap_err();
    assert!(matches!(err, Error::Provision { .. }), "{:?}", err);

    let mut expected: Vec<String> = launch_sequence().into_iter().cycle().take(8).collect();
    // Cleanup of the dead container after the last attempt.
    expected.push(format!("DELETE /containers/{}", NAME));
    assert_eq!(calls(&server).await, expected);
}

#[tokio::test]
async fn test_delete_of_missing_container_succeeds() {
    let server = MockServer::start().await;
    mount_daemon(&server, "running").await;
    let docker = backend(&server, 1);

    let runner = Runner::new(NAME, Tags::new(["linux"]), Utc::now());
    docker.delete(&runner).await.unwrap();
    docker.delete(&runner).await.unwrap();
    assert_eq!(calls(&server).await.len(), 2);
}

#[tokio::test]
async fn test_update_sends_nothing_to_daemon() {
    let server = MockServer::start().await;
    let docker = backend(&server, 1);

    let runner = Runner::new(NAME, Tags::new(["linux"]), Utc::now());
    let event = InstanceEvent::StatusChanged {
        from: RunnerStatus::Creating,
        to: RunnerStatus::Online,
    };
    docker.update(&runner, &event).await.unwrap();

    assert!(calls(&server).await.is_empty());
}
