//! Helpers for exercising the API router in-process and waiting on
//! background work.

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use flotilla_api::{AppState, create_router};
use flotilla_manager::FleetManager;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub fn test_router(fleet: Arc<FleetManager>) -> Router {
    create_router(Arc::new(AppState::new(fleet)))
}

/// Send one request and return the status and the JSON body (`Null` when
/// the body is empty or not JSON).
pub async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<&str>,
) -> (StatusCode, serde_json::Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if body.is_some() {
        request = request.header("content-type", "application/json");
    }
    let request = request
        .body(Body::from(body.unwrap_or_default().to_string()))
        .expect("Failed to build request");

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("Router failed");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Poll `check` until it holds. Panics after five seconds.
pub async fn eventually<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    let poll = async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(5), poll).await.is_err() {
        panic!("timed out waiting for {}", what);
    }
}
