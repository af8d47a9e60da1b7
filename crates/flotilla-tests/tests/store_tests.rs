//! State store contract tests: the in-memory store always, PostgreSQL with
//! `--features integration`.

use chrono::Duration;
use flotilla_core::ports::StateStore;
use flotilla_core::{RunnerStatus, Tags};
use flotilla_store::{MemoryStore, RunnerRepository};
use flotilla_tests::RunnerFixture;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn tags() -> Tags {
    Tags::new(["linux", "x64"])
}

async fn check_round_trip(store: Arc<dyn StateStore>) {
    let repo = RunnerRepository::new(store);

    let finished = RunnerFixture::finished("flotilla-linux-x64-1", &tags(), 9);
    let pending = RunnerFixture::creating("flotilla-linux-x64-2", &tags(), Duration::minutes(3));
    repo.insert(&finished).await.unwrap();
    repo.insert(&pending).await.unwrap();

    let loaded = repo.get("flotilla-linux-x64-1").await.unwrap().unwrap();
    assert_eq!(loaded, finished);
    assert_eq!(
        loaded.status_history,
        vec![
            RunnerStatus::Creating,
            RunnerStatus::Online,
            RunnerStatus::Running
        ]
    );

    let loaded = repo.get("flotilla-linux-x64-2").await.unwrap().unwrap();
    assert_eq!(loaded, pending);
    assert!(loaded.started_at.is_none());

    let names: Vec<String> = repo
        .pool_runners(&tags())
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["flotilla-linux-x64-1", "flotilla-linux-x64-2"]);
}

async fn check_update_and_keys(store: Arc<dyn StateStore>) {
    store.set("runner:a_1", json!(1)).await.unwrap();
    store.set("runner:ab", json!(2)).await.unwrap();
    store.set("pool:x", json!([])).await.unwrap();

    // `_` must not act as a wildcard.
    assert_eq!(store.keys("runner:a_").await.unwrap(), vec!["runner:a_1"]);
    assert_eq!(
        store.keys("runner:").await.unwrap(),
        vec!["runner:a_1", "runner:ab"]
    );

    let values = store
        .get_many(&["runner:ab".to_string(), "missing".to_string(), "runner:a_1".to_string()])
        .await
        .unwrap();
    assert_eq!(values, vec![Some(json!(2)), None, Some(json!(1))]);

    let bump = |v: Option<serde_json::Value>| -> flotilla_core::Result<Option<serde_json::Value>> {
        Ok(Some(json!(v.and_then(|v| v.as_i64()).unwrap_or(0) + 10)))
    };
    assert_eq!(store.update("runner:ab", &bump).await.unwrap(), Some(json!(12)));

    let remove = |_: Option<serde_json::Value>| -> flotilla_core::Result<Option<serde_json::Value>> {
        Ok(None)
    };
    assert_eq!(store.update("runner:ab", &remove).await.unwrap(), None);
    assert_eq!(store.get("runner:ab").await.unwrap(), None);

    store.delete("runner:ab").await.unwrap();
    store.ping().await.unwrap();
}

async fn check_concurrent_counter(store: Arc<dyn StateStore>) {
    let repo = RunnerRepository::new(store);
    let mut handles = Vec::new();
    for _ in 0..20 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            repo.next_counter(&tags()).await.unwrap()
        }));
    }

    let mut seen = Vec::new();
    for handle in handles {
        seen.push(handle.await.unwrap());
    }
    seen.sort();
    assert_eq!(seen, (1..=20).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_memory_round_trip() {
    check_round_trip(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_memory_update_and_keys() {
    check_update_and_keys(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_memory_concurrent_counter() {
    check_concurrent_counter(Arc::new(MemoryStore::new())).await;
}

#[cfg(feature = "integration")]
mod postgres {
    use super::*;
    use flotilla_tests::containers::PostgresContainer;

    async fn store() -> (PostgresContainer, Arc<dyn StateStore>) {
        let pg = PostgresContainer::start()
            .await
            .expect("Failed to start PostgreSQL");
        let store = pg.store().await.expect("Failed to open store");
        (pg, Arc::new(store))
    }

    #[tokio::test]
    async fn test_postgres_round_trip() {
        let (_pg, store) = store().await;
        check_round_trip(store).await;
    }

    #[tokio::test]
    async fn test_postgres_update_and_keys() {
        let (_pg, store) = store().await;
        check_update_and_keys(store).await;
    }

    #[tokio::test]
    async fn test_postgres_concurrent_counter() {
        let (_pg, store) = store().await;
        check_concurrent_counter(store).await;
    }
}
