//! In-process state store.

use async_trait::async_trait;
use flotilla_core::Result;
use flotilla_core::ports::{Mutation, StateStore};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// State store backed by a map guarded by one lock.
///
/// Every operation holds the lock for its full duration, which makes
/// `update` atomic per key. State does not survive a restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Value>>> {
        let entries = self.entries.lock().await;
        Ok(keys.iter().map(|k| entries.get(k).cloned()).collect())
    }

    async fn set_many(&self, batch: Vec<(String, Value)>) -> Result<()> {
        self.entries.lock().await.extend(batch);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn update(&self, key: &str, mutate: Mutation<'_>) -> Result<Option<Value>> {
        let mut entries = self.entries.lock().await;
        let current = entries.get(key).cloned();
        match mutate(current)? {
            Some(value) => {
                entries.insert(key.to_string(), value.clone());
                Ok(Some(value))
            }
            None => {
                entries.remove(key);
                Ok(None)
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_set_delete() {
        let store = MemoryStore::new();
        store.set("runner:a", json!({"n": 1})).await.unwrap();
        assert_eq!(store.get("runner:a").await.unwrap(), Some(json!({"n": 1})));

        store.delete("runner:a").await.unwrap();
        store.delete("runner:a").await.unwrap();
        assert_eq!(store.get("runner:a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_by_prefix() {
        let store = MemoryStore::new();
        store
            .set_many(vec![
                ("runner:b".to_string(), json!(1)),
                ("runner:a".to_string(), json!(2)),
                ("pool:linux".to_string(), json!([])),
                ("runners".to_string(), json!(3)),
            ])
            .await
            .unwrap();

        let keys = store.keys("runner:").await.unwrap();
        assert_eq!(keys, vec!["runner:a", "runner:b"]);
    }

    #[tokio::test]
    async fn test_get_many_preserves_order() {
        let store = MemoryStore::new();
        store.set("k1", json!(1)).await.unwrap();
        store.set("k3", json!(3)).await.unwrap();

        let values = store
            .get_many(&["k3".to_string(), "k2".to_string(), "k1".to_string()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some(json!(3)), None, Some(json!(1))]);
    }

    #[tokio::test]
    async fn test_concurrent_updates_do_not_lose_writes() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();

        for _ in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let increment = |v: Option<Value>| -> Result<Option<Value>> {
                    let n = v.and_then(|v| v.as_u64()).unwrap_or(0);
                    Ok(Some(json!(n + 1)))
                };
                store.update("counter:linux", &increment).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get("counter:linux").await.unwrap(), Some(json!(50)));
    }

    #[tokio::test]
    async fn test_update_returning_none_removes_key() {
        let store = MemoryStore::new();
        store.set("pool:linux", json!(["a"])).await.unwrap();

        let clear = |_: Option<Value>| -> Result<Option<Value>> { Ok(None) };
        store.update("pool:linux", &clear).await.unwrap();
        assert!(store.is_empty().await);
    }
}
