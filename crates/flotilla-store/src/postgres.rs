//! PostgreSQL implementation of StateStore.

use async_trait::async_trait;
use flotilla_core::ports::{Mutation, StateStore};
use flotilla_core::{Error, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::debug;

pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn like_prefix(prefix: &str) -> String {
        let escaped = prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        format!("{}%", escaped)
    }
}

fn store_err(e: sqlx::Error) -> Error {
    Error::Store(e.to_string())
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT value FROM flotilla_state WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.map(|r| r.get::<Value, _>("value")))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        sqlx::query("INSERT INTO flotilla_state (key, value, updated_at) VALUES ($1, $2, NOW()) ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()")
            .bind(key)
            .bind(&value)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM flotilla_state WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Value>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT key, value FROM flotilla_state WHERE key = ANY($1)")
            .bind(keys)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        let mut found: HashMap<String, Value> = rows
            .iter()
            .map(|r| (r.get::<String, _>("key"), r.get::<Value, _>("value")))
            .collect();
        Ok(keys.iter().map(|k| found.remove(k)).collect())
    }

    async fn set_many(&self, entries: Vec<(String, Value)>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        for (key, value) in &entries {
            sqlx::query("INSERT INTO flotilla_state (key, value, updated_at) VALUES ($1, $2, NOW()) ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let rows =
            sqlx::query("SELECT key FROM flotilla_state WHERE key LIKE $1 ESCAPE '\\' ORDER BY key")
                .bind(Self::like_prefix(prefix))
                .fetch_all(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(rows.iter().map(|r| r.get::<String, _>("key")).collect())
    }

    async fn update(&self, key: &str, mutate: Mutation<'_>) -> Result<Option<Value>> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        // Serializes writers on this key, including the insert-if-absent case
        // that a row lock alone cannot cover.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        let current = sqlx::query("SELECT value FROM flotilla_state WHERE key = $1")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_err)?
            .map(|r| r.get::<Value, _>("value"));

        let next = mutate(current)?;
        match &next {
            Some(value) => {
                sqlx::query("INSERT INTO flotilla_state (key, value, updated_at) VALUES ($1, $2, NOW()) ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()")
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await
                    .map_err(store_err)?;
            }
            None => {
                sqlx::query("DELETE FROM flotilla_state WHERE key = $1")
                    .bind(key)
                    .execute(&mut *tx)
                    .await
                    .map_err(store_err)?;
            }
        }

        tx.commit().await.map_err(store_err)?;
        debug!(key, "State key updated");
        Ok(next)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_prefix_escapes_wildcards() {
        assert_eq!(PgStateStore::like_prefix("runner:"), "runner:%");
        assert_eq!(
            PgStateStore::like_prefix("pool:gpu_large,50%"),
            "pool:gpu\\_large,50\\%%"
        );
    }
}
