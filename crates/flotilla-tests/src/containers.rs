//! Throwaway PostgreSQL for state store integration tests.

use flotilla_store::{Database, PgStateStore};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

pub struct PostgresContainer {
    // Dropping the handle stops the container.
    _container: ContainerAsync<Postgres>,
    url: String,
}

impl PostgresContainer {
    pub async fn start() -> anyhow::Result<Self> {
        let container = Postgres::default().with_tag("16-alpine").start().await?;
        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;

        Ok(Self {
            _container: container,
            url: format!("postgres://postgres:postgres@{}:{}/postgres", host, port),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect, run migrations and wrap the pool as a state store.
    pub async fn store(&self) -> anyhow::Result<PgStateStore> {
        let db = Database::connect(&self.url, 5).await?;
        db.migrate().await?;
        Ok(PgStateStore::new(db.pool().clone()))
    }
}
