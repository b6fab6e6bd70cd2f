//! Database connection shared by the inspection commands.

use anyhow::{Context, Result};

use tollgate_core::config::DatabaseConfig;
use tollgate_core::db::Database;
use tollgate_core::store::PostgresStore;

/// An open pool plus the scheduler instance whose records are inspected.
pub struct Connection {
    database: Database,
    store: PostgresStore,
    instance: String,
}

impl Connection {
    /// Connect with a small pool; the CLI issues one query at a time.
    pub async fn open(database_url: &str, instance: &str) -> Result<Self> {
        let mut config = DatabaseConfig::new(database_url);
        config.max_connections = 2;
        config.min_connections = 0;

        let database = Database::connect(&config)
            .await
            .context("Failed to connect to the database")?;
        let store = PostgresStore::new(&database);

        Ok(Self {
            database,
            store,
            instance: instance.to_string(),
        })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn store(&self) -> &PostgresStore {
        &self.store
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }
}
