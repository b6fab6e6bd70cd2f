//! Database layer.
//!
//! PostgreSQL connection pool and schema migrations. The engine's tables are
//! accessed through [`crate::store::PostgresStore`].

pub mod health;

pub use health::{ConnectionPoolMetrics, DatabaseHealth, MigrationStatus};

use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Instant;
use tracing::{error, info};

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    max_connections: u32,
    min_connections: u32,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "Connected to database"
        );

        Ok(Self {
            pool,
            max_connections: config.max_connections,
            min_connections: config.min_connections,
        })
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations...");
        let start = Instant::now();
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Database migration failed");
                e
            })?;
        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            "Database migrations completed"
        );
        Ok(())
    }

    /// Health probes for this pool.
    pub fn health(&self) -> DatabaseHealth {
        DatabaseHealth::new(self.pool.clone(), self.max_connections, self.min_connections)
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
