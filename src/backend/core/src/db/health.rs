//! Database health: connectivity, pool metrics and migration status.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::error::Result;

/// Metrics collected from the database connection pool.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionPoolMetrics {
    /// Total connections in the pool.
    pub pool_size: u32,
    /// Number of idle connections.
    pub idle_connections: u32,
    /// Number of active (in-use) connections.
    pub active_connections: u32,
    /// Maximum configured pool size.
    pub max_connections: u32,
    /// Minimum configured pool size.
    pub min_connections: u32,
    /// Pool utilization percentage.
    pub utilization_pct: f64,
}

/// Applied versus pending migrations.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MigrationStatus {
    pub is_current: bool,
    pub applied: Vec<String>,
    pub pending: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// Health probes over a connection pool.
#[derive(Clone)]
pub struct DatabaseHealth {
    pool: PgPool,
    max_connections: u32,
    min_connections: u32,
}

impl DatabaseHealth {
    pub fn new(pool: PgPool, max_connections: u32, min_connections: u32) -> Self {
        Self {
            pool,
            max_connections,
            min_connections,
        }
    }

    /// Check database connectivity by executing a simple query.
    pub async fn check_connectivity(&self) -> Result<Duration> {
        let start = Instant::now();
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Database connectivity check failed");
                e
            })?;
        let latency = start.elapsed();
        if latency > Duration::from_millis(100) {
            warn!(
                latency_ms = latency.as_millis() as u64,
                "Database connectivity check latency is high"
            );
        }
        Ok(latency)
    }

    /// Compare the embedded migrations with the ones recorded as applied.
    pub async fn migration_status(&self) -> Result<MigrationStatus> {
        let migrator = sqlx::migrate!("./migrations");
        // A missing bookkeeping table means nothing has been applied yet.
        let applied: Vec<String> = sqlx::query_scalar(
            "SELECT description FROM _sqlx_migrations WHERE success ORDER BY installed_on",
        )
        .fetch_all(&self.pool)
        .await
        .unwrap_or_default();

        let pending: Vec<String> = migrator
            .iter()
            .map(|m| m.description.to_string())
            .filter(|m| !applied.contains(m))
            .collect();

        if pending.is_empty() {
            info!(applied_count = applied.len(), "All database migrations are applied");
        } else {
            warn!(pending_count = pending.len(), "Database has pending migrations");
        }

        Ok(MigrationStatus {
            is_current: pending.is_empty(),
            applied,
            pending,
            checked_at: Utc::now(),
        })
    }

    /// Get connection pool metrics.
    pub fn pool_metrics(&self) -> ConnectionPoolMetrics {
        let pool_size = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        let active = pool_size.saturating_sub(idle);
        let utilization = if self.max_connections > 0 {
            (active as f64 / self.max_connections as f64) * 100.0
        } else {
            0.0
        };

        ConnectionPoolMetrics {
            pool_size,
            idle_connections: idle,
            active_connections: active,
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            utilization_pct: utilization,
        }
    }
}
