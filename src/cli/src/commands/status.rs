//! Database and queue health.
//!
//! Probes connectivity, compares embedded migrations with the applied ones,
//! and summarizes the instance's queue.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use tollgate_core::db::{ConnectionPoolMetrics, MigrationStatus};
use tollgate_core::store::{EngineStore, QueueCounts};

use crate::connection::Connection;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct StatusArgs {
    /// Queue to summarize
    #[arg(short, long, default_value = "default")]
    queue: String,
}

#[derive(Serialize)]
struct StatusReport {
    instance: String,
    latency_ms: u64,
    migrations: MigrationStatus,
    pool: ConnectionPoolMetrics,
    queue: String,
    counts: QueueCounts,
}

pub async fn execute(args: StatusArgs, conn: &Connection, format: OutputFormat) -> Result<()> {
    let health = conn.database().health();
    let latency = health.check_connectivity().await?;
    let migrations = health.migration_status().await?;
    let counts = conn.store().queue_counts(conn.instance(), &args.queue).await?;

    let report = StatusReport {
        instance: conn.instance().to_string(),
        latency_ms: latency.as_millis() as u64,
        migrations,
        pool: health.pool_metrics(),
        queue: args.queue,
        counts,
    };

    match format {
        OutputFormat::Table => {
            output::print_header("Tollgate Status");
            output::print_detail("Instance", &report.instance);
            output::print_detail("Latency", &format!("{} ms", report.latency_ms));
            output::print_detail(
                "Pool",
                &format!(
                    "{} active / {} idle ({:.0}% of {})",
                    report.pool.active_connections,
                    report.pool.idle_connections,
                    report.pool.utilization_pct,
                    report.pool.max_connections
                ),
            );
            output::print_detail(
                &format!("Queue '{}'", report.queue),
                &format!(
                    "{} waiting, {} complete",
                    report.counts.waiting, report.counts.complete
                ),
            );

            if report.migrations.is_current {
                output::print_success("Schema is up to date");
            } else {
                output::print_warning(&format!(
                    "{} pending migration(s): {}",
                    report.migrations.pending.len(),
                    report.migrations.pending.join(", ")
                ));
            }
        }
        _ => output::print_item(&report, format)?,
    }

    Ok(())
}
