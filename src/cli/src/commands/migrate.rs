//! Schema migrations.

use anyhow::{Context, Result};

use crate::connection::Connection;
use crate::output::{self, OutputFormat};

pub async fn execute(conn: &Connection, format: OutputFormat) -> Result<()> {
    let health = conn.database().health();
    let before = health.migration_status().await?;
    if before.is_current {
        output::print_info("Schema is up to date.");
        return Ok(());
    }

    conn.database()
        .migrate()
        .await
        .context("Failed to apply migrations")?;

    match format {
        OutputFormat::Table => {
            output::print_success(&format!("Applied {} migration(s)", before.pending.len()));
            for name in &before.pending {
                output::print_detail("applied", name);
            }
        }
        _ => output::print_item(&serde_json::json!({ "applied": before.pending }), format)?,
    }

    Ok(())
}
