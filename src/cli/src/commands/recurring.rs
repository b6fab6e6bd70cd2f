//! Recurring job bindings.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use tollgate_core::store::EngineStore;

use crate::connection::Connection;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum RecurringCommands {
    /// List installed recurring jobs with their next fire time
    List,
}

#[derive(Debug, Serialize, Tabled)]
struct BindingRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Schedule")]
    schedule: String,
    #[tabled(rename = "Job")]
    job: String,
    #[tabled(rename = "Next Fire")]
    next_fire: String,
    #[tabled(rename = "Installed")]
    created_at: String,
}

pub async fn execute(
    cmd: RecurringCommands,
    conn: &Connection,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        RecurringCommands::List => {
            let bindings = conn.store().list_bindings().await?;

            let mut rows = Vec::with_capacity(bindings.len());
            for binding in bindings {
                // A binding whose job is gone is reinstalled on the next sync.
                let next_fire = match conn.store().find_job(&binding.job_key).await? {
                    Some(stored) => stored
                        .trigger
                        .map(|t| t.fire_at().format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    None => "missing".to_string(),
                };

                rows.push(BindingRow {
                    name: binding.logical_name,
                    schedule: binding.schedule,
                    job: binding.job_key.to_string(),
                    next_fire,
                    created_at: binding.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                });
            }

            output::print_list(&rows, format)?;
        }
    }

    Ok(())
}
