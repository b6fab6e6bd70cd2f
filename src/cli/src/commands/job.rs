//! Stored job lookup.

use anyhow::Result;
use clap::Subcommand;

use tollgate_core::jobs::{JobKey, Trigger};
use tollgate_core::store::EngineStore;

use crate::connection::Connection;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum JobCommands {
    /// Show a stored job definition and its pending trigger
    Show {
        /// Job group
        group: String,
        /// Job name
        name: String,
    },
}

pub async fn execute(cmd: JobCommands, conn: &Connection, format: OutputFormat) -> Result<()> {
    match cmd {
        JobCommands::Show { group, name } => {
            let key = JobKey::new(name, group);
            let Some(stored) = conn.store().find_job(&key).await? else {
                anyhow::bail!("Job '{}' not found", key);
            };

            match format {
                OutputFormat::Table => {
                    let definition = &stored.definition;
                    output::print_header(&format!("Job: {}", definition.key));
                    output::print_detail("Kind", definition.kind.as_str());
                    output::print_detail("Payload", &definition.payload.to_string());

                    let trigger = match &stored.trigger {
                        None => "none".to_string(),
                        Some(Trigger::Once { fire_at }) => format!("once at {}", fire_at),
                        Some(Trigger::Cron { expression, next_fire_at }) => {
                            format!("cron '{}', next at {}", expression, next_fire_at)
                        }
                    };
                    output::print_detail("Trigger", &trigger);

                    match &definition.retry {
                        Some(retry) => output::print_detail(
                            "Retries",
                            &format!("{}/{}", retry.retries, retry.max_retries),
                        ),
                        None => output::print_detail("Retries", "not retried"),
                    }
                    output::print_detail("Updated", &stored.updated_at.to_rfc3339());
                }
                _ => output::print_item(&stored, format)?,
            }
        }
    }

    Ok(())
}
