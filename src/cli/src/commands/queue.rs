//! Admission queue inspection.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use std::str::FromStr;
use tabled::Tabled;

use tollgate_core::store::{EngineStore, EntryState, QueueEntry};

use crate::connection::Connection;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List queue entries, lowest priority value first
    List {
        /// Restrict to one queue
        #[arg(short, long)]
        queue: Option<String>,

        /// Filter by state (waiting, complete)
        #[arg(short, long)]
        state: Option<String>,

        /// Maximum number of results
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show entry counts of a queue
    Stats {
        /// Queue name
        #[arg(short, long, default_value = "default")]
        queue: String,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct EntryRow {
    #[tabled(rename = "Seq")]
    id: i64,
    #[tabled(rename = "Queue")]
    queue: String,
    #[tabled(rename = "Job")]
    job: String,
    #[tabled(rename = "Priority")]
    priority: i32,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Updated")]
    updated_at: String,
}

impl EntryRow {
    fn from_entry(entry: QueueEntry, colored: bool) -> Self {
        Self {
            id: entry.id,
            queue: entry.queue,
            job: entry.key.to_string(),
            priority: entry.priority,
            state: if colored {
                output::state_cell(entry.state.as_str())
            } else {
                entry.state.to_string()
            },
            updated_at: entry.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct QueueSummary<'a> {
    instance: &'a str,
    queue: &'a str,
    waiting: u64,
    complete: u64,
}

pub async fn execute(cmd: QueueCommands, conn: &Connection, format: OutputFormat) -> Result<()> {
    match cmd {
        QueueCommands::List { queue, state, limit } => {
            let state = state.as_deref().map(EntryState::from_str).transpose()?;
            let entries = conn
                .store()
                .list_queue_entries(conn.instance(), queue.as_deref(), state, limit)
                .await?;

            let colored = matches!(format, OutputFormat::Table);
            let rows: Vec<EntryRow> = entries
                .into_iter()
                .map(|e| EntryRow::from_entry(e, colored))
                .collect();

            output::print_list(&rows, format)?;
        }

        QueueCommands::Stats { queue } => {
            let counts = conn.store().queue_counts(conn.instance(), &queue).await?;

            match format {
                OutputFormat::Table => {
                    output::print_header(&format!("Queue: {}", queue));
                    output::print_detail("Instance", conn.instance());
                    output::print_detail("Waiting", &counts.waiting.to_string());
                    output::print_detail("Complete", &counts.complete.to_string());
                }
                _ => output::print_item(
                    &QueueSummary {
                        instance: conn.instance(),
                        queue: &queue,
                        waiting: counts.waiting,
                        complete: counts.complete,
                    },
                    format,
                )?,
            }
        }
    }

    Ok(())
}
