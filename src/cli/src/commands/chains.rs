//! Chain link inspection.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use std::str::FromStr;
use tabled::Tabled;

use tollgate_core::store::{EngineStore, EntryState};

use crate::connection::Connection;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ChainCommands {
    /// List chain links
    List {
        /// Restrict to one chain
        #[arg(short, long)]
        chain: Option<String>,

        /// Filter by state (waiting, complete)
        #[arg(short, long)]
        state: Option<String>,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct LinkRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Chain")]
    chain: String,
    #[tabled(rename = "First")]
    first: String,
    #[tabled(rename = "Second")]
    second: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Updated")]
    updated_at: String,
}

pub async fn execute(cmd: ChainCommands, conn: &Connection, format: OutputFormat) -> Result<()> {
    match cmd {
        ChainCommands::List { chain, state } => {
            let state = state.as_deref().map(EntryState::from_str).transpose()?;
            let links = conn
                .store()
                .list_chain_links(conn.instance(), chain.as_deref(), state)
                .await?;

            let colored = matches!(format, OutputFormat::Table);
            let rows: Vec<LinkRow> = links
                .into_iter()
                .map(|link| LinkRow {
                    id: link.id,
                    chain: link.chain,
                    first: link.first.to_string(),
                    second: link.second.to_string(),
                    state: if colored {
                        output::state_cell(link.state.as_str())
                    } else {
                        link.state.to_string()
                    },
                    updated_at: link.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                })
                .collect();

            output::print_list(&rows, format)?;
        }
    }

    Ok(())
}
