//! Tollgate CLI - inspect job queues, chains and recurring jobs.
//!
//! Reads the engine's tables directly from Postgres; no running scheduler is
//! required.

mod commands;
mod connection;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{chains, config, job, migrate, queue, recurring, status};
use connection::Connection;
use output::OutputFormat;

/// Tollgate - Admission-Controlled Job Orchestration CLI
#[derive(Parser)]
#[command(
    name = "tollgate",
    version,
    about = "Tollgate - Admission-Controlled Job Orchestration",
    long_about = "CLI tool for inspecting Tollgate queues, chain links, recurring jobs and schema state.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// PostgreSQL connection URL
    #[arg(long, global = true, env = "TOLLGATE_DATABASE_URL")]
    database_url: Option<String>,

    /// Scheduler instance whose records are shown
    #[arg(short, long, global = true, env = "TOLLGATE_INSTANCE")]
    instance: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Admission queue entries
    #[command(subcommand)]
    Queue(queue::QueueCommands),

    /// Chain links
    #[command(subcommand)]
    Chains(chains::ChainCommands),

    /// Recurring job bindings
    #[command(subcommand)]
    Recurring(recurring::RecurringCommands),

    /// Stored job definitions
    #[command(subcommand)]
    Job(job::JobCommands),

    /// Apply pending schema migrations
    Migrate,

    /// Check database connectivity, schema and queue state
    Status(status::StatusArgs),

    /// Stored connection defaults
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

fn resolve_database_url(flag: Option<String>) -> Result<String> {
    flag.or_else(|| config::stored(config::ConfigKey::DatabaseUrl))
        .context("No database URL: pass --database-url, set TOLLGATE_DATABASE_URL, or run `tollgate config set database-url <url>`")
}

fn resolve_instance(flag: Option<String>) -> String {
    flag.or_else(|| config::stored(config::ConfigKey::Instance))
        .unwrap_or_else(|| "tollgate".to_string())
}

async fn run(cli: Cli) -> Result<()> {
    let Cli {
        output: format,
        database_url,
        instance,
        command,
        ..
    } = cli;

    let command = match command {
        Commands::Config(cmd) => return config::execute(cmd, format).await,
        other => other,
    };

    let conn = Connection::open(&resolve_database_url(database_url)?, &resolve_instance(instance)).await?;

    match command {
        Commands::Queue(cmd) => queue::execute(cmd, &conn, format).await,
        Commands::Chains(cmd) => chains::execute(cmd, &conn, format).await,
        Commands::Recurring(cmd) => recurring::execute(cmd, &conn, format).await,
        Commands::Job(cmd) => job::execute(cmd, &conn, format).await,
        Commands::Migrate => migrate::execute(&conn, format).await,
        Commands::Status(args) => status::execute(args, &conn, format).await,
        Commands::Config(_) => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
