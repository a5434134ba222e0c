//! Worker Autoscaler CLI
//!
//! A command-line tool for inspecting the worker pool and triggering
//! scaling checks on a running autoscaler.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{status, trigger};

/// Worker Autoscaler CLI
#[derive(Parser)]
#[command(name = "wsctl")]
#[command(author, version, about = "CLI for the Worker Autoscaler", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via WSCTL_API_URL env var)
    #[arg(long, env = "WSCTL_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show worker pool state and the pending scaling decision
    Status,

    /// Run a scaling check now
    Trigger {
        /// Bypass the scale-down cooldown
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize client
    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Status => status::show_status(&client, cli.format).await?,
        Commands::Trigger { force } => trigger::trigger(&client, force, cli.format).await?,
    }

    Ok(())
}
