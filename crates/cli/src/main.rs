//! Admission control CLI
//!
//! A command-line tool for inspecting node admission control stats, updating
//! dynamic settings and checking whether an action would be admitted.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{evaluate, settings, stats};

/// Node admission control CLI
#[derive(Parser)]
#[command(name = "admctl")]
#[command(author, version, about = "CLI for node admission control", long_about = None)]
pub struct Cli {
    /// Agent endpoint URL (can also be set via ADMCTL_API_URL env var)
    #[arg(long, env = "ADMCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show admission control stats of the node
    Stats,

    /// Show the admission state of every known node
    States,

    /// Read or update dynamic settings
    #[command(subcommand)]
    Settings(SettingsCommands),

    /// Check whether an action would be admitted
    Evaluate {
        /// Transport action name, e.g. indices:data/read/search
        action: String,

        /// Action type (search, indexing); classified from the action when omitted
        #[arg(long, short = 't')]
        action_type: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Show current settings
    Get,

    /// Update settings
    Set {
        /// One or more key=value pairs; key=null resets to the default
        #[arg(required = true)]
        assignments: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let format = config.format(cli.format);

    // Initialize client
    let client = client::ApiClient::new(&config.api_url(cli.api_url))?;

    // Execute command
    match cli.command {
        Commands::Stats => stats::show_stats(&client, format).await?,
        Commands::States => stats::show_node_states(&client, format).await?,
        Commands::Settings(settings_cmd) => match settings_cmd {
            SettingsCommands::Get => settings::get_settings(&client, format).await?,
            SettingsCommands::Set { assignments } => {
                settings::set_settings(&client, &assignments, format).await?
            }
        },
        Commands::Evaluate {
            action,
            action_type,
        } => {
            let admitted = evaluate::evaluate(&client, &action, action_type, format).await?;
            if !admitted {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}
