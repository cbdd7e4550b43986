//! gou-node CLI Application
//!
//! Runs a node, or talks to other nodes one verb at a time.

use clap::{Parser, Subcommand};
use gou_node::cli::{self, AppState};
use gou_node::config::Settings;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gou")]
#[command(version)]
#[command(about = "A shinGETsu-compatible P2P node", long_about = None)]
struct Cli {
    /// Settings file (JSON); default locations are searched when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node
    Run,

    /// Ping a node and show our observed address
    Ping {
        /// Target nodestr (host:port/path)
        node: String,
    },

    /// Ask a node for another node
    Node {
        /// Target nodestr (host:port/path)
        node: String,
    },

    /// Join a node
    Join {
        /// Target nodestr (host:port/path)
        node: String,
    },

    /// Say goodbye to a node
    Bye {
        /// Target nodestr (host:port/path)
        node: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let state = AppState::new(settings)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match &cli.command {
            Commands::Run => cli::cmd_run(&state).await,
            Commands::Ping { node } => cli::cmd_ping(&state, node).await,
            Commands::Node { node } => cli::cmd_get_node(&state, node).await,
            Commands::Join { node } => cli::cmd_join(&state, node).await,
            Commands::Bye { node } => cli::cmd_bye(&state, node).await,
        }
    })
}
