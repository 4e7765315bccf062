use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use prepdesk::logging::{LogFormat, init_logging};

mod cmd;

#[derive(Parser)]
#[command(name = "prepdesk")]
#[command(version, about = "Warehouse fulfillment desk: order claiming and preparation lifecycle")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to prepdesk.toml (defaults to .prepdesk/prepdesk.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path. Overrides [server].db_path and PREPDESK_DB_PATH.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the data directory, a default prepdesk.toml and the database
    Init,
    /// Run the HTTP API
    Serve {
        /// Port to serve on. Overrides [server].port.
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (permissive CORS, bind on all interfaces)
        #[arg(long)]
        dev: bool,
    },
    /// Manage preparers and supervisors
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum WorkerCommands {
    /// Register a worker
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        merchant: i64,

        /// Orders the worker may hold at once
        #[arg(long, default_value = "1")]
        capacity: u32,

        /// preparer or supervisor
        #[arg(long, default_value = "preparer")]
        role: String,

        /// Only hand out orders paid with these methods (comma-separated)
        #[arg(long, conflicts_with = "status")]
        payment_methods: Option<String>,

        /// Only hand out orders in exactly this upstream status
        #[arg(long)]
        status: Option<String>,
    },
    /// List workers
    List {
        #[arg(long)]
        merchant: Option<i64>,
    },
    /// Stop a worker from claiming new orders
    Deactivate { id: i64 },
    /// Allow a deactivated worker to claim again
    Activate { id: i64 },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default prepdesk.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.verbose);

    let base_dir = std::env::current_dir().context("Failed to get current directory")?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&base_dir, &cli)?,
        Commands::Serve { port, dev } => cmd::cmd_serve(&base_dir, &cli, *port, *dev).await?,
        Commands::Worker { command } => cmd::cmd_worker(&base_dir, &cli, command.clone()).await?,
        Commands::Config { command } => cmd::cmd_config(&base_dir, &cli, command.clone())?,
    }

    Ok(())
}
