//! Command-line interface for lingua-relay.

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lingua-relay")]
#[command(about = "Real-time speech-translation relay server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server (default if no subcommand is given).
    Serve {
        /// Bind address.
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port override; falls back to config/env if omitted.
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Validate configuration and MT credentials without starting the server.
    Doctor,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve { host: "0.0.0.0".to_string(), port: None }) {
        Commands::Serve { host, port } => crate::server::start(&host, port).await,
        Commands::Doctor => run_doctor().await,
    }
}

async fn run_doctor() -> Result<()> {
    let config = crate::config::RelayConfig::load()?;
    println!("config loaded: port={}, max_connections={}", config.server.port, config.server.max_connections);

    match config.validate_mt_credentials() {
        Ok(()) => println!("MT credentials: OK"),
        Err(err) => println!("MT credentials: MISSING ({err})"),
    }

    Ok(())
}
