//! Returns CLI - Database migrations, seeding and ledger audit.
//!
//! # Usage
//!
//! ```bash
//! # Run returns database migrations
//! returns-cli migrate
//!
//! # Insert default reasons and the settings row
//! returns-cli seed
//!
//! # Print and verify the status ledger of one return
//! returns-cli timeline 42
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `seed` - Seed the reason catalog and settings
//! - `timeline` - Replay a return's status history

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "returns-cli")]
#[command(author, version, about = "Returns service CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Insert default return reasons and the settings row
    Seed {
        /// Add the default reasons even if reasons already exist
        #[arg(long)]
        force: bool,
    },
    /// Print a return's status history and check it replays cleanly
    Timeline {
        /// Return request ID
        id: i32,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Seed { force } => commands::seed::run(force).await?,
        Commands::Timeline { id } => commands::timeline::run(id).await?,
    }
    Ok(())
}
