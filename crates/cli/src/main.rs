//! Orderline CLI - Schema setup and message tooling.
//!
//! # Usage
//!
//! ```bash
//! # Apply the orders schema
//! orderline-cli migrate
//!
//! # Check a file of newline-delimited order messages
//! orderline-cli check orders.jsonl
//!
//! # Check messages piped on stdin
//! cat orders.jsonl | orderline-cli check -
//! ```
//!
//! # Commands
//!
//! - `migrate` - Apply `crates/service/schema/orders.sql`
//! - `check` - Dry-run messages through decoding and validation

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "orderline-cli")]
#[command(author, version, about = "Orderline CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the orders schema to `ORDERS_DATABASE_URL`
    Migrate,
    /// Check newline-delimited order messages without storing them
    Check {
        /// Input file, or `-` for stdin
        input: PathBuf,
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
        Commands::Check { input } => {
            let report = commands::check::run(&input).await?;
            report.print();
            if !report.is_clean() {
                return Err("some messages would not be stored".into());
            }
        }
    }
    Ok(())
}
