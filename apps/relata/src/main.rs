//! # Relata
//!
//! The command-line binary for the Relata normalization and query engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │             apps/relata (THE BINARY)          │
//! │                                              │
//! │  ┌─────────────┐        ┌─────────────────┐  │
//! │  │   CLI       │        │  Schema files   │  │
//! │  │  (clap)     │        │  (toml + serde) │  │
//! │  └──────┬──────┘        └────────┬────────┘  │
//! │         └───────────┬────────────┘           │
//! │                     ▼                        │
//! │             ┌───────────────┐                │
//! │             │  relata-core  │                │
//! │             │ (THE ENGINE)  │                │
//! │             └───────────────┘                │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! relata --schema blog.toml check --verbose
//! relata --schema blog.toml normalize -d users.json -e users
//! relata --schema blog.toml query -d seed.json -e users --with posts --order-by age:desc
//! ```

use clap::Parser;
use relata::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // RELATA_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("RELATA_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_env("RELATA_LOG")
        .unwrap_or_else(|_| "relata=info,relata_core=warn".into());

    // Logs go to stderr so stdout stays clean for results.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Relata startup banner.
fn print_banner() {
    eprintln!("relata v{}", env!("CARGO_PKG_VERSION"));
}
