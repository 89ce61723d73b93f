//! # Relata CLI Module
//!
//! This module implements the CLI interface for Relata.
//!
//! ## Available Commands
//!
//! - `check` - Validate a schema file and list its entities
//! - `normalize` - Flatten a nested JSON document into tables
//! - `query` - Load a seed document and run a query against it

mod commands;

use crate::error::CliResult;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Relata - normalize nested JSON and query it relationally
///
/// Entities and their relations are declared in a TOML schema file.
#[derive(Parser, Debug)]
#[command(name = "relata")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the schema file
    #[arg(short = 'S', long, global = true, default_value = "relata.toml")]
    pub schema: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long = "json", global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the schema file
    Check,

    /// Normalize a nested JSON document into flat tables
    Normalize {
        /// Path to the input JSON (one record or an array of records)
        #[arg(short, long)]
        data: PathBuf,

        /// Root entity of the input
        #[arg(short, long)]
        entity: String,
    },

    /// Run a query against a seed document
    Query(QueryArgs),
}

/// Options of the `query` command.
#[derive(Args, Debug, Clone, Default)]
pub struct QueryArgs {
    /// Seed document: a JSON object mapping entity names to their input
    #[arg(short, long)]
    pub data: PathBuf,

    /// Entity to query
    #[arg(short, long)]
    pub entity: String,

    /// Relation path to eager load (repeatable, dotted for nesting)
    #[arg(short, long = "with")]
    pub with: Vec<String>,

    /// Equality filter `field=value` (repeatable, all must hold)
    #[arg(short = 'W', long = "where")]
    pub filters: Vec<String>,

    /// Sort key `field[:asc|desc]` (repeatable)
    #[arg(short, long = "order-by")]
    pub order_by: Vec<String>,

    /// Skip this many results
    #[arg(long)]
    pub offset: Option<usize>,

    /// Return at most this many results
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Return only the first result
    #[arg(long)]
    pub first: bool,

    /// Return the record with this primary key
    #[arg(long)]
    pub find: Option<String>,

    /// Print the number of matching records
    #[arg(long)]
    pub count: bool,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> CliResult<()> {
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Normalize { data, entity }) => {
            cmd_normalize(&cli.schema, json_mode, &data, &entity)
        }
        Some(Commands::Query(args)) => cmd_query(&cli.schema, json_mode, &args),
        Some(Commands::Check) | None => cmd_check(&cli.schema, json_mode, cli.verbose),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_flags() {
        let cli = Cli::try_parse_from([
            "relata",
            "--schema",
            "s.toml",
            "query",
            "-d",
            "seed.json",
            "-e",
            "users",
            "--with",
            "posts.author",
            "--where",
            "name=jo",
            "--order-by",
            "age:desc",
            "--limit",
            "2",
            "--json",
        ])
        .expect("parse");

        assert!(cli.json_mode);
        assert_eq!(cli.schema, PathBuf::from("s.toml"));
        let Some(Commands::Query(args)) = cli.command else {
            unreachable!("expected the query command");
        };
        assert_eq!(args.entity, "users");
        assert_eq!(args.with, vec!["posts.author".to_string()]);
        assert_eq!(args.filters, vec!["name=jo".to_string()]);
        assert_eq!(args.order_by, vec!["age:desc".to_string()]);
        assert_eq!(args.limit, Some(2));
        assert!(!args.first);
    }

    #[test]
    fn no_subcommand_defaults_to_check() {
        let cli = Cli::try_parse_from(["relata", "-q"]).expect("parse");
        assert!(cli.quiet);
        assert!(cli.command.is_none());
        assert_eq!(cli.schema, PathBuf::from("relata.toml"));
    }
}
