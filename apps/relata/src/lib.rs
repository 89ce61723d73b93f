//! # Relata - command-line host
//!
//! Library half of the `relata` binary: schema files, command
//! implementations and the error type. `main.rs` only parses arguments,
//! installs logging and dispatches here.

pub mod cli;
pub mod config;
pub mod error;

pub use error::{CliError, CliResult};
