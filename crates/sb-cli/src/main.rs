//! # sbctl
//!
//! Command-line front end over `sb-core`.
//!
//! ```text
//! sbctl [--connection-string] [--state-file] [--log-level] <topic|queue> <command>
//! ```
//!
//! Runs against the in-memory namespace. The namespace is loaded from the
//! state file before the command and written back after it, including
//! after a failed command. The state file stays locked for the whole run,
//! so a concurrent `sbctl` on the same file exits with an error.

mod cli;
mod commands;
mod display;
mod emulator;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sb_core::{ConnectionString, CoordinatorConfig, NamespaceClient};

use crate::cli::Cli;
use crate::emulator::Emulator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = CoordinatorConfig::from_env().with_connection_string(cli.connection_string);
    config.validate()?;
    let connection = ConnectionString::parse(&config.connection_string)?;

    let emulator = Emulator::open(&cli.state_file, &connection)?;
    let client = NamespaceClient::new(config, emulator.connector());

    let outcome = commands::run(&client, cli.command).await;
    emulator.save()?;
    outcome
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level `{level}`"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing the log subscriber: {e}"))
}
