//! # Nimbus
//!
//! Command line entry point. Parses arguments, sets up logging and hands off
//! to the command handlers.
//!
//! ## Logging
//!
//! Logs go to stderr through `tracing-subscriber`. `RUST_LOG` takes
//! precedence; otherwise the level is `info`, or `debug` with `--verbose`.
//! Command output goes to stdout.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    commands::execute_command(cli.command).await
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
