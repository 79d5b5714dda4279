//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Nimbus - serverless deploy reconciler
#[derive(Parser, Debug)]
#[command(name = "nimbus")]
#[command(version)]
#[command(
    about = "Converge serverless functions, triggers and gateways toward their declared state"
)]
#[command(
    long_about = "Nimbus reads a service configuration, observes what the account already holds and issues the minimal set of create, update and delete calls to converge the two."
)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the account comes from and the service to converge.
#[derive(clap::Args, Debug, Clone)]
pub struct Target {
    /// Service configuration file
    #[arg(short, long, default_value = "nimbus.yaml")]
    pub config: PathBuf,

    /// JSON account snapshot to start from; an empty account if omitted
    #[arg(short, long)]
    pub snapshot: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy the service
    Deploy {
        #[command(flatten)]
        target: Target,

        /// Write the account snapshot after the run
        #[arg(long)]
        save_snapshot: Option<PathBuf>,

        /// Exit with an error if any resource failed to sync
        #[arg(long, default_value_t = false)]
        strict: bool,

        /// Print the report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show which declared resources exist
    Info {
        #[command(flatten)]
        target: Target,

        /// Print as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print the gateway document built from the current account
    RenderGateway {
        #[command(flatten)]
        target: Target,

        #[arg(short, long, value_enum, default_value_t = DocumentFormat::Yaml)]
        format: DocumentFormat,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}
