use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "margo-agent", about = "Edge reconciliation agent for Helm/Compose deployments", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the agent: load config, onboard if needed, then reconcile
    /// against the Workload Fleet Manager until stopped.
    Run {
        /// Path to the agent's YAML configuration file.
        #[arg(long)]
        config: PathBuf,
    },

    /// Print the on-disk deployment snapshot without starting any
    /// component. Read-only; useful for operators and debugging.
    Status {
        /// Path to the agent's YAML configuration file.
        #[arg(long)]
        config: PathBuf,
    },
}
