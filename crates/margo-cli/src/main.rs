mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => commands::run(&config).await,
        Command::Status { config } => commands::status(&config).await,
    }
}
