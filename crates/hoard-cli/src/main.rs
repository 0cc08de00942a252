//! hoard - shared package store CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hoard_cli::cmd;
use hoard_cli::{Cli, Commands, StoreCommands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Store { command } => {
            let store_dir = cli.store_dir()?;
            match command {
                StoreCommands::Path => cmd::store::path(&store_dir),
                StoreCommands::Prune => cmd::store::prune(&store_dir).await,
                StoreCommands::Usages { queries } => {
                    cmd::store::usages(&store_dir, queries).await
                }
            }
        }
        Commands::Config { file } => cmd::config::config(file.as_deref(), cli.store.clone()),
    }
}
