//! hoard - package store maintenance
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Inspect and maintain a shared package store from the command line.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.hoard-store/
//! ├── <registry>/<name>/<version>/   # one entry per package id
//! ├── connections.json               # project -> package ids
//! ├── tmp/                           # staging for transfers
//! └── _locks/
//! ```

pub mod cmd;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "hoard")]
#[command(author, version, about = "hoard - shared package store")]
pub struct Cli {
    /// Store directory
    #[arg(long, global = true, env = "HOARD_STORE_DIR")]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Store maintenance
    Store {
        #[command(subcommand)]
        command: StoreCommands,
    },
    /// Print resolved install options as JSON
    Config {
        /// TOML file with install options
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum StoreCommands {
    /// Print the store directory
    Path,
    /// Remove packages no project depends on
    Prune,
    /// Show which projects depend on matching packages
    Usages {
        /// Package id, name, or name@range
        #[arg(required = true)]
        queries: Vec<String>,
    },
}

impl Cli {
    /// Store directory from `--store`, `HOARD_STORE_DIR`, or the home default.
    pub fn store_dir(&self) -> Result<PathBuf> {
        self.store
            .clone()
            .or_else(hoard_core::try_default_store_path)
            .context("Could not determine the store directory. Pass --store.")
    }
}
