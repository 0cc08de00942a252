//! Config command

use anyhow::Result;
use hoard_core::InstallOptions;
use hoard_core::options::extend_install_options;
use std::path::{Path, PathBuf};

/// Print the fully resolved install options
pub fn config(file: Option<&Path>, store: Option<PathBuf>) -> Result<()> {
    let mut options = match file {
        Some(path) => InstallOptions::load(path)?,
        None => InstallOptions::default(),
    };
    if store.is_some() {
        options.store = store;
    }

    let resolved = extend_install_options(options)?;
    println!("{}", serde_json::to_string_pretty(&resolved)?);
    Ok(())
}
