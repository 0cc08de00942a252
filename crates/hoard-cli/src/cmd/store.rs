//! Store maintenance commands

use anyhow::{Context, Result};
use hoard_core::{Store, StoreLayout};
use std::path::Path;

/// Print the store directory
#[allow(clippy::unnecessary_wraps)]
pub fn path(store_dir: &Path) -> Result<()> {
    println!("{}", store_dir.display());
    Ok(())
}

/// Remove unreferenced packages and persist the connection table
pub async fn prune(store_dir: &Path) -> Result<()> {
    let store = open(store_dir)?;

    // Nothing is being fetched from this process.
    let report = store.prune(Vec::new()).await?;
    store.save_state().await?;
    store.close();

    for id in &report.removed {
        println!("removed {id}");
    }
    println!(
        "Removed {} packages, kept {}.",
        report.removed.len(),
        report.kept
    );
    Ok(())
}

/// Print reverse usages as JSON
pub async fn usages(store_dir: &Path, queries: &[String]) -> Result<()> {
    let store = open(store_dir)?;
    let found = store.find_package_usages(queries).await?;
    store.close();

    println!("{}", serde_json::to_string_pretty(&found)?);
    Ok(())
}

fn open(store_dir: &Path) -> Result<Store> {
    tracing::debug!(store = %store_dir.display(), "opening store");
    Store::open(StoreLayout::new(store_dir))
        .with_context(|| format!("Failed to open store at {}", store_dir.display()))
}
