//! Error families for every stage of the store pipeline.
//!
//! Each stage rejects with its own type so the installer can decide, per
//! dependency, whether to abort the run or carry on.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or unreadable install configuration. Raised before any I/O on the store.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot generate a {lockfile} because lockfile is set to false")]
    LockfileDisabled { lockfile: &'static str },

    #[error("Could not determine the store directory. Set HOARD_STORE_DIR or pass a store path.")]
    NoStoreDir,

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// A wanted dependency could not be turned into a package id.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("No version of {name} matches {selector}")]
    NoMatch { name: String, selector: String },

    #[error("Registry {registry} is unreachable: {message}")]
    Unreachable { registry: String, message: String },

    #[error("Local dependency directory does not exist: {}", .0.display())]
    MissingLocalPath(PathBuf),

    #[error("Failed to read manifest at {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    #[error("{0}")]
    Other(String),
}

/// Getting package content into the store failed.
///
/// Signals hand this out behind an `Arc` so every waiter on a shared
/// transfer observes the same failure.
#[derive(Error, Debug)]
pub enum FetchError {
    #[cfg(feature = "network")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt archive for {package_id}: {message}")]
    CorruptArchive { package_id: String, message: String },

    #[error("Integrity mismatch for {package_id}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        package_id: String,
        expected: String,
        actual: String,
    },

    #[error("Resolution of {0} cannot be fetched into the store")]
    UnsupportedResolution(String),

    #[error("Package {0} has no package.json")]
    MissingManifest(String),

    #[error("Invalid package.json in {package_id}: {message}")]
    InvalidManifest { package_id: String, message: String },

    #[error("Fetch of {0} was interrupted before it settled")]
    Interrupted(String),
}

/// Materializing store content into a project failed.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Failed to import {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File {name} is listed for import but missing from {}", from.display())]
    MissingFile { name: String, from: PathBuf },

    #[error("Refusing to import path outside the package: {0}")]
    UnsafePath(String),

    #[error("Import task failed: {0}")]
    Join(String),
}

impl ImportError {
    /// Attach the path being worked on to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Store bookkeeping (connections, pruning, uploads) failed.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt connection table {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Built package location does not exist: {}", .0.display())]
    MissingBuild(PathBuf),

    #[error("Connection table actor died")]
    ActorDied,

    #[error("Store task failed: {0}")]
    Join(String),
}

impl StoreError {
    /// Attach the path being worked on to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
