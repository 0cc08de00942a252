//! Store lifecycle and bookkeeping.
//!
//! Everything here that mutates shared state goes through the connection
//! actor, which gives the store a single writer: `update_connections`,
//! `prune` and `save_state` never interleave.

mod actor;
mod prune;
mod table;

pub use actor::{ConnectionEvent, ConnectionHandle};
pub use prune::PruneReport;
pub use table::ConnectionTable;

use hoard_schema::{PackageId, PackageUsagesBySearchQueries};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::StoreError;
use crate::paths::StoreLayout;

/// Where a package's files live and whether they include a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLocation {
    /// Directory to read or import the package from.
    pub directory: PathBuf,
    /// `true` when `directory` is a side-effects build for the requested engine.
    pub is_built: bool,
}

/// Edges to record for one prefix.
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpdate {
    /// Package ids the prefix now depends on.
    pub add_dependencies: Vec<PackageId>,
    /// Package ids the prefix no longer depends on.
    pub remove_dependencies: Vec<PackageId>,
    /// Replace the prefix's set with `add_dependencies`.
    pub prune: bool,
}

/// A content-addressed package store on disk.
#[derive(Debug)]
pub struct Store {
    layout: StoreLayout,
    connections: ConnectionHandle,
}

impl Store {
    /// Open (creating if needed) the store at `layout`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the root cannot be created or the
    /// persisted connection table is unreadable.
    pub fn open(layout: StoreLayout) -> Result<Self, StoreError> {
        fs::create_dir_all(layout.root()).map_err(|e| StoreError::io(layout.root(), e))?;
        let connections = ConnectionHandle::spawn(layout.clone())?;
        tracing::debug!("Opened store at {}", layout.root().display());
        Ok(Self {
            layout,
            connections,
        })
    }

    /// Path helpers for this store.
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Where to find the files of `package_id`.
    ///
    /// Directory ids resolve against `lockfile_directory`. Registry ids point
    /// into the store, preferring the build for `target_engine` when one has
    /// been uploaded.
    pub fn get_package_location(
        &self,
        package_id: &PackageId,
        lockfile_directory: &Path,
        target_engine: Option<&str>,
    ) -> PackageLocation {
        if let Some(relative) = package_id
            .as_str()
            .strip_prefix("link:")
            .or_else(|| package_id.as_str().strip_prefix("file:"))
        {
            return PackageLocation {
                directory: lockfile_directory.join(relative),
                is_built: false,
            };
        }

        let entry = self.layout.entry_dir(package_id);
        if let Some(engine) = target_engine {
            let built = StoreLayout::side_effects_dir(&entry, engine);
            if built.is_dir() {
                return PackageLocation {
                    directory: built,
                    is_built: true,
                };
            }
        }
        PackageLocation {
            directory: StoreLayout::content_dir(&entry),
            is_built: false,
        }
    }

    /// Engine → build directory for every build uploaded for `package_id`.
    pub fn cache_by_engine(&self, package_id: &PackageId) -> BTreeMap<String, PathBuf> {
        cache_by_engine(&self.layout, package_id)
    }

    /// Record which packages `prefix` depends on.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ActorDied`] after [`Store::close`].
    pub async fn update_connections(
        &self,
        prefix: &Path,
        update: ConnectionUpdate,
    ) -> Result<(), StoreError> {
        tracing::debug!(
            "Connections for {}: +{} -{}{}",
            prefix.display(),
            update.add_dependencies.len(),
            update.remove_dependencies.len(),
            if update.prune { " (prune)" } else { "" }
        );
        self.connections
            .update(
                prefix.to_path_buf(),
                update.add_dependencies,
                update.remove_dependencies,
                update.prune,
            )
            .await
    }

    /// Current connection table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ActorDied`] after [`Store::close`].
    pub async fn connections(&self) -> Result<ConnectionTable, StoreError> {
        self.connections.snapshot().await
    }

    /// Remove entries with no recorded connection. Entries whose directory is
    /// in `in_flight` are still being written and are left alone.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if an entry cannot be removed.
    pub async fn prune(&self, in_flight: Vec<PathBuf>) -> Result<PruneReport, StoreError> {
        self.connections.prune(in_flight).await
    }

    /// Persist the connection table.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the table cannot be written.
    pub async fn save_state(&self) -> Result<(), StoreError> {
        self.connections.save().await
    }

    /// Register a built package as the side-effects build of `package_id`
    /// for `engine`, replacing any previous build.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingBuild`] if `built_pkg_location` is not a
    /// directory, or an I/O error from copying it.
    pub async fn upload(
        &self,
        built_pkg_location: &Path,
        package_id: &PackageId,
        engine: &str,
    ) -> Result<(), StoreError> {
        if !built_pkg_location.is_dir() {
            return Err(StoreError::MissingBuild(built_pkg_location.to_path_buf()));
        }
        let from = built_pkg_location.to_path_buf();
        let target = StoreLayout::side_effects_dir(&self.layout.entry_dir(package_id), engine);
        let tmp = self.layout.tmp_dir();

        tokio::task::spawn_blocking(move || copy_into_place(&from, &target, &tmp))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))??;

        tracing::debug!("Uploaded {engine} build of {package_id}");
        Ok(())
    }

    /// Reverse usages per query (exact id, name, or `name@selector`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ActorDied`] after [`Store::close`].
    pub async fn find_package_usages(
        &self,
        search_queries: &[String],
    ) -> Result<PackageUsagesBySearchQueries, StoreError> {
        self.connections.usages(search_queries.to_vec()).await
    }

    /// Stop the connection actor. Unsaved connection changes are lost.
    pub fn close(&self) {
        tracing::debug!("Closing store at {}", self.layout.root().display());
        self.connections.shutdown();
    }
}

/// Engine → build directory for every build uploaded for `package_id`.
pub fn cache_by_engine(layout: &StoreLayout, package_id: &PackageId) -> BTreeMap<String, PathBuf> {
    let root = StoreLayout::side_effects_root(&layout.entry_dir(package_id));
    let Ok(engines) = fs::read_dir(&root) else {
        return BTreeMap::new();
    };
    engines
        .filter_map(Result::ok)
        .filter_map(|e| {
            let dir = e.path().join("package");
            dir.is_dir()
                .then(|| (e.file_name().to_string_lossy().into_owned(), dir))
        })
        .collect()
}

/// Copy a directory tree to `target` through a staging directory under `tmp`.
fn copy_into_place(from: &Path, target: &Path, tmp: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(tmp).map_err(|e| StoreError::io(tmp, e))?;
    let staging = tempfile::Builder::new()
        .prefix("upload-")
        .tempdir_in(tmp)
        .map_err(|e| StoreError::io(tmp, e))?;

    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|e| StoreError::io(from, e.into()))?;
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let dest = staging.path().join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).map_err(|e| StoreError::io(&dest, e))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &dest).map_err(|e| StoreError::io(&dest, e))?;
        }
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    if target.exists() {
        fs::remove_dir_all(target).map_err(|e| StoreError::io(target, e))?;
    }
    fs::rename(staging.path(), target).map_err(|e| StoreError::io(target, e))
}
