//! Connection table: which project prefixes depend on which package ids.

use hoard_schema::PackageId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Store-wide record of project → package edges, persisted as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionTable {
    prefixes: BTreeMap<PathBuf, BTreeSet<PackageId>>,
}

impl ConnectionTable {
    /// Load the table at `path`. A missing file is an empty table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the file exists but is not a table.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Atomically persist the table to `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if serialization, the write or the rename fails.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let temp_path = path.with_extension("json.tmp");
        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&content)?;
            file.sync_all()?;
            fs::rename(&temp_path, path)
        };
        write().map_err(|e| StoreError::io(path, e))
    }

    /// Record edges for one prefix.
    ///
    /// With `prune`, the prefix ends up depending on exactly `add`; otherwise
    /// `add` is merged in and `remove` taken out.
    pub fn update(
        &mut self,
        prefix: &Path,
        add: &[PackageId],
        remove: &[PackageId],
        prune: bool,
    ) {
        let ids = self.prefixes.entry(prefix.to_path_buf()).or_default();
        if prune {
            ids.clear();
        }
        ids.extend(add.iter().cloned());
        for id in remove {
            ids.remove(id);
        }
        if ids.is_empty() {
            self.prefixes.remove(prefix);
        }
    }

    /// Whether any prefix depends on `id`.
    pub fn is_referenced(&self, id: &PackageId) -> bool {
        self.prefixes.values().any(|ids| ids.contains(id))
    }

    /// Prefixes depending on `id`, sorted.
    pub fn usages(&self, id: &PackageId) -> Vec<PathBuf> {
        self.prefixes
            .iter()
            .filter(|(_, ids)| ids.contains(id))
            .map(|(prefix, _)| prefix.clone())
            .collect()
    }

    /// Every package id with at least one connection.
    pub fn package_ids(&self) -> BTreeSet<PackageId> {
        self.prefixes.values().flatten().cloned().collect()
    }

    /// Ids recorded for one prefix.
    pub fn dependencies_of(&self, prefix: &Path) -> Option<&BTreeSet<PackageId>> {
        self.prefixes.get(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PackageId {
        PackageId::new(s)
    }

    #[test]
    fn update_merges_and_removes() {
        let mut table = ConnectionTable::default();
        let prefix = Path::new("/work/app");
        table.update(prefix, &[id("r/a/1.0.0"), id("r/b/1.0.0")], &[], false);
        table.update(prefix, &[id("r/c/1.0.0")], &[id("r/a/1.0.0")], false);

        let deps = table.dependencies_of(prefix).unwrap();
        assert_eq!(deps.len(), 2);
        assert!(!table.is_referenced(&id("r/a/1.0.0")));
        assert!(table.is_referenced(&id("r/c/1.0.0")));
    }

    #[test]
    fn prune_replaces_the_prefix_set() {
        let mut table = ConnectionTable::default();
        let prefix = Path::new("/work/app");
        table.update(prefix, &[id("r/a/1.0.0"), id("r/b/1.0.0")], &[], false);
        table.update(prefix, &[id("r/b/1.0.0")], &[], true);

        assert_eq!(table.package_ids(), BTreeSet::from([id("r/b/1.0.0")]));
    }

    #[test]
    fn emptied_prefix_disappears() {
        let mut table = ConnectionTable::default();
        let prefix = Path::new("/work/app");
        table.update(prefix, &[id("r/a/1.0.0")], &[], false);
        table.update(prefix, &[], &[id("r/a/1.0.0")], false);
        assert_eq!(table, ConnectionTable::default());
    }

    #[test]
    fn saved_table_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.json");
        let mut table = ConnectionTable::default();
        table.update(Path::new("/work/app"), &[id("r/a/1.0.0")], &[], false);
        table.update(Path::new("/work/lib"), &[id("r/a/1.0.0")], &[], false);

        table.save(&path).unwrap();
        let loaded = ConnectionTable::load(&path).unwrap();

        assert_eq!(loaded, table);
        assert_eq!(
            loaded.usages(&id("r/a/1.0.0")),
            vec![PathBuf::from("/work/app"), PathBuf::from("/work/lib")]
        );
    }

    #[test]
    fn missing_file_is_empty_and_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.json");
        assert_eq!(ConnectionTable::load(&path).unwrap(), ConnectionTable::default());

        fs::write(&path, "[1, 2").unwrap();
        assert!(matches!(
            ConnectionTable::load(&path),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
