//! Store walks: pruning unreferenced entries and reverse-usage search.

use hoard_schema::{PackageId, PackageUsages, PackageUsagesBySearchQueries, VersionSelector};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::table::ConnectionTable;
use crate::error::StoreError;
use crate::paths::StoreLayout;
use crate::record::IntegrityRecord;

/// What a prune pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Entries deleted from the store.
    pub removed: Vec<PackageId>,
    /// Entries kept because a prefix depends on them or they are being written.
    pub kept: usize,
}

/// A completed store entry found on disk.
#[derive(Debug, Clone)]
pub(crate) struct StoredEntry {
    pub dir: PathBuf,
    pub package_id: PackageId,
}

/// Every entry with a readable completion record.
pub(crate) fn stored_entries(layout: &StoreLayout) -> Vec<StoredEntry> {
    let root = layout.root();
    let skip = [layout.tmp_dir(), layout.locks_dir()];
    let mut entries = Vec::new();

    let mut walker = WalkDir::new(root).min_depth(1).into_iter();
    while let Some(item) = walker.next() {
        let Ok(item) = item else { continue };
        if !item.file_type().is_dir() {
            continue;
        }
        if skip.iter().any(|s| s == item.path()) {
            walker.skip_current_dir();
            continue;
        }
        let record_path = StoreLayout::integrity_path(item.path());
        if !record_path.is_file() {
            continue;
        }
        if let Some(record) = IntegrityRecord::load(&record_path) {
            entries.push(StoredEntry {
                dir: item.path().to_path_buf(),
                package_id: record.package_id,
            });
        }
        // Nothing below an entry is another entry.
        walker.skip_current_dir();
    }
    entries
}

/// Delete entries no prefix depends on. Entries in `in_flight` are spared.
pub(crate) fn prune_entries(
    layout: &StoreLayout,
    table: &ConnectionTable,
    in_flight: &[PathBuf],
) -> Result<PruneReport, StoreError> {
    let mut report = PruneReport::default();
    let in_flight: HashSet<&Path> = in_flight.iter().map(PathBuf::as_path).collect();

    for entry in stored_entries(layout) {
        if table.is_referenced(&entry.package_id) || in_flight.contains(entry.dir.as_path()) {
            report.kept += 1;
            continue;
        }
        tracing::info!("Pruning {}", entry.package_id);
        fs::remove_dir_all(&entry.dir).map_err(|e| StoreError::io(&entry.dir, e))?;
        remove_empty_parents(layout.root(), &entry.dir);
        report.removed.push(entry.package_id);
    }

    tracing::debug!(
        "Prune removed {} entries, kept {}",
        report.removed.len(),
        report.kept
    );
    Ok(report)
}

fn remove_empty_parents(root: &Path, dir: &Path) {
    let mut current = dir.parent();
    while let Some(parent) = current {
        if parent == root || !parent.starts_with(root) {
            break;
        }
        // Fails once the directory still has content.
        if fs::remove_dir(parent).is_err() {
            break;
        }
        current = parent.parent();
    }
}

/// Answer each query with the matching package ids and their prefixes.
///
/// A query is an exact package id, a bare name, or `name@selector`.
pub(crate) fn search_usages(
    layout: &StoreLayout,
    table: &ConnectionTable,
    queries: &[String],
) -> Result<PackageUsagesBySearchQueries, StoreError> {
    let mut known: BTreeSet<PackageId> = table.package_ids();
    known.extend(stored_entries(layout).into_iter().map(|e| e.package_id));

    let mut results = PackageUsagesBySearchQueries::new();
    for query in queries {
        let matches = known
            .iter()
            .filter(|id| query_matches(query, id))
            .map(|id| PackageUsages {
                package_id: id.clone(),
                usages: table.usages(id),
            })
            .collect();
        results.insert(query.clone(), matches);
    }
    Ok(results)
}

fn query_matches(query: &str, id: &PackageId) -> bool {
    if id.as_str() == query {
        return true;
    }
    let (Some(name), Some(version)) = (id.name(), id.version()) else {
        return false;
    };
    // The scope's leading '@' is not a separator.
    match query.rfind('@').filter(|&i| i > 0) {
        Some(at) => {
            let (query_name, selector) = (&query[..at], &query[at + 1..]);
            query_name == name && VersionSelector::parse(selector).is_satisfied_by(version)
        }
        None => query == name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(layout: &StoreLayout, id: &str) -> PathBuf {
        let id = PackageId::new(id);
        let entry = layout.entry_dir(&id);
        let content = StoreLayout::content_dir(&entry);
        fs::create_dir_all(&content).unwrap();
        fs::write(content.join("package.json"), "{}").unwrap();
        IntegrityRecord::compute(&id, &content, &["package.json".to_string()])
            .unwrap()
            .persist(&StoreLayout::integrity_path(&entry))
            .unwrap();
        entry
    }

    #[test]
    fn finds_completed_entries_only() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        stored(&layout, "registry.example/a/1.0.0");
        stored(&layout, "registry.example/@scope/b/2.0.0");
        fs::create_dir_all(dir.path().join("registry.example/partial/1.0.0/package")).unwrap();

        let mut ids: Vec<_> = stored_entries(&layout)
            .into_iter()
            .map(|e| e.package_id.to_string())
            .collect();
        ids.sort();
        assert_eq!(
            ids,
            vec![
                "registry.example/@scope/b/2.0.0",
                "registry.example/a/1.0.0"
            ]
        );
    }

    #[test]
    fn prune_spares_referenced_and_in_flight_entries() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        stored(&layout, "registry.example/a/1.0.0");
        let orphan = stored(&layout, "registry.example/b/1.0.0");
        let writing = stored(&layout, "registry.example/c/1.0.0");

        let mut table = ConnectionTable::default();
        table.update(
            Path::new("/work/app"),
            &[PackageId::new("registry.example/a/1.0.0")],
            &[],
            false,
        );

        let in_flight = [
            layout.tmp_dir().join("fetch-1"),
            writing.clone(),
            dir.path().join("registry.example/z/9.9.9"),
        ];
        let report = prune_entries(&layout, &table, &in_flight).unwrap();

        assert_eq!(report.removed, vec![PackageId::new("registry.example/b/1.0.0")]);
        assert_eq!(report.kept, 2);
        assert!(!orphan.exists());
        assert!(!dir.path().join("registry.example/b").exists());
        assert!(writing.exists());
        assert!(dir.path().join("registry.example/a/1.0.0").exists());
    }

    #[test]
    fn queries_match_ids_names_and_ranges() {
        let a = PackageId::new("registry.example/left-pad/1.3.0");
        let scoped = PackageId::new("registry.example/@types/node/20.1.0");

        assert!(query_matches("registry.example/left-pad/1.3.0", &a));
        assert!(query_matches("left-pad", &a));
        assert!(query_matches("left-pad@^1.0.0", &a));
        assert!(!query_matches("left-pad@2", &a));
        assert!(query_matches("@types/node", &scoped));
        assert!(query_matches("@types/node@20", &scoped));
        assert!(!query_matches("node", &scoped));
    }
}
