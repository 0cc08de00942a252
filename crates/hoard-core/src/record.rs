//! The completion record of a store entry.
//!
//! `integrity.json` is the last thing a transfer writes. An entry without a
//! readable record is treated as absent no matter what else is on disk, which
//! is what makes a crash between files-ready and finishing harmless.

use hoard_schema::{Blake3Hash, PackageId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Size and fingerprint of one stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Length in bytes.
    pub size: u64,
    /// BLAKE3 of the content.
    pub blake3: Blake3Hash,
}

/// Everything needed to trust a store entry without re-downloading it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityRecord {
    /// Identity the entry was fetched for.
    pub package_id: PackageId,
    /// Per-file records keyed by `/`-separated relative path.
    pub files: BTreeMap<String, FileRecord>,
}

impl IntegrityRecord {
    /// Fingerprint every listed file under `content_dir`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a listed file cannot be read.
    pub fn compute(
        package_id: &PackageId,
        content_dir: &Path,
        filenames: &[String],
    ) -> io::Result<Self> {
        let mut files = BTreeMap::new();
        for name in filenames {
            let path = content_dir.join(name);
            let size = fs::metadata(&path)?.len();
            let blake3 = Blake3Hash::compute_file(&path)?;
            files.insert(name.clone(), FileRecord { size, blake3 });
        }
        Ok(Self {
            package_id: package_id.clone(),
            files,
        })
    }

    /// Read the record at `path`. Missing or unparsable records read as `None`.
    pub fn load(path: &Path) -> Option<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Ignoring corrupt record {}: {e}", path.display());
                None
            }
        }
    }

    /// Atomically write the record to `path` and flush it to disk.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the write, sync or rename fails.
    pub fn persist(&self, path: &Path) -> io::Result<()> {
        let content = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;
        let temp_path = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&content)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, path)
    }

    /// Whether every recorded file under `content_dir` still matches.
    pub fn verify(&self, content_dir: &Path) -> bool {
        self.files.iter().all(|(name, expected)| {
            let path = content_dir.join(name);
            let size_ok = fs::metadata(&path).is_ok_and(|m| m.len() == expected.size);
            size_ok && Blake3Hash::compute_file(&path).is_ok_and(|h| h == expected.blake3)
        })
    }

    /// Recorded filenames, sorted.
    pub fn filenames(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }
}
