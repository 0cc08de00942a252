//! Store locations and the on-disk layout of a store entry.
//!
//! ```text
//! <store>/
//! ├── registry.npmjs.org/left-pad/1.3.0/   # one entry per package id
//! │   ├── package/                         # pristine extracted files
//! │   ├── integrity.json                   # written last; marks the entry durable
//! │   └── side_effects/<engine>/package/   # built output per target engine
//! ├── connections.json                     # prefix -> package ids
//! ├── tmp/                                 # staging, same volume as entries
//! └── _locks/
//! ```

use dirs::home_dir;
use hoard_schema::PackageId;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::path::{Component, Path, PathBuf};

/// Returns the default store directory, or None if the user's home cannot be resolved.
///
/// `HOARD_STORE_DIR` overrides the default `~/.hoard-store`.
pub fn try_default_store_path() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("HOARD_STORE_DIR") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".hoard-store"))
}

/// Path helpers for one store root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    /// Wrap a store root. Nothing is created on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything the store knows about `id`.
    ///
    /// This is the `inStoreLocation` handed out before any transfer starts,
    /// so it must be a pure function of the id.
    pub fn entry_dir(&self, id: &PackageId) -> PathBuf {
        let mut dir = self.root.clone();
        if id.is_local() {
            dir.push("local");
            dir.push(encode_segment(id.as_str()));
            return dir;
        }
        for segment in id.as_str().split('/') {
            dir.push(encode_segment(segment));
        }
        dir
    }

    /// Pristine package files inside an entry.
    pub fn content_dir(entry: &Path) -> PathBuf {
        entry.join("package")
    }

    /// Completion record inside an entry.
    pub fn integrity_path(entry: &Path) -> PathBuf {
        entry.join("integrity.json")
    }

    /// Root of all side-effects builds inside an entry.
    pub fn side_effects_root(entry: &Path) -> PathBuf {
        entry.join("side_effects")
    }

    /// Built output for one target engine inside an entry.
    pub fn side_effects_dir(entry: &Path, engine: &str) -> PathBuf {
        Self::side_effects_root(entry)
            .join(encode_segment(engine))
            .join("package")
    }

    /// Staging area; on the same volume as the entries so renames are atomic.
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Persisted connection table.
    pub fn connections_path(&self) -> PathBuf {
        self.root.join("connections.json")
    }

    /// Default location for store-level lock files.
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("_locks")
    }
}

/// Bytes that cannot appear in a path component on some platform, plus `%`
/// itself so that decoding stays unambiguous.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b'%')
    .add(b'/')
    .add(b'\\')
    .add(b':')
    .add(b'*')
    .add(b'?')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'|');

/// Encode one id segment as a single path component.
///
/// The mapping is injective: distinct segments never share a directory.
/// A bare `%` never comes out of the encoder, so it stands for the empty
/// segment.
fn encode_segment(segment: &str) -> String {
    match segment {
        "" => "%".to_string(),
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        s => utf8_percent_encode(s, SEGMENT).to_string(),
    }
}

/// Path of `target` relative to `base`, using `..` where they diverge.
///
/// Both paths are taken as written; neither is canonicalized.
pub fn relative_to(base: &Path, target: &Path) -> PathBuf {
    let base: Vec<_> = base.components().collect();
    let target: Vec<_> = target.components().collect();
    let common = base
        .iter()
        .zip(&target)
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base.len() {
        relative.push("..");
    }
    for component in &target[common..] {
        relative.push(component);
    }
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    relative
}

/// Whether a relative path stays inside the directory it is joined to.
pub fn is_contained(relative: &Path) -> bool {
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
