//! Package identity and the records exchanged with the store.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::hash::Integrity;
use crate::selector::VersionSelector;

/// A package name as published to a registry (e.g. `left-pad`, `@types/node`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    /// Create a new package name.
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_string())
    }

    /// Return the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for PackageName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for PackageName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PackageName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

/// Stable identifier pinning exact resolved content.
///
/// Registry ids look like `registry.npmjs.org/left-pad/1.3.0`; directory
/// dependencies use `link:<relative path>`. The id is the store key: two
/// requests with the same id always share the same store entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    /// Wrap an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build a registry id from its parts.
    pub fn registry(host: &str, name: &str, version: &str) -> Self {
        Self(format!("{}/{name}/{version}", host.trim_end_matches('/')))
    }

    /// Build a directory id (`link:<path>`).
    pub fn local(path: &std::path::Path) -> Self {
        Self(format!("link:{}", path.display()))
    }

    /// Return the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id points at a directory rather than registry content.
    pub fn is_local(&self) -> bool {
        self.0.starts_with("link:") || self.0.starts_with("file:")
    }

    /// Package name encoded in a registry id.
    pub fn name(&self) -> Option<&str> {
        self.split_name_version().map(|(name, _)| name)
    }

    /// Version encoded in a registry id.
    pub fn version(&self) -> Option<&str> {
        self.split_name_version().map(|(_, version)| version)
    }

    fn split_name_version(&self) -> Option<(&str, &str)> {
        if self.is_local() {
            return None;
        }
        let (head, version) = self.0.rsplit_once('/')?;
        let base_start = head.rfind('/').map_or(0, |i| i + 1);
        let name_start = if base_start == 0 {
            0
        } else {
            // Scoped names span two segments: `@scope/name`.
            let before = &head[..base_start - 1];
            let scope_start = before.rfind('/').map_or(0, |i| i + 1);
            if before[scope_start..].starts_with('@') {
                scope_start
            } else {
                base_start
            }
        };
        let name = &head[name_start..];
        if name.is_empty() || version.is_empty() {
            return None;
        }
        Some((name, version))
    }
}

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PackageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PackageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PackageId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// One dependency edge as declared by a consumer: a name plus what it asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WantedDependency {
    /// Name of the dependency.
    pub name: PackageName,
    /// Version, range, tag, or local path.
    pub selector: VersionSelector,
}

impl WantedDependency {
    /// Create a wanted dependency from a name and a raw selector.
    pub fn new(name: &str, selector: &str) -> Self {
        Self {
            name: PackageName::new(name),
            selector: VersionSelector::parse(selector),
        }
    }
}

impl std::fmt::Display for WantedDependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.selector)
    }
}

/// Where resolved content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Resolution {
    /// A registry tarball.
    Registry {
        /// Download URL of the archive.
        tarball: String,
        /// Expected archive integrity, when the registry published one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        integrity: Option<Integrity>,
    },
    /// A directory on the local filesystem.
    Directory {
        /// Absolute path of the directory.
        directory: PathBuf,
    },
}

impl Resolution {
    /// Whether this resolution points at a local directory.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }
}

/// The subset of a package manifest (`package.json`) the store reads.
///
/// Unknown fields are preserved in `extra` so a manifest read from a tarball
/// can be handed to the installer without loss.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Package name.
    #[serde(default)]
    pub name: String,
    /// Package version.
    #[serde(default)]
    pub version: String,
    /// Runtime dependencies.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    /// Optional dependencies.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, String>,
    /// Lifecycle scripts.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scripts: BTreeMap<String, String>,
    /// Every other field, untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Manifest {
    /// Parse a manifest from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the bytes are not a JSON object
    /// with string-valued dependency tables.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Whether the package declares a native build step.
    pub fn requires_build(&self) -> bool {
        ["preinstall", "install", "postinstall"]
            .iter()
            .any(|s| self.scripts.contains_key(*s))
    }
}

/// How a preferred version was expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferredKind {
    /// An exact version.
    Version,
    /// A range.
    Range,
    /// A dist-tag.
    Tag,
}

/// A version the resolver should favour when several would satisfy a range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredVersion {
    /// The preferred version, range, or tag.
    pub selector: String,
    /// Which of the three `selector` is.
    #[serde(rename = "type")]
    pub kind: PreferredKind,
}

/// Preferred versions keyed by package name.
pub type PreferredVersions = BTreeMap<PackageName, PreferredVersion>;

/// A package available from the local workspace instead of a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalPackage {
    /// Directory holding the package.
    pub directory: PathBuf,
    /// Its manifest.
    pub manifest: Manifest,
}

/// Workspace packages keyed by name, then by version.
pub type LocalPackages = BTreeMap<PackageName, BTreeMap<String, LocalPackage>>;

/// The outcome of a fetch once the package files are in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageFilesResponse {
    /// `true` when the content was already in the store (no transfer).
    pub from_store: bool,
    /// Relative paths of every file in the package, `/`-separated and sorted.
    pub filenames: Vec<String>,
}

/// One package and the projects that depend on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageUsages {
    /// The package.
    pub package_id: PackageId,
    /// Project prefixes with a recorded connection to it.
    pub usages: Vec<PathBuf>,
}

/// Reverse usages keyed by the search query that produced them.
pub type PackageUsagesBySearchQueries = BTreeMap<String, Vec<PackageUsages>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_id_exposes_name_and_version() {
        let id = PackageId::registry("registry.npmjs.org", "left-pad", "1.3.0");
        assert_eq!(id.as_str(), "registry.npmjs.org/left-pad/1.3.0");
        assert_eq!(id.name(), Some("left-pad"));
        assert_eq!(id.version(), Some("1.3.0"));
    }

    #[test]
    fn scoped_id_keeps_scope_in_name() {
        let id = PackageId::new("registry.npmjs.org/@types/node/20.1.0");
        assert_eq!(id.name(), Some("@types/node"));
        assert_eq!(id.version(), Some("20.1.0"));
    }

    #[test]
    fn short_ids_are_understood() {
        let id = PackageId::new("/is-odd/3.0.1");
        assert_eq!(id.name(), Some("is-odd"));
        assert_eq!(id.version(), Some("3.0.1"));
    }

    #[test]
    fn local_ids_have_no_name() {
        let id = PackageId::local(std::path::Path::new("../utils"));
        assert!(id.is_local());
        assert_eq!(id.name(), None);
    }

    #[test]
    fn manifest_keeps_unknown_fields() {
        let m = Manifest::from_json(
            br#"{"name":"a","version":"1.0.0","main":"index.js","scripts":{"install":"node-gyp rebuild"}}"#,
        )
        .unwrap();
        assert_eq!(m.extra.get("main"), Some(&serde_json::json!("index.js")));
        assert!(m.requires_build());
    }

    #[test]
    fn resolution_serializes_with_type_tag() {
        let r = Resolution::Directory {
            directory: PathBuf::from("/work/pkg"),
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["type"], "directory");
    }
}
