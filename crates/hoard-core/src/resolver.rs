//! The resolver seam.
//!
//! Range resolution against a registry (packuments, dist-tags, semver
//! ranking) lives outside the store. The store only needs the answer.

use async_trait::async_trait;
use hoard_schema::{Manifest, PackageId, PreferredVersions, Resolution, WantedDependency};
use std::path::Path;

use crate::error::ResolutionError;

/// Everything a resolver may consult for one request.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    /// Dist-tag used when the selector is empty.
    pub default_tag: &'a str,
    /// Registry URL picked for this package name.
    pub registry: &'a str,
    /// Versions already chosen elsewhere in the graph.
    pub preferred_versions: &'a PreferredVersions,
    /// Project being installed.
    pub prefix: &'a Path,
    /// Directory holding the lockfile; local paths are relative to it.
    pub lockfile_directory: &'a Path,
}

/// A resolver's answer.
#[derive(Debug, Clone)]
pub struct ResolveResult {
    pub id: PackageId,
    pub resolution: Resolution,
    /// `None` when the manifest can only be read from the archive.
    pub manifest: Option<Manifest>,
    /// Highest version under the default tag, for outdated reporting only.
    pub latest: Option<String>,
    pub normalized_pref: Option<String>,
    /// Which resolver produced the answer (`npm-registry`, `local-filesystem`, ...).
    pub resolved_via: Option<String>,
}

/// Turns a wanted dependency into an exact package identity.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve one dependency. Implementations must not retry internally.
    async fn resolve(
        &self,
        wanted: &WantedDependency,
        ctx: &ResolveContext<'_>,
    ) -> Result<ResolveResult, ResolutionError>;
}
