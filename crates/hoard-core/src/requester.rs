//! Package request pipeline.
//!
//! Turns a wanted dependency into a [`PackageResponse`]: a workspace package
//! when one matches, the current lockfile identity when it still satisfies
//! the selector, or a fresh resolution chained into the fetch engine.

use hoard_schema::{
    LocalPackage, LocalPackages, Manifest, PackageId, PreferredVersions, Resolution,
    VersionSelector, WantedDependency,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::ResolutionError;
use crate::fetch::{FetchEngine, FetchOptions, Signal, read_manifest};
use crate::options::{Registries, StrictInstallOptions};
use crate::paths::{StoreLayout, relative_to};
use crate::resolver::{ResolveContext, ResolveResult, Resolver};
use crate::store::cache_by_engine;

const LOCAL_RESOLVER: &str = "local-filesystem";

/// Per-request inputs.
#[derive(Debug, Clone, Copy)]
pub struct RequestOptions<'a> {
    /// Identity recorded in the lockfile for this dependency, if any.
    pub current_package_id: Option<&'a PackageId>,
    /// Resolution recorded in the lockfile for this dependency, if any.
    pub current_resolution: Option<&'a Resolution>,
    /// Dist-tag meaning "newest".
    pub default_tag: &'a str,
    /// Scheduling hint for the transfer. Lower runs sooner.
    pub download_priority: i32,
    /// Directory holding the lockfile; local paths are relative to it.
    pub lockfile_directory: &'a Path,
    /// Workspace packages that take precedence over the registry.
    pub local_packages: &'a LocalPackages,
    /// Project being installed.
    pub prefix: &'a Path,
    /// Versions already chosen elsewhere in the graph.
    pub preferred_versions: &'a PreferredVersions,
    /// Registry URLs by scope.
    pub registries: &'a Registries,
    /// Report uploaded builds in `cache_by_engine`.
    pub side_effects_cache: bool,
    /// Resolve only; leave fetching to the caller.
    pub skip_fetch: bool,
    /// Re-resolve even when the current identity still satisfies the selector.
    pub update: bool,
    /// Re-resolve and re-fetch regardless of what the store holds.
    pub force: bool,
    /// Engine the package will be built for.
    pub target_engine: Option<&'a str>,
}

impl<'a> RequestOptions<'a> {
    /// Options for a plain install run: no lockfile identity, nothing forced
    /// beyond what the install options say.
    pub fn from_install_options(options: &'a StrictInstallOptions) -> Self {
        Self {
            current_package_id: None,
            current_resolution: None,
            default_tag: &options.tag,
            download_priority: 0,
            lockfile_directory: &options.lockfile_directory,
            local_packages: &options.local_packages,
            prefix: &options.prefix,
            preferred_versions: &NO_PREFERENCES,
            registries: &options.registries,
            side_effects_cache: options.side_effects_cache_read,
            skip_fetch: false,
            update: options.update,
            force: options.force,
            target_engine: None,
        }
    }
}

static NO_PREFERENCES: PreferredVersions = PreferredVersions::new();

/// A package's manifest, either in hand or on its way.
#[derive(Debug, Clone)]
pub enum ManifestState {
    /// Already known.
    Ready(Manifest),
    /// Settles once the manifest has been read from the archive or the store.
    Pending(Signal<Manifest>),
}

impl ManifestState {
    /// Wait for the manifest.
    ///
    /// # Errors
    ///
    /// Fails with the fetch error that prevented reading it.
    pub async fn manifest(&self) -> crate::fetch::SignalResult<Manifest> {
        match self {
            Self::Ready(manifest) => Ok(manifest.clone()),
            Self::Pending(signal) => signal.wait().await,
        }
    }
}

/// Progress of the fetch a response chained into.
#[derive(Debug, Clone)]
pub struct FetchProgress {
    /// Store directory of the package. Known immediately.
    pub in_store_location: PathBuf,
    /// Settles with the package files.
    pub files: Signal<hoard_schema::PackageFilesResponse>,
    /// Settles once the store entry is durable.
    pub finishing: Signal<()>,
}

/// A dependency satisfied by a directory on disk.
#[derive(Debug, Clone)]
pub struct LocalPackageResponse {
    pub id: PackageId,
    pub resolution: Resolution,
    pub manifest: Manifest,
    pub normalized_pref: Option<String>,
    pub updated: bool,
    pub resolved_via: String,
}

/// A dependency satisfied from a registry.
#[derive(Debug, Clone)]
pub struct RegistryPackageResponse {
    pub id: PackageId,
    pub resolution: Resolution,
    /// Whether `id` differs from the identity the lockfile recorded.
    pub updated: bool,
    /// Newest version under the default tag. Reporting only.
    pub latest: Option<String>,
    pub resolved_via: Option<String>,
    pub normalized_pref: Option<String>,
    pub manifest: ManifestState,
    /// Uploaded builds by engine.
    pub cache_by_engine: BTreeMap<String, PathBuf>,
    /// `None` when nothing was fetched (skip-fetch or an unchanged identity).
    pub fetch: Option<FetchProgress>,
}

/// What [`PackageRequester::request_package`] hands back.
#[derive(Debug, Clone)]
pub enum PackageResponse {
    Local(LocalPackageResponse),
    Registry(RegistryPackageResponse),
}

impl PackageResponse {
    /// Identity of the package either way.
    pub fn id(&self) -> &PackageId {
        match self {
            Self::Local(r) => &r.id,
            Self::Registry(r) => &r.id,
        }
    }

    /// Whether the identity changed from the lockfile's.
    pub fn updated(&self) -> bool {
        match self {
            Self::Local(r) => r.updated,
            Self::Registry(r) => r.updated,
        }
    }
}

/// Resolves wanted dependencies and starts the fetches they need.
pub struct PackageRequester {
    resolver: Arc<dyn Resolver>,
    fetcher: Arc<FetchEngine>,
}

impl std::fmt::Debug for PackageRequester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageRequester")
            .field("fetcher", &self.fetcher)
            .finish_non_exhaustive()
    }
}

impl PackageRequester {
    /// Create a requester resolving through `resolver` and fetching through `fetcher`.
    pub fn new(resolver: Arc<dyn Resolver>, fetcher: Arc<FetchEngine>) -> Self {
        Self { resolver, fetcher }
    }

    /// Request one package.
    ///
    /// A workspace match returns before the first suspension point.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolutionError`] if the dependency cannot be resolved.
    /// Fetch failures surface later, through the response's signals.
    pub async fn request_package(
        &self,
        wanted: &WantedDependency,
        opts: RequestOptions<'_>,
    ) -> Result<PackageResponse, ResolutionError> {
        if let Some(local) = match_local_package(wanted, opts) {
            tracing::debug!("{wanted} satisfied by workspace package {}", local.id);
            return Ok(PackageResponse::Local(local));
        }

        if let VersionSelector::Local(path) = &wanted.selector {
            return local_directory(wanted, path, opts).await.map(PackageResponse::Local);
        }

        if let Some(current) = self.unchanged_identity(wanted, opts) {
            tracing::debug!("{wanted} still satisfied by {}", current.id);
            return Ok(PackageResponse::Registry(current));
        }

        let ctx = ResolveContext {
            default_tag: opts.default_tag,
            registry: opts.registries.registry_for(wanted.name.as_str()),
            preferred_versions: opts.preferred_versions,
            prefix: opts.prefix,
            lockfile_directory: opts.lockfile_directory,
        };
        let resolved = self.resolver.resolve(wanted, &ctx).await?;
        let updated = opts.current_package_id != Some(&resolved.id);

        if let Resolution::Directory { directory } = &resolved.resolution {
            let manifest = match resolved.manifest.clone() {
                Some(manifest) => manifest,
                None => read_local_manifest(directory).await?,
            };
            return Ok(PackageResponse::Local(LocalPackageResponse {
                resolution: resolved.resolution.clone(),
                manifest,
                normalized_pref: resolved.normalized_pref.clone(),
                updated,
                resolved_via: resolved
                    .resolved_via
                    .clone()
                    .unwrap_or_else(|| LOCAL_RESOLVER.to_string()),
                id: resolved.id,
            }));
        }

        Ok(PackageResponse::Registry(
            self.chain_fetch(resolved, updated, opts),
        ))
    }

    /// The lockfile's identity, when it still satisfies `wanted` and nothing
    /// asks for a fresh resolution.
    fn unchanged_identity(
        &self,
        wanted: &WantedDependency,
        opts: RequestOptions<'_>,
    ) -> Option<RegistryPackageResponse> {
        if opts.update || opts.force {
            return None;
        }
        let id = opts.current_package_id?;
        let resolution = opts.current_resolution?;
        if resolution.is_local() || !wanted.selector.is_satisfied_by(id.version()?) {
            return None;
        }
        Some(RegistryPackageResponse {
            id: id.clone(),
            resolution: resolution.clone(),
            updated: false,
            latest: None,
            resolved_via: None,
            normalized_pref: None,
            manifest: stored_manifest(self.fetcher.layout(), id),
            cache_by_engine: self.builds(id, opts),
            fetch: None,
        })
    }

    fn builds(&self, id: &PackageId, opts: RequestOptions<'_>) -> BTreeMap<String, PathBuf> {
        if opts.side_effects_cache {
            cache_by_engine(self.fetcher.layout(), id)
        } else {
            BTreeMap::new()
        }
    }

    fn chain_fetch(
        &self,
        resolved: ResolveResult,
        updated: bool,
        opts: RequestOptions<'_>,
    ) -> RegistryPackageResponse {
        let cache_by_engine = self.builds(&resolved.id, opts);

        let (manifest, fetch) = if opts.skip_fetch {
            let manifest = match resolved.manifest {
                Some(manifest) => ManifestState::Ready(manifest),
                None => stored_manifest(self.fetcher.layout(), &resolved.id),
            };
            (manifest, None)
        } else {
            tracing::trace!(
                "Fetching {} (priority {})",
                resolved.id,
                opts.download_priority
            );
            let handle = self.fetcher.fetch_package(FetchOptions {
                package_id: resolved.id.clone(),
                resolution: resolved.resolution.clone(),
                fetch_raw_manifest: resolved.manifest.is_none(),
                force: opts.force,
                target_engine: opts.target_engine.map(str::to_string),
            });
            let manifest = match (resolved.manifest, handle.manifest) {
                (Some(manifest), _) => ManifestState::Ready(manifest),
                (None, Some(signal)) => ManifestState::Pending(signal),
                (None, None) => stored_manifest(self.fetcher.layout(), &resolved.id),
            };
            let fetch = FetchProgress {
                in_store_location: handle.in_store_location,
                files: handle.files,
                finishing: handle.finishing,
            };
            (manifest, Some(fetch))
        };

        RegistryPackageResponse {
            id: resolved.id,
            resolution: resolved.resolution,
            updated,
            latest: resolved.latest,
            resolved_via: resolved.resolved_via,
            normalized_pref: resolved.normalized_pref,
            manifest,
            cache_by_engine,
            fetch,
        }
    }
}

/// Workspace package for `wanted`, if one matches.
fn match_local_package(
    wanted: &WantedDependency,
    opts: RequestOptions<'_>,
) -> Option<LocalPackageResponse> {
    let versions = opts.local_packages.get(wanted.name.as_str())?;
    let wants_newest = wanted
        .selector
        .spec()
        .is_some_and(|spec| spec == opts.default_tag);

    let (_, package) = versions
        .iter()
        .filter_map(|(version, package)| {
            let parsed = semver::Version::parse(version).ok()?;
            (wants_newest || wanted.selector.is_satisfied_by(version)).then_some((parsed, package))
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))?;

    Some(local_response(wanted, package, opts))
}

fn local_response(
    wanted: &WantedDependency,
    package: &LocalPackage,
    opts: RequestOptions<'_>,
) -> LocalPackageResponse {
    let id = PackageId::local(&relative_to(opts.lockfile_directory, &package.directory));
    LocalPackageResponse {
        updated: opts.current_package_id != Some(&id),
        id,
        resolution: Resolution::Directory {
            directory: package.directory.clone(),
        },
        manifest: package.manifest.clone(),
        normalized_pref: Some(wanted.selector.to_string()),
        resolved_via: LOCAL_RESOLVER.to_string(),
    }
}

/// A `file:`/`link:` dependency read straight from disk.
async fn local_directory(
    wanted: &WantedDependency,
    path: &Path,
    opts: RequestOptions<'_>,
) -> Result<LocalPackageResponse, ResolutionError> {
    let directory = opts.lockfile_directory.join(path);
    if !tokio::fs::metadata(&directory)
        .await
        .is_ok_and(|m| m.is_dir())
    {
        return Err(ResolutionError::MissingLocalPath(directory));
    }
    let manifest = read_local_manifest(&directory).await?;
    Ok(local_response(
        wanted,
        &LocalPackage {
            directory,
            manifest,
        },
        opts,
    ))
}

async fn read_local_manifest(directory: &Path) -> Result<Manifest, ResolutionError> {
    let path = directory.join("package.json");
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ResolutionError::Manifest {
            path: path.clone(),
            message: e.to_string(),
        })?;
    Manifest::from_json(&bytes).map_err(|e| ResolutionError::Manifest {
        path,
        message: e.to_string(),
    })
}

/// A manifest read lazily from the store entry of `id`.
fn stored_manifest(layout: &StoreLayout, id: &PackageId) -> ManifestState {
    let content_dir = StoreLayout::content_dir(&layout.entry_dir(id));
    let id = id.clone();
    ManifestState::Pending(Signal::from_future(async move {
        read_manifest(&content_dir, &id).await.map_err(Arc::new)
    }))
}
