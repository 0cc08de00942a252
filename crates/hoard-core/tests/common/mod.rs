//! Shared fixtures for store controller tests: an in-memory registry that
//! answers both resolution and transport.

#![allow(dead_code)]

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use hoard_core::options::Registries;
use hoard_core::{
    FetchError, RequestOptions, ResolutionError, ResolveContext, ResolveResult, Resolver,
    StoreController, StoreLayout, Transport,
};
use hoard_schema::{
    Integrity, IntegrityAlgorithm, LocalPackages, PackageId, PreferredVersions, Resolution,
    WantedDependency,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const HOST: &str = "registry.test";

/// Build a registry tarball for `name@version`.
pub fn package_tarball(name: &str, version: &str) -> Vec<u8> {
    let manifest = format!(r#"{{"name":"{name}","version":"{version}"}}"#);
    let files = [
        ("package/package.json", manifest.as_str()),
        ("package/index.js", "module.exports = 'pad';\n"),
        ("package/lib/util.js", "exports.noop = () => {};\n"),
    ];

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .expect("Failed to append tar entry");
    }
    builder
        .into_inner()
        .expect("Failed to finish tar")
        .finish()
        .expect("Failed to finish gzip")
}

pub fn tarball_url(name: &str, version: &str) -> String {
    format!("https://{HOST}/{name}/-/{name}-{version}.tgz")
}

struct Published {
    name: String,
    version: String,
    integrity: Integrity,
}

/// A registry living in memory. Resolves by highest satisfying version and
/// serves the archives it published.
#[derive(Default)]
pub struct MemoryRegistry {
    packages: Mutex<Vec<Published>>,
    archives: Mutex<HashMap<String, Vec<u8>>>,
    resolves: AtomicUsize,
    downloads: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl MemoryRegistry {
    /// Publish `name@version` with its real integrity.
    pub fn publish(&self, name: &str, version: &str) {
        let bytes = package_tarball(name, version);
        let integrity = Integrity::compute(IntegrityAlgorithm::Sha512, &bytes);
        self.publish_with(name, version, bytes, integrity);
    }

    /// Publish `name@version` claiming an integrity the archive won't match.
    pub fn publish_tampered(&self, name: &str, version: &str) {
        let bytes = package_tarball(name, version);
        let integrity = Integrity::compute(IntegrityAlgorithm::Sha512, b"something else");
        self.publish_with(name, version, bytes, integrity);
    }

    fn publish_with(&self, name: &str, version: &str, bytes: Vec<u8>, integrity: Integrity) {
        self.archives
            .lock()
            .unwrap()
            .insert(tarball_url(name, version), bytes);
        self.packages.lock().unwrap().push(Published {
            name: name.to_string(),
            version: version.to_string(),
            integrity,
        });
    }

    /// Slow every download down by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn resolution(&self, name: &str, version: &str) -> Resolution {
        let integrity = self
            .packages
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.name == name && p.version == version)
            .map(|p| p.integrity.clone());
        Resolution::Registry {
            tarball: tarball_url(name, version),
            integrity,
        }
    }
}

pub fn package_id(name: &str, version: &str) -> PackageId {
    PackageId::registry(HOST, name, version)
}

#[async_trait]
impl Resolver for MemoryRegistry {
    async fn resolve(
        &self,
        wanted: &WantedDependency,
        _ctx: &ResolveContext<'_>,
    ) -> Result<ResolveResult, ResolutionError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);

        let best = {
            let packages = self.packages.lock().unwrap();
            packages
                .iter()
                .filter(|p| p.name == wanted.name.as_str())
                .filter(|p| wanted.selector.is_tag() || wanted.selector.is_satisfied_by(&p.version))
                .filter_map(|p| semver::Version::parse(&p.version).ok())
                .max()
                .map(|v| v.to_string())
        };
        let version = best.ok_or_else(|| ResolutionError::NoMatch {
            name: wanted.name.to_string(),
            selector: wanted.selector.to_string(),
        })?;

        let latest = {
            let packages = self.packages.lock().unwrap();
            packages
                .iter()
                .filter(|p| p.name == wanted.name.as_str())
                .filter_map(|p| semver::Version::parse(&p.version).ok())
                .max()
                .map(|v| v.to_string())
        };

        Ok(ResolveResult {
            id: package_id(wanted.name.as_str(), &version),
            resolution: self.resolution(wanted.name.as_str(), &version),
            manifest: None,
            latest,
            normalized_pref: wanted.selector.spec().map(str::to_string),
            resolved_via: Some("npm-registry".to_string()),
        })
    }
}

#[async_trait]
impl Transport for MemoryRegistry {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let bytes = self
            .archives
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Transport(format!("404 {url}")))?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }
}

/// A store, a project directory and a registry.
pub struct TestContext {
    pub temp_dir: TempDir,
    pub registry: Arc<MemoryRegistry>,
    pub controller: Arc<StoreController>,
    pub registries: Registries,
    pub local_packages: LocalPackages,
    pub preferred_versions: PreferredVersions,
}

impl TestContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let registry = Arc::new(MemoryRegistry::default());
        let controller = Arc::new(open_controller(temp_dir.path(), &registry));
        std::fs::create_dir_all(temp_dir.path().join("project"))
            .expect("Failed to create project dir");

        Self {
            temp_dir,
            registry,
            controller,
            registries: Registries::default(),
            local_packages: LocalPackages::new(),
            preferred_versions: PreferredVersions::new(),
        }
    }

    pub fn store_dir(&self) -> PathBuf {
        self.temp_dir.path().join("store")
    }

    pub fn project_dir(&self) -> PathBuf {
        self.temp_dir.path().join("project")
    }

    /// A second controller over the same store, as a new process would open.
    pub fn reopen(&self) -> StoreController {
        open_controller(self.temp_dir.path(), &self.registry)
    }

    pub fn request_options(&self) -> RequestOptions<'_> {
        RequestOptions {
            current_package_id: None,
            current_resolution: None,
            default_tag: hoard_schema::DEFAULT_TAG,
            download_priority: 0,
            lockfile_directory: self.temp_dir.path(),
            local_packages: &self.local_packages,
            prefix: self.temp_dir.path(),
            preferred_versions: &self.preferred_versions,
            registries: &self.registries,
            side_effects_cache: false,
            skip_fetch: false,
            update: false,
            force: false,
            target_engine: None,
        }
    }
}

fn open_controller(root: &Path, registry: &Arc<MemoryRegistry>) -> StoreController {
    StoreController::new(
        StoreLayout::new(root.join("store")),
        Arc::clone(registry) as Arc<dyn Resolver>,
        Arc::clone(registry) as Arc<dyn Transport>,
        true,
    )
    .expect("Failed to open store")
}
