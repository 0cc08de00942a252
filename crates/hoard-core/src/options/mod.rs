//! Install option normalization.
//!
//! Raw options come from a config file, the command line, or an embedding
//! installer, with any subset of fields set. [`resolve_install_options`]
//! fills every gap from defaults and host facts and validates the result;
//! the returned [`StrictInstallOptions`] is never mutated afterwards.

pub mod env;

use hoard_schema::{DEFAULT_TAG, LocalPackages};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
pub use env::{HostEnvironment, SystemEnvironment};

/// Name of the lockfile the installer writes.
pub const WANTED_LOCKFILE: &str = "hoard-lock.yaml";

/// Registry every unscoped package resolves against by default.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Leading token of user agents that name only the generic runtime client.
const GENERIC_USER_AGENT_PREFIX: &str = "npm/";

const DEFAULT_CHILD_CONCURRENCY: usize = 5;
const DEFAULT_LOCK_STALE_DURATION: Duration = Duration::from_secs(5 * 60);

/// Name and version of the tool driving the install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManager {
    pub name: String,
    pub version: String,
}

impl Default for PackageManager {
    fn default() -> Self {
        Self {
            name: "hoard".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Registry URLs: one default plus per-scope overrides (`@corp` -> URL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registries {
    pub default: String,
    #[serde(flatten)]
    pub scoped: BTreeMap<String, String>,
}

impl Default for Registries {
    fn default() -> Self {
        Self {
            default: DEFAULT_REGISTRY.to_string(),
            scoped: BTreeMap::new(),
        }
    }
}

impl Registries {
    /// Registry to use for a package name, honouring scope overrides.
    pub fn registry_for(&self, name: &str) -> &str {
        name.split_once('/')
            .filter(|(scope, _)| scope.starts_with('@'))
            .and_then(|(scope, _)| self.scoped.get(scope))
            .map_or(self.default.as_str(), String::as_str)
    }

    /// Give every registry URL exactly one trailing slash.
    pub fn normalized(self) -> Self {
        Self {
            default: normalize_registry_url(&self.default),
            scoped: self
                .scoped
                .into_iter()
                .map(|(scope, url)| (scope, normalize_registry_url(&url)))
                .collect(),
        }
    }
}

fn normalize_registry_url(url: &str) -> String {
    format!("{}/", url.trim().trim_end_matches('/'))
}

/// Which dependency groups the installer walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncludedDependencies {
    pub dependencies: bool,
    pub dev_dependencies: bool,
    pub optional_dependencies: bool,
}

impl Default for IncludedDependencies {
    fn default() -> Self {
        Self {
            dependencies: true,
            dev_dependencies: true,
            optional_dependencies: true,
        }
    }
}

/// Where lifecycle scripts of the project itself send their output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStdio {
    #[default]
    Inherit,
    Pipe,
}

/// Partial install options. `None` means "not set" and is filled by defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct InstallOptions {
    pub store: Option<PathBuf>,
    pub prefix: Option<PathBuf>,
    pub lockfile_directory: Option<PathBuf>,
    pub force_shared_lockfile: Option<bool>,
    pub frozen_lockfile: Option<bool>,
    pub prefer_frozen_lockfile: Option<bool>,
    pub shamefully_flatten: Option<bool>,
    pub lockfile: Option<bool>,
    pub lockfile_only: Option<bool>,
    pub force: Option<bool>,
    pub update: Option<bool>,
    pub depth: Option<i32>,
    pub repeat_install_depth: Option<i32>,
    pub engine_strict: Option<bool>,
    pub node_version: Option<String>,
    pub raw_config: Option<BTreeMap<String, String>>,
    pub package_manager: Option<PackageManager>,
    pub prune_lockfile_importers: Option<bool>,
    pub side_effects_cache_read: Option<bool>,
    pub side_effects_cache_write: Option<bool>,
    pub strict_peer_dependencies: Option<bool>,
    pub include: Option<IncludedDependencies>,
    pub independent_leaves: Option<bool>,
    pub ignore_current_prefs: Option<bool>,
    pub ignore_scripts: Option<bool>,
    pub child_concurrency: Option<usize>,
    pub user_agent: Option<String>,
    pub unsafe_perm: Option<bool>,
    pub registries: Option<Registries>,
    pub lock: Option<bool>,
    /// Milliseconds.
    pub lock_stale_duration: Option<u64>,
    pub tag: Option<String>,
    pub locks: Option<PathBuf>,
    pub own_lifecycle_hooks_stdio: Option<LifecycleStdio>,
    pub local_packages: Option<LocalPackages>,
    pub prune_store: Option<bool>,
    pub verify_store_integrity: Option<bool>,
}

impl InstallOptions {
    /// Parse options from TOML text.
    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load options from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }
}

/// Fully resolved install options. Every field has a value.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StrictInstallOptions {
    pub store: PathBuf,
    pub prefix: PathBuf,
    pub lockfile_directory: PathBuf,
    pub force_shared_lockfile: bool,
    pub frozen_lockfile: bool,
    pub prefer_frozen_lockfile: bool,
    pub shamefully_flatten: bool,
    pub lockfile: bool,
    pub lockfile_only: bool,
    pub force: bool,
    pub update: bool,
    pub depth: i32,
    pub repeat_install_depth: i32,
    pub engine_strict: bool,
    pub node_version: String,
    pub raw_config: BTreeMap<String, String>,
    pub package_manager: PackageManager,
    pub prune_lockfile_importers: bool,
    pub side_effects_cache_read: bool,
    pub side_effects_cache_write: bool,
    pub strict_peer_dependencies: bool,
    pub include: IncludedDependencies,
    pub independent_leaves: bool,
    pub ignore_current_prefs: bool,
    pub ignore_scripts: bool,
    pub child_concurrency: usize,
    pub user_agent: String,
    pub unsafe_perm: bool,
    pub registries: Registries,
    pub lock: bool,
    #[serde(serialize_with = "serialize_millis")]
    pub lock_stale_duration: Duration,
    pub tag: String,
    pub locks: PathBuf,
    pub own_lifecycle_hooks_stdio: LifecycleStdio,
    pub local_packages: LocalPackages,
    pub prune_store: bool,
    pub verify_store_integrity: bool,
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Resolve options against the real host.
pub fn extend_install_options(
    options: InstallOptions,
) -> Result<StrictInstallOptions, ConfigError> {
    resolve_install_options(options, &SystemEnvironment)
}

/// Fill every unset field from defaults and host facts, then validate.
///
/// The store path is settled first and everything derived from it (the lock
/// directory) uses that value.
pub fn resolve_install_options(
    options: InstallOptions,
    env: &dyn HostEnvironment,
) -> Result<StrictInstallOptions, ConfigError> {
    let store = match options.store {
        Some(store) => store,
        None => env.default_store_path().ok_or(ConfigError::NoStoreDir)?,
    };
    let package_manager = options.package_manager.unwrap_or_default();
    let node_version = options
        .node_version
        .unwrap_or_else(|| env.runtime_version());
    let platform = env.platform();
    let prefix = options.prefix.unwrap_or_else(|| env.current_dir());
    let lockfile_directory = options
        .lockfile_directory
        .unwrap_or_else(|| prefix.clone());

    let lockfile = options.lockfile.unwrap_or(true);
    let lockfile_only = options.lockfile_only.unwrap_or(false);
    if !lockfile && lockfile_only {
        return Err(ConfigError::LockfileDisabled {
            lockfile: WANTED_LOCKFILE,
        });
    }

    let unsafe_perm = options.unsafe_perm.unwrap_or_else(|| {
        matches!(platform.as_str(), "win32" | "cygwin")
            || env.user_id().is_none_or(|uid| uid != 0)
    });

    let mut user_agent = options.user_agent.unwrap_or_else(|| {
        format!(
            "{}/{} npm/? node/{} {} {}",
            package_manager.name,
            package_manager.version,
            node_version,
            platform,
            env.arch()
        )
    });
    if user_agent.starts_with(GENERIC_USER_AGENT_PREFIX) {
        user_agent = format!(
            "{}/{} {user_agent}",
            package_manager.name, package_manager.version
        );
    }

    let registries = options.registries.unwrap_or_default().normalized();
    let mut raw_config = options.raw_config.unwrap_or_default();
    raw_config.insert("registry".to_string(), registries.default.clone());

    let resolved = StrictInstallOptions {
        locks: options.locks.unwrap_or_else(|| store.join("_locks")),
        prefix,
        lockfile_directory,
        force_shared_lockfile: options.force_shared_lockfile.unwrap_or(false),
        frozen_lockfile: options.frozen_lockfile.unwrap_or(false),
        prefer_frozen_lockfile: options.prefer_frozen_lockfile.unwrap_or(true),
        shamefully_flatten: options.shamefully_flatten.unwrap_or(false),
        lockfile,
        lockfile_only,
        force: options.force.unwrap_or(false),
        update: options.update.unwrap_or(false),
        depth: options.depth.unwrap_or(0),
        repeat_install_depth: options.repeat_install_depth.unwrap_or(-1),
        engine_strict: options.engine_strict.unwrap_or(false),
        node_version,
        raw_config,
        package_manager,
        prune_lockfile_importers: options.prune_lockfile_importers.unwrap_or(false),
        side_effects_cache_read: options.side_effects_cache_read.unwrap_or(false),
        side_effects_cache_write: options.side_effects_cache_write.unwrap_or(false),
        strict_peer_dependencies: options.strict_peer_dependencies.unwrap_or(false),
        include: options.include.unwrap_or_default(),
        independent_leaves: options.independent_leaves.unwrap_or(false),
        ignore_current_prefs: options.ignore_current_prefs.unwrap_or(false),
        ignore_scripts: options.ignore_scripts.unwrap_or(false),
        child_concurrency: options
            .child_concurrency
            .unwrap_or(DEFAULT_CHILD_CONCURRENCY),
        user_agent,
        unsafe_perm,
        registries,
        lock: options.lock.unwrap_or(true),
        lock_stale_duration: options
            .lock_stale_duration
            .map_or(DEFAULT_LOCK_STALE_DURATION, Duration::from_millis),
        tag: options.tag.unwrap_or_else(|| DEFAULT_TAG.to_string()),
        own_lifecycle_hooks_stdio: options.own_lifecycle_hooks_stdio.unwrap_or_default(),
        local_packages: options.local_packages.unwrap_or_default(),
        prune_store: options.prune_store.unwrap_or(false),
        verify_store_integrity: options.verify_store_integrity.unwrap_or(true),
        store,
    };

    tracing::debug!(
        store = %resolved.store.display(),
        user_agent = %resolved.user_agent,
        "Resolved install options"
    );

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeHost {
        platform: &'static str,
        uid: Option<u32>,
    }

    impl HostEnvironment for FakeHost {
        fn platform(&self) -> String {
            self.platform.to_string()
        }
        fn arch(&self) -> String {
            "x64".to_string()
        }
        fn runtime_version(&self) -> String {
            "v20.11.0".to_string()
        }
        fn user_id(&self) -> Option<u32> {
            self.uid
        }
        fn current_dir(&self) -> PathBuf {
            PathBuf::from("/work/app")
        }
        fn default_store_path(&self) -> Option<PathBuf> {
            Some(PathBuf::from("/home/u/.hoard-store"))
        }
    }

    const LINUX_USER: FakeHost = FakeHost {
        platform: "linux",
        uid: Some(1000),
    };

    #[test]
    fn empty_input_resolves_to_defaults() {
        let opts = resolve_install_options(InstallOptions::default(), &LINUX_USER).unwrap();
        assert_eq!(opts.child_concurrency, 5);
        assert_eq!(opts.depth, 0);
        assert_eq!(opts.repeat_install_depth, -1);
        assert!(opts.lockfile);
        assert!(opts.prefer_frozen_lockfile);
        assert_eq!(opts.lock_stale_duration.as_millis(), 300_000);
        assert_eq!(opts.tag, "latest");
        assert_eq!(opts.store, PathBuf::from("/home/u/.hoard-store"));
        assert_eq!(opts.locks, PathBuf::from("/home/u/.hoard-store/_locks"));
        assert_eq!(opts.prefix, PathBuf::from("/work/app"));
        assert_eq!(opts.lockfile_directory, PathBuf::from("/work/app"));
        assert!(opts.verify_store_integrity);
        assert_eq!(opts.node_version, "v20.11.0");
    }

    #[test]
    fn lockfile_only_without_lockfile_is_rejected() {
        let opts = InstallOptions {
            lockfile: Some(false),
            lockfile_only: Some(true),
            ..Default::default()
        };
        let err = resolve_install_options(opts, &LINUX_USER).unwrap_err();
        assert!(matches!(err, ConfigError::LockfileDisabled { .. }));
        assert!(err.to_string().contains(WANTED_LOCKFILE));
    }

    #[test]
    fn user_values_override_defaults() {
        let opts = InstallOptions {
            store: Some(PathBuf::from("/mnt/store")),
            child_concurrency: Some(16),
            tag: Some("next".into()),
            prefix: Some(PathBuf::from("/repo/pkg")),
            lockfile_directory: Some(PathBuf::from("/repo")),
            ..Default::default()
        };
        let opts = resolve_install_options(opts, &LINUX_USER).unwrap();
        assert_eq!(opts.child_concurrency, 16);
        assert_eq!(opts.tag, "next");
        assert_eq!(opts.locks, PathBuf::from("/mnt/store/_locks"));
        assert_eq!(opts.lockfile_directory, PathBuf::from("/repo"));
    }

    #[test]
    fn lockfile_directory_falls_back_to_prefix() {
        let opts = InstallOptions {
            prefix: Some(PathBuf::from("/repo/pkg")),
            ..Default::default()
        };
        let opts = resolve_install_options(opts, &LINUX_USER).unwrap();
        assert_eq!(opts.lockfile_directory, PathBuf::from("/repo/pkg"));
    }

    #[test]
    fn unsafe_perm_follows_host_identity() {
        let resolve = |host: FakeHost| {
            resolve_install_options(InstallOptions::default(), &host)
                .unwrap()
                .unsafe_perm
        };
        assert!(resolve(FakeHost {
            platform: "win32",
            uid: Some(0)
        }));
        assert!(resolve(FakeHost {
            platform: "cygwin",
            uid: Some(0)
        }));
        assert!(resolve(FakeHost {
            platform: "linux",
            uid: None
        }));
        assert!(resolve(FakeHost {
            platform: "linux",
            uid: Some(1000)
        }));
        assert!(!resolve(FakeHost {
            platform: "linux",
            uid: Some(0)
        }));
    }

    #[test]
    fn default_user_agent_leads_with_tool() {
        let opts = resolve_install_options(InstallOptions::default(), &LINUX_USER).unwrap();
        let pm = PackageManager::default();
        assert_eq!(
            opts.user_agent,
            format!(
                "{}/{} npm/? node/v20.11.0 linux x64",
                pm.name, pm.version
            )
        );
    }

    #[test]
    fn generic_user_agent_is_prefixed() {
        let opts = InstallOptions {
            user_agent: Some("npm/6.4.1 node/v10.0.0 linux x64".into()),
            package_manager: Some(PackageManager {
                name: "hoard".into(),
                version: "1.2.3".into(),
            }),
            ..Default::default()
        };
        let opts = resolve_install_options(opts, &LINUX_USER).unwrap();
        assert_eq!(opts.user_agent, "hoard/1.2.3 npm/6.4.1 node/v10.0.0 linux x64");
    }

    #[test]
    fn custom_user_agent_is_kept() {
        let opts = InstallOptions {
            user_agent: Some("my-ci/1.0".into()),
            ..Default::default()
        };
        let opts = resolve_install_options(opts, &LINUX_USER).unwrap();
        assert_eq!(opts.user_agent, "my-ci/1.0");
    }

    #[test]
    fn registries_are_normalized_and_mirrored() {
        let mut scoped = BTreeMap::new();
        scoped.insert("@corp".to_string(), "https://npm.corp.local//".to_string());
        let opts = InstallOptions {
            registries: Some(Registries {
                default: "https://registry.example.com".into(),
                scoped,
            }),
            ..Default::default()
        };
        let opts = resolve_install_options(opts, &LINUX_USER).unwrap();
        assert_eq!(opts.registries.default, "https://registry.example.com/");
        assert_eq!(
            opts.raw_config.get("registry").map(String::as_str),
            Some("https://registry.example.com/")
        );
        assert_eq!(
            opts.registries.registry_for("@corp/utils"),
            "https://npm.corp.local/"
        );
        assert_eq!(
            opts.registries.registry_for("left-pad"),
            "https://registry.example.com/"
        );
    }

    #[test]
    fn options_load_from_toml() {
        let text = r#"
            store = "/srv/store"
            child-concurrency = 8
            lock-stale-duration = 1000
            side-effects-cache-read = true

            [registries]
            default = "https://r.example"
            "@corp" = "https://corp.example"
        "#;
        let raw = InstallOptions::from_toml_str(text, Path::new("hoard.toml")).unwrap();
        let opts = resolve_install_options(raw, &LINUX_USER).unwrap();
        assert_eq!(opts.store, PathBuf::from("/srv/store"));
        assert_eq!(opts.child_concurrency, 8);
        assert_eq!(opts.lock_stale_duration, Duration::from_secs(1));
        assert!(opts.side_effects_cache_read);
        assert_eq!(opts.registries.registry_for("@corp/x"), "https://corp.example/");
    }

    #[test]
    fn missing_store_dir_is_a_config_error() {
        struct Homeless;
        impl HostEnvironment for Homeless {
            fn platform(&self) -> String {
                "linux".into()
            }
            fn arch(&self) -> String {
                "x64".into()
            }
            fn runtime_version(&self) -> String {
                "v20.0.0".into()
            }
            fn user_id(&self) -> Option<u32> {
                Some(1000)
            }
            fn current_dir(&self) -> PathBuf {
                PathBuf::from("/")
            }
            fn default_store_path(&self) -> Option<PathBuf> {
                None
            }
        }
        let err = resolve_install_options(InstallOptions::default(), &Homeless).unwrap_err();
        assert!(matches!(err, ConfigError::NoStoreDir));
    }
}
