pub mod controller;
pub mod error;
pub mod fetch;
pub mod import;
pub mod options;
pub mod paths;
pub mod record;
pub mod requester;
pub mod resolver;
pub mod store;
pub mod transport;

#[cfg(test)]
mod fixtures;

pub use controller::StoreController;
pub use error::{ConfigError, FetchError, ImportError, ResolutionError, StoreError};
pub use fetch::{FetchEngine, FetchHandle, FetchOptions, Signal};
pub use import::{ImportOptions, ImportOutcome, ImportSource};
pub use options::{InstallOptions, StrictInstallOptions, resolve_install_options};
pub use paths::*;
pub use requester::{
    ManifestState, PackageRequester, PackageResponse, RequestOptions, RegistryPackageResponse,
};
pub use resolver::{ResolveContext, ResolveResult, Resolver};
pub use store::{ConnectionUpdate, PackageLocation, PruneReport, Store};
pub use transport::Transport;
