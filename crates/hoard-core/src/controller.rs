//! The store controller: the one surface installers talk to.
//!
//! One controller per store root is meant to be shared (behind an `Arc`)
//! by every install run in the process, so that their fetches deduplicate.

use hoard_schema::{PackageId, PackageUsagesBySearchQueries, WantedDependency};
use std::path::Path;
use std::sync::Arc;

use crate::error::{ImportError, ResolutionError, StoreError};
use crate::fetch::{FetchEngine, FetchHandle, FetchOptions};
use crate::import::{ImportOptions, ImportOutcome, import_package};
use crate::options::StrictInstallOptions;
use crate::paths::StoreLayout;
use crate::requester::{PackageRequester, PackageResponse, RequestOptions};
use crate::resolver::Resolver;
use crate::store::{ConnectionUpdate, PackageLocation, PruneReport, Store};
use crate::transport::Transport;

/// Request, fetch, import and bookkeeping over one store.
#[derive(Debug)]
pub struct StoreController {
    store: Store,
    fetcher: Arc<FetchEngine>,
    requester: PackageRequester,
}

impl StoreController {
    /// Open the store at `layout`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store cannot be opened.
    pub fn new(
        layout: StoreLayout,
        resolver: Arc<dyn Resolver>,
        transport: Arc<dyn Transport>,
        verify_store_integrity: bool,
    ) -> Result<Self, StoreError> {
        let store = Store::open(layout.clone())?;
        let fetcher = Arc::new(FetchEngine::new(
            layout,
            transport,
            verify_store_integrity,
        ));
        let requester = PackageRequester::new(resolver, Arc::clone(&fetcher));
        Ok(Self {
            store,
            fetcher,
            requester,
        })
    }

    /// Open the store named by resolved install options.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store cannot be opened.
    pub fn from_options(
        options: &StrictInstallOptions,
        resolver: Arc<dyn Resolver>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, StoreError> {
        Self::new(
            StoreLayout::new(&options.store),
            resolver,
            transport,
            options.verify_store_integrity,
        )
    }

    /// Path helpers for the store.
    pub fn layout(&self) -> &StoreLayout {
        self.store.layout()
    }

    /// See [`PackageRequester::request_package`].
    ///
    /// # Errors
    ///
    /// Returns a [`ResolutionError`] if the dependency cannot be resolved.
    pub async fn request_package(
        &self,
        wanted: &WantedDependency,
        opts: RequestOptions<'_>,
    ) -> Result<PackageResponse, ResolutionError> {
        self.requester.request_package(wanted, opts).await
    }

    /// See [`FetchEngine::fetch_package`].
    pub fn fetch_package(&self, opts: FetchOptions) -> FetchHandle {
        self.fetcher.fetch_package(opts)
    }

    /// See [`import_package`].
    ///
    /// # Errors
    ///
    /// Returns an [`ImportError`] on filesystem failure.
    pub async fn import_package(
        &self,
        from: &Path,
        to: &Path,
        opts: ImportOptions,
    ) -> Result<ImportOutcome, ImportError> {
        import_package(from, to, opts).await
    }

    /// See [`Store::get_package_location`].
    pub fn get_package_location(
        &self,
        package_id: &PackageId,
        lockfile_directory: &Path,
        target_engine: Option<&str>,
    ) -> PackageLocation {
        self.store
            .get_package_location(package_id, lockfile_directory, target_engine)
    }

    /// See [`Store::update_connections`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ActorDied`] after [`StoreController::close`].
    pub async fn update_connections(
        &self,
        prefix: &Path,
        update: ConnectionUpdate,
    ) -> Result<(), StoreError> {
        self.store.update_connections(prefix, update).await
    }

    /// Remove unreferenced entries, sparing any this controller is still writing.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if an entry cannot be removed.
    pub async fn prune(&self) -> Result<PruneReport, StoreError> {
        self.store.prune(self.fetcher.unfinished_locations()).await
    }

    /// See [`Store::save_state`].
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the connection table cannot be written.
    pub async fn save_state(&self) -> Result<(), StoreError> {
        self.store.save_state().await
    }

    /// See [`Store::upload`].
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the build is missing or cannot be copied.
    pub async fn upload(
        &self,
        built_pkg_location: &Path,
        package_id: &PackageId,
        engine: &str,
    ) -> Result<(), StoreError> {
        self.store.upload(built_pkg_location, package_id, engine).await
    }

    /// See [`Store::find_package_usages`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ActorDied`] after [`StoreController::close`].
    pub async fn find_package_usages(
        &self,
        search_queries: &[String],
    ) -> Result<PackageUsagesBySearchQueries, StoreError> {
        self.store.find_package_usages(search_queries).await
    }

    /// Let every started transfer settle, then stop the store.
    ///
    /// Failed transfers are not reported here; their handles already carry
    /// the error.
    pub async fn close(&self) {
        let pending = self.fetcher.finishing_signals();
        tracing::debug!("Waiting on {} transfers before close", pending.len());
        futures::future::join_all(pending.iter().map(|s| s.wait())).await;
        self.store.close();
    }
}
