//! Fetch-to-store engine.
//!
//! Gets the content of one resolved package into the store at most once per
//! identity. Every call returns a [`FetchHandle`] immediately; the transfer
//! runs on its own task and settles the handle's signals as it goes:
//!
//! 1. `files` once the package files sit in their final store location,
//! 2. `manifest` once `package.json` has been read (independently of 1),
//! 3. `finishing` once the completion record is durably on disk.
//!
//! Concurrent calls for the same identity share one transfer. A forced fetch
//! starts a new transfer and replaces the shared entry, so later callers
//! attach to the forced one. A transfer leaves the table as soon as it
//! settles; later calls go back to the store.

mod archive;
pub mod signal;

pub use signal::{Signal, SignalResult};

use hoard_schema::{Manifest, PackageFilesResponse, PackageId, Resolution};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::FetchError;
use crate::paths::StoreLayout;
use crate::record::IntegrityRecord;
use crate::transport::Transport;
use signal::Settle;

pub(crate) use archive::to_slash;

/// What to fetch and how.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Identity being fetched; also the store key.
    pub package_id: PackageId,
    /// Where the content comes from.
    pub resolution: Resolution,
    /// Expose a manifest signal on the returned handle.
    pub fetch_raw_manifest: bool,
    /// Ignore the store and any in-flight transfer.
    pub force: bool,
    /// Target engine the caller installs for. Pristine content is shared
    /// between engines; the engine only partitions the dedup table.
    pub target_engine: Option<String>,
}

/// The single authority for one fetch.
#[derive(Debug, Clone)]
pub struct FetchHandle {
    /// Final store directory of the entry. Known before any I/O.
    pub in_store_location: PathBuf,
    /// Settles with the filenames and whether the store already had them.
    pub files: Signal<PackageFilesResponse>,
    /// Present when the raw manifest was requested.
    pub manifest: Option<Signal<Manifest>>,
    /// Settles once the entry is durable. Never before `files`.
    pub finishing: Signal<()>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FetchKey {
    package_id: PackageId,
    target_engine: Option<String>,
}

#[derive(Debug, Clone)]
struct InFlight {
    transfer_id: u64,
    handle: FetchHandle,
}

type InFlightTable = Arc<Mutex<HashMap<FetchKey, InFlight>>>;

/// Deduplicating fetcher bound to one store.
pub struct FetchEngine {
    layout: StoreLayout,
    transport: Arc<dyn Transport>,
    verify_store_integrity: bool,
    in_flight: InFlightTable,
    next_transfer: AtomicU64,
}

impl std::fmt::Debug for FetchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchEngine")
            .field("store", &self.layout.root())
            .field("verify_store_integrity", &self.verify_store_integrity)
            .finish_non_exhaustive()
    }
}

impl FetchEngine {
    /// Create an engine writing into `layout` and downloading through `transport`.
    pub fn new(
        layout: StoreLayout,
        transport: Arc<dyn Transport>,
        verify_store_integrity: bool,
    ) -> Self {
        Self {
            layout,
            transport,
            verify_store_integrity,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_transfer: AtomicU64::new(1),
        }
    }

    /// The store this engine writes into.
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Start (or join) the fetch of one package.
    ///
    /// Returns without waiting on any I/O. Must be called from within a
    /// Tokio runtime; the transfer keeps running if every handle is dropped.
    pub fn fetch_package(&self, opts: FetchOptions) -> FetchHandle {
        let in_store_location = self.layout.entry_dir(&opts.package_id);

        let tarball = match &opts.resolution {
            Resolution::Registry { tarball, .. } => tarball.clone(),
            Resolution::Directory { .. } => {
                return failed_handle(
                    in_store_location,
                    FetchError::UnsupportedResolution(opts.package_id.to_string()),
                    opts.fetch_raw_manifest,
                );
            }
        };
        let integrity = match &opts.resolution {
            Resolution::Registry { integrity, .. } => integrity.clone(),
            Resolution::Directory { .. } => None,
        };

        let key = FetchKey {
            package_id: opts.package_id.clone(),
            target_engine: opts.target_engine.clone(),
        };

        let mut table = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

        let existing = table.get(&key).cloned().or_else(|| {
            table
                .values()
                .find(|e| e.handle.in_store_location == in_store_location)
                .cloned()
        });

        if let Some(existing) = existing.as_ref().filter(|_| !opts.force) {
            tracing::debug!(
                "Attaching to transfer #{} for {}",
                existing.transfer_id,
                opts.package_id
            );
            table.entry(key).or_insert_with(|| existing.clone());
            return expose(&existing.handle, opts.fetch_raw_manifest);
        }

        let transfer_id = self.next_transfer.fetch_add(1, Ordering::Relaxed);
        if existing.is_some() {
            tracing::debug!(
                "Forced fetch #{transfer_id} supersedes the shared entry for {}",
                opts.package_id
            );
        }

        let (files_tx, files) = Signal::pending(opts.package_id.as_str());
        let (manifest_tx, manifest) = Signal::pending(opts.package_id.as_str());
        let (finishing_tx, finishing) = Signal::pending(opts.package_id.as_str());
        let handle = FetchHandle {
            in_store_location: in_store_location.clone(),
            files,
            manifest: Some(manifest),
            finishing,
        };

        // Entries sharing the store directory are superseded together.
        table.retain(|_, e| e.handle.in_store_location != in_store_location);
        table.insert(
            key,
            InFlight {
                transfer_id,
                handle: handle.clone(),
            },
        );
        drop(table);

        let transfer = Transfer {
            transfer_id,
            package_id: opts.package_id,
            tarball,
            integrity,
            entry_dir: in_store_location,
            layout: self.layout.clone(),
            transport: Arc::clone(&self.transport),
            force: opts.force,
            verify_store_integrity: self.verify_store_integrity,
            previous: existing.map(|e| e.handle.finishing),
        };
        let pending = PendingSignals {
            files: Some(files_tx),
            manifest: Some(manifest_tx),
            finishing: Some(finishing_tx),
        };
        tokio::spawn(transfer.run(pending, Arc::clone(&self.in_flight)));

        expose(&handle, opts.fetch_raw_manifest)
    }

    /// Finishing signals of every transfer still running.
    pub(crate) fn finishing_signals(&self) -> Vec<Signal<()>> {
        let table = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        table.values().map(|e| e.handle.finishing.clone()).collect()
    }

    /// Store directories of transfers still running.
    pub(crate) fn unfinished_locations(&self) -> Vec<PathBuf> {
        let table = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        table
            .values()
            .map(|e| e.handle.in_store_location.clone())
            .collect()
    }
}

fn expose(handle: &FetchHandle, fetch_raw_manifest: bool) -> FetchHandle {
    FetchHandle {
        manifest: if fetch_raw_manifest {
            handle.manifest.clone()
        } else {
            None
        },
        ..handle.clone()
    }
}

fn failed_handle(
    in_store_location: PathBuf,
    error: FetchError,
    fetch_raw_manifest: bool,
) -> FetchHandle {
    let error = Arc::new(error);
    FetchHandle {
        in_store_location,
        files: Signal::settled(Err(Arc::clone(&error))),
        manifest: fetch_raw_manifest.then(|| Signal::settled(Err(Arc::clone(&error)))),
        finishing: Signal::settled(Err(error)),
    }
}

/// Senders still waiting to settle. Whatever is left when the transfer
/// fails is settled with the same error.
struct PendingSignals {
    files: Option<Settle<PackageFilesResponse>>,
    manifest: Option<Settle<Manifest>>,
    finishing: Option<Settle<()>>,
}

impl PendingSignals {
    fn settle_manifest(&mut self, result: SignalResult<Manifest>) {
        if let Some(tx) = self.manifest.take() {
            tx.settle(result);
        }
    }

    fn settle_files(&mut self, response: PackageFilesResponse) {
        if let Some(tx) = self.files.take() {
            tx.settle(Ok(response));
        }
    }

    fn settle_finishing(&mut self) {
        if let Some(tx) = self.finishing.take() {
            tx.settle(Ok(()));
        }
    }

    fn fail(&mut self, error: &Arc<FetchError>) {
        if let Some(tx) = self.files.take() {
            tx.settle(Err(Arc::clone(error)));
        }
        self.settle_manifest(Err(Arc::clone(error)));
        if let Some(tx) = self.finishing.take() {
            tx.settle(Err(Arc::clone(error)));
        }
    }
}

struct Transfer {
    transfer_id: u64,
    package_id: PackageId,
    tarball: String,
    integrity: Option<hoard_schema::Integrity>,
    entry_dir: PathBuf,
    layout: StoreLayout,
    transport: Arc<dyn Transport>,
    force: bool,
    verify_store_integrity: bool,
    previous: Option<Signal<()>>,
}

impl Transfer {
    async fn run(self, mut pending: PendingSignals, in_flight: InFlightTable) {
        let transfer_id = self.transfer_id;
        let package_id = self.package_id.clone();

        let result = self.execute(&mut pending).await;

        // Leave the table before the outcome is observable. A reissued call
        // then re-reads the store or starts over.
        in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, entry| entry.transfer_id != transfer_id);

        match result {
            Ok(()) => pending.settle_finishing(),
            Err(e) => {
                tracing::debug!("Transfer #{transfer_id} for {package_id} failed: {e}");
                pending.fail(&Arc::new(e));
            }
        }
    }

    async fn execute(self, pending: &mut PendingSignals) -> Result<(), FetchError> {
        // A superseded transfer writes into the same directory; let it land first.
        if let Some(previous) = &self.previous {
            let _ = previous.wait().await;
        }

        let content_dir = StoreLayout::content_dir(&self.entry_dir);
        let record_path = StoreLayout::integrity_path(&self.entry_dir);

        if !self.force {
            let cached = {
                let record_path = record_path.clone();
                let content_dir = content_dir.clone();
                let verify = self.verify_store_integrity;
                blocking(&self.package_id, move || {
                    Ok(cached_filenames(&record_path, &content_dir, verify))
                })
                .await?
            };
            if let Some(filenames) = cached {
                tracing::debug!("Store hit for {}", self.package_id);
                pending.settle_manifest(
                    read_manifest(&content_dir, &self.package_id)
                        .await
                        .map_err(Arc::new),
                );
                pending.settle_files(PackageFilesResponse {
                    from_store: true,
                    filenames,
                });
                return Ok(());
            }
        }

        tracing::debug!(
            "Transfer #{} downloading {} from {}",
            self.transfer_id,
            self.package_id,
            self.tarball
        );

        let tmp_root = self.layout.tmp_dir();
        tokio::fs::create_dir_all(&tmp_root).await?;
        let staging = tempfile::Builder::new()
            .prefix("fetch-")
            .tempdir_in(&tmp_root)?;
        let archive_path = staging.path().join("archive.tgz");
        let staged_content = staging.path().join("package");

        self.transport.download(&self.tarball, &archive_path).await?;

        let filenames = {
            let archive_path = archive_path.clone();
            let staged_content = staged_content.clone();
            let integrity = self.integrity.clone();
            let id = self.package_id.to_string();
            blocking(&self.package_id, move || {
                if let Some(expected) = &integrity {
                    archive::verify_archive(&archive_path, expected, &id)?;
                }
                archive::extract_tarball(&archive_path, &staged_content, &id)
            })
            .await?
        };

        pending.settle_manifest(
            read_manifest(&staged_content, &self.package_id)
                .await
                .map_err(Arc::new),
        );

        {
            let entry_dir = self.entry_dir.clone();
            let record_path = record_path.clone();
            let content_dir = content_dir.clone();
            blocking(&self.package_id, move || {
                publish(&entry_dir, &record_path, &staged_content, &content_dir)
            })
            .await?;
        }

        pending.settle_files(PackageFilesResponse {
            from_store: false,
            filenames: filenames.clone(),
        });

        let package_id = self.package_id.clone();
        blocking(&self.package_id, move || {
            let record = IntegrityRecord::compute(&package_id, &content_dir, &filenames)?;
            record.persist(&record_path)?;
            Ok(())
        })
        .await?;

        tracing::debug!("Transfer #{} finished {}", self.transfer_id, self.package_id);
        Ok(())
    }
}

/// Filenames of a trustworthy store entry, or `None` when it must be fetched.
fn cached_filenames(record_path: &Path, content_dir: &Path, verify: bool) -> Option<Vec<String>> {
    let record = IntegrityRecord::load(record_path)?;
    if verify && !record.verify(content_dir) {
        tracing::warn!(
            "Store entry {} failed verification, refetching",
            content_dir.display()
        );
        return None;
    }
    Some(record.filenames())
}

/// Move staged content into the entry. The old record goes first so a crash
/// at any point leaves the entry reading as absent.
fn publish(
    entry_dir: &Path,
    record_path: &Path,
    staged_content: &Path,
    content_dir: &Path,
) -> Result<(), FetchError> {
    std::fs::create_dir_all(entry_dir)?;
    match std::fs::remove_file(record_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if content_dir.exists() {
        std::fs::remove_dir_all(content_dir)?;
    }
    std::fs::rename(staged_content, content_dir)?;
    Ok(())
}

/// Read `package.json` from a package directory.
pub(crate) async fn read_manifest(dir: &Path, package_id: &PackageId) -> Result<Manifest, FetchError> {
    let bytes = match tokio::fs::read(dir.join("package.json")).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FetchError::MissingManifest(package_id.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    Manifest::from_json(&bytes).map_err(|e| FetchError::InvalidManifest {
        package_id: package_id.to_string(),
        message: e.to_string(),
    })
}

async fn blocking<T, F>(package_id: &PackageId, f: F) -> Result<T, FetchError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, FetchError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|_| FetchError::Interrupted(package_id.to_string()))?
}
