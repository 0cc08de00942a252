//! Connection table actor.
//!
//! The table is owned by one background thread and mutated only through
//! messages, so updates for concurrent imports, pruning and saving are
//! serialized without any lock held across an await.

use hoard_schema::{PackageId, PackageUsagesBySearchQueries};
use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use tokio::sync::oneshot;

use super::prune::{PruneReport, prune_entries, search_usages};
use super::table::ConnectionTable;
use crate::error::StoreError;
use crate::paths::StoreLayout;

/// Messages understood by the connection actor.
pub enum ConnectionEvent {
    /// Record edges for one prefix.
    Update {
        prefix: PathBuf,
        add: Vec<PackageId>,
        remove: Vec<PackageId>,
        prune: bool,
        resp: oneshot::Sender<Result<(), StoreError>>,
    },
    /// Copy of the current table.
    Snapshot {
        resp: oneshot::Sender<Result<ConnectionTable, StoreError>>,
    },
    /// Persist the table.
    Save {
        resp: oneshot::Sender<Result<(), StoreError>>,
    },
    /// Remove unreferenced store entries, sparing those still being written.
    Prune {
        in_flight: Vec<PathBuf>,
        resp: oneshot::Sender<Result<PruneReport, StoreError>>,
    },
    /// Reverse usages for search queries.
    Usages {
        queries: Vec<String>,
        resp: oneshot::Sender<Result<PackageUsagesBySearchQueries, StoreError>>,
    },
    /// Stop the actor
    Shutdown,
}

impl fmt::Debug for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update {
                prefix,
                add,
                remove,
                prune,
                ..
            } => f
                .debug_struct("Update")
                .field("prefix", prefix)
                .field("add", &add.len())
                .field("remove", &remove.len())
                .field("prune", prune)
                .finish_non_exhaustive(),
            Self::Snapshot { .. } => write!(f, "Snapshot"),
            Self::Save { .. } => write!(f, "Save"),
            Self::Prune { in_flight, .. } => f
                .debug_struct("Prune")
                .field("in_flight", &in_flight.len())
                .finish_non_exhaustive(),
            Self::Usages { queries, .. } => f
                .debug_struct("Usages")
                .field("queries", queries)
                .finish_non_exhaustive(),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// A handle to the connection actor that is Send + Sync and Clone.
#[derive(Clone)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<ConnectionEvent>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle").finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Load the table for `layout` and spawn the actor thread.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the persisted table cannot be read.
    pub fn spawn(layout: StoreLayout) -> Result<Self, StoreError> {
        let (sender, receiver) = mpsc::channel();
        let table = ConnectionTable::load(&layout.connections_path())?;

        thread::Builder::new()
            .name("hoard-connections".to_string())
            .spawn(move || run_connection_loop(layout, table, receiver))
            .map_err(|e| StoreError::io("hoard-connections", e))?;

        Ok(Self { sender })
    }

    /// Helper to send a request and wait for the response
    async fn request<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(oneshot::Sender<Result<T, StoreError>>) -> ConnectionEvent,
    {
        let (tx, rx) = oneshot::channel();
        self.sender.send(f(tx)).map_err(|_| StoreError::ActorDied)?;
        rx.await.map_err(|_| StoreError::ActorDied)?
    }

    pub async fn update(
        &self,
        prefix: PathBuf,
        add: Vec<PackageId>,
        remove: Vec<PackageId>,
        prune: bool,
    ) -> Result<(), StoreError> {
        self.request(|resp| ConnectionEvent::Update {
            prefix,
            add,
            remove,
            prune,
            resp,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<ConnectionTable, StoreError> {
        self.request(|resp| ConnectionEvent::Snapshot { resp }).await
    }

    pub async fn save(&self) -> Result<(), StoreError> {
        self.request(|resp| ConnectionEvent::Save { resp }).await
    }

    pub async fn prune(&self, in_flight: Vec<PathBuf>) -> Result<PruneReport, StoreError> {
        self.request(|resp| ConnectionEvent::Prune { in_flight, resp })
            .await
    }

    pub async fn usages(
        &self,
        queries: Vec<String>,
    ) -> Result<PackageUsagesBySearchQueries, StoreError> {
        self.request(|resp| ConnectionEvent::Usages { queries, resp })
            .await
    }

    /// Ask the actor to stop. Later requests fail with [`StoreError::ActorDied`].
    pub fn shutdown(&self) {
        let _ = self.sender.send(ConnectionEvent::Shutdown);
    }
}

// The table and receiver are moved into this thread so the actor owns them.
#[allow(clippy::needless_pass_by_value)]
fn run_connection_loop(
    layout: StoreLayout,
    mut table: ConnectionTable,
    receiver: mpsc::Receiver<ConnectionEvent>,
) {
    while let Ok(event) = receiver.recv() {
        tracing::trace!("Connection event: {event:?}");
        match event {
            ConnectionEvent::Update {
                prefix,
                add,
                remove,
                prune,
                resp,
            } => {
                table.update(&prefix, &add, &remove, prune);
                let _ = resp.send(Ok(()));
            }
            ConnectionEvent::Snapshot { resp } => {
                let _ = resp.send(Ok(table.clone()));
            }
            ConnectionEvent::Save { resp } => {
                let result = table.save(&layout.connections_path());
                if result.is_ok() {
                    tracing::debug!("Saved connection table to {}", layout.root().display());
                }
                let _ = resp.send(result);
            }
            ConnectionEvent::Prune { in_flight, resp } => {
                let _ = resp.send(prune_entries(&layout, &table, &in_flight));
            }
            ConnectionEvent::Usages { queries, resp } => {
                let _ = resp.send(search_usages(&layout, &table, &queries));
            }
            ConnectionEvent::Shutdown => break,
        }
    }
}
