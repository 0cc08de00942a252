//! Write-once, many-reader completion signals.
//!
//! A fetch exposes several of these (files ready, manifest, finishing).
//! Each settles exactly once, independently of the others, and any number
//! of callers can wait on a clone. Dropping every clone does not cancel the
//! work that settles it.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::FetchError;

/// Outcome carried by a [`Signal`].
pub type SignalResult<T> = Result<T, Arc<FetchError>>;

/// A cloneable handle on a value that settles once.
#[derive(Clone)]
pub struct Signal<T: Clone> {
    inner: Shared<BoxFuture<'static, SignalResult<T>>>,
}

impl<T: Clone> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.inner.peek().is_some() {
            "settled"
        } else {
            "pending"
        };
        f.debug_struct("Signal").field("state", &state).finish()
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a pending signal and the sender that settles it.
    ///
    /// If the sender is dropped unsettled, waiters see `FetchError::Interrupted`.
    pub(crate) fn pending(label: &str) -> (Settle<T>, Self) {
        let (tx, rx) = oneshot::channel();
        let label = label.to_string();
        let inner = async move {
            rx.await
                .unwrap_or_else(|_| Err(Arc::new(FetchError::Interrupted(label))))
        }
        .boxed()
        .shared();
        (Settle(tx), Self { inner })
    }

    /// A signal that has already settled.
    pub fn settled(result: SignalResult<T>) -> Self {
        Self {
            inner: futures::future::ready(result).boxed().shared(),
        }
    }

    /// A signal driven lazily by `fut` the first time anyone waits on it.
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = SignalResult<T>> + Send + 'static,
    {
        Self {
            inner: fut.boxed().shared(),
        }
    }

    /// Wait for the value.
    pub async fn wait(&self) -> SignalResult<T> {
        self.inner.clone().await
    }
}

/// The sending half of a [`Signal`].
pub(crate) struct Settle<T>(oneshot::Sender<SignalResult<T>>);

impl<T> Settle<T> {
    /// Settle the signal. Settling after every waiter has gone is not an error.
    pub(crate) fn settle(self, result: SignalResult<T>) {
        let _ = self.0.send(result);
    }
}
