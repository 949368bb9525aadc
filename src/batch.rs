//! Per-tick key coalescing.
//!
//! A [`Batcher`] collects every `load` call made during one scheduling tick,
//! invokes its batch resolver exactly once with the de-duplicated keys in
//! first-request order, and fans the results back out to every caller. Repeat
//! requests for the same key within a tick share one slot; a resolver failure
//! rejects the whole tick uniformly.
//!
//! Keys register at `load` *call* time, not at first poll, so futures created
//! back-to-back join the same batch regardless of how they are awaited:
//!
//! ```rust
//! use rowbatch::{Batcher, BoxFuture, LoadResult};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let batcher = Batcher::new(|keys: Vec<i64>| -> BoxFuture<'static, LoadResult<Vec<i64>>> {
//!     Box::pin(async move { Ok(keys.iter().map(|k| k * 10).collect()) })
//! });
//!
//! let (a, b) = tokio::join!(batcher.load(1), batcher.load(2));
//! assert_eq!(a.unwrap(), 10);
//! assert_eq!(b.unwrap(), 20);
//! # }
//! ```
//!
//! Values are not memoized across ticks: a later tick for the same key issues
//! a fresh query.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{BatchError, LoadResult};
use crate::executor::BoxFuture;
use crate::schedule::{DispatchBoundary, YieldBoundary};

/// Resolves one batch of keys to position-aligned values.
///
/// The result must contain exactly one value per key, in key order; any other
/// shape fails the whole batch. Implemented for plain closures.
pub trait BatchFn<K, V>: Send + Sync {
    /// Resolve `keys` (already de-duplicated, in first-request order).
    fn run(&self, keys: Vec<K>) -> BoxFuture<'static, LoadResult<Vec<V>>>;
}

impl<K, V, F> BatchFn<K, V> for F
where
    F: Fn(Vec<K>) -> BoxFuture<'static, LoadResult<Vec<V>>> + Send + Sync,
{
    fn run(&self, keys: Vec<K>) -> BoxFuture<'static, LoadResult<Vec<V>>> {
        (self)(keys)
    }
}

type Waiters<V> = Vec<oneshot::Sender<LoadResult<V>>>;

struct BatchState<K, V> {
    pending: IndexMap<K, Waiters<V>>,
    scheduled: bool,
}

struct Inner<K, V> {
    resolve: Arc<dyn BatchFn<K, V>>,
    boundary: Arc<dyn DispatchBoundary>,
    state: Mutex<BatchState<K, V>>,
}

/// A per-tick request coalescer.
///
/// Cheap to clone; clones share the same batch window. Requires a tokio
/// runtime (dispatch runs on a spawned task so that dropping one caller's
/// future never strands the other waiters of the same batch).
pub struct Batcher<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for Batcher<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Batcher<K, V>
where
    K: Clone + Eq + Hash + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create a batcher that flushes at the default [`YieldBoundary`].
    pub fn new(resolve: impl BatchFn<K, V> + 'static) -> Self {
        Self::with_boundary(resolve, Arc::new(YieldBoundary::default()))
    }

    /// Create a batcher with an explicit dispatch boundary.
    pub fn with_boundary(
        resolve: impl BatchFn<K, V> + 'static,
        boundary: Arc<dyn DispatchBoundary>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                resolve: Arc::new(resolve),
                boundary,
                state: Mutex::new(BatchState {
                    pending: IndexMap::new(),
                    scheduled: false,
                }),
            }),
        }
    }

    /// Request the value for `key`.
    ///
    /// The key joins the current tick's batch immediately; the returned future
    /// resolves after the batch flushes. The future is `'static`, so it can
    /// outlive the call site (and be spawned) freely.
    pub fn load(&self, key: K) -> impl Future<Output = LoadResult<V>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let dispatch = {
            let mut state = self.inner.state.lock();
            state.pending.entry(key).or_default().push(tx);
            !std::mem::replace(&mut state.scheduled, true)
        };
        if dispatch {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.flush().await });
        }
        async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(BatchError::abandoned()),
            }
        }
    }

    /// True if two handles share one batch window.
    pub fn shares_window(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<K, V> Inner<K, V>
where
    K: Clone + Eq + Hash + Send + 'static,
    V: Clone + Send + 'static,
{
    async fn flush(&self) {
        self.boundary.defer().await;

        let pending = {
            let mut state = self.state.lock();
            state.scheduled = false;
            std::mem::take(&mut state.pending)
        };
        if pending.is_empty() {
            return;
        }

        let keys: Vec<K> = pending.keys().cloned().collect();
        debug!(batch_size = keys.len(), "dispatching batch");

        match self.resolve.run(keys).await {
            Ok(values) if values.len() == pending.len() => {
                for ((_, waiters), value) in pending.into_iter().zip(values) {
                    for tx in waiters {
                        let _ = tx.send(Ok(value.clone()));
                    }
                }
            }
            Ok(values) => {
                let err = BatchError::result_shape(pending.len(), values.len());
                reject_all(pending, err);
            }
            Err(err) => reject_all(pending, err),
        }
    }
}

fn reject_all<K, V>(pending: IndexMap<K, Waiters<V>>, err: BatchError) {
    for (_, waiters) in pending {
        for tx in waiters {
            let _ = tx.send(Err(err.clone()));
        }
    }
}
