//! The scheduling boundary between key collection and batch dispatch.
//!
//! A [`Batcher`](crate::Batcher) collects keys until "the end of the current
//! tick", then flushes once. What a tick means is abstracted behind
//! [`DispatchBoundary`] so tests can flush deterministically without timers:
//! the default [`YieldBoundary`] defers through the runtime's yield point,
//! [`ManualBoundary`] holds the batch open until a test releases it.

use std::sync::Arc;
use tokio::sync::Notify;

use crate::executor::BoxFuture;

/// Decides when a collecting batch is allowed to dispatch.
///
/// `defer` is called once per batch, from the dispatch task; the batch flushes
/// when the returned future completes. Implementations must not borrow `self`
/// in the future (the boundary is shared behind an `Arc` across loaders).
pub trait DispatchBoundary: Send + Sync {
    /// Complete once the current scheduling tick has drained.
    fn defer(&self) -> BoxFuture<'static, ()>;
}

/// Defers dispatch through the runtime's cooperative yield point.
///
/// One yield is the microtask analog: every task already woken gets to run
/// (and register its keys) before the flush. Raising `yields` widens the
/// collection window across independently scheduled tasks.
#[derive(Debug, Clone)]
pub struct YieldBoundary {
    yields: usize,
}

impl YieldBoundary {
    /// Create a boundary that yields `yields` times before dispatch.
    pub fn new(yields: usize) -> Self {
        Self { yields }
    }
}

impl Default for YieldBoundary {
    fn default() -> Self {
        Self { yields: 1 }
    }
}

impl DispatchBoundary for YieldBoundary {
    fn defer(&self) -> BoxFuture<'static, ()> {
        let yields = self.yields;
        Box::pin(async move {
            for _ in 0..yields {
                tokio::task::yield_now().await;
            }
        })
    }
}

/// Holds every batch open until [`release`](ManualBoundary::release) is called.
///
/// Each `release` lets one pending dispatch through. A release with no
/// dispatch waiting stores a single permit for the next `defer`; further early
/// releases coalesce into that permit instead of queueing. Intended for tests
/// that assert on the contents of a batch window.
#[derive(Debug, Default)]
pub struct ManualBoundary {
    notify: Arc<Notify>,
}

impl ManualBoundary {
    /// Create a boundary with no stored permits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Let one pending (or future) dispatch through.
    pub fn release(&self) {
        self.notify.notify_one();
    }
}

impl DispatchBoundary for ManualBoundary {
    fn defer(&self) -> BoxFuture<'static, ()> {
        let notify = Arc::clone(&self.notify);
        Box::pin(async move { notify.notified().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_yield_boundary_completes() {
        YieldBoundary::default().defer().await;
        YieldBoundary::new(4).defer().await;
    }

    #[tokio::test]
    async fn test_manual_boundary_holds_until_release() {
        let boundary = ManualBoundary::new();
        assert!(boundary.defer().now_or_never().is_none());

        boundary.release();
        assert!(boundary.defer().now_or_never().is_some());

        // Permit was consumed, the next defer blocks again.
        assert!(boundary.defer().now_or_never().is_none());
    }

    #[tokio::test]
    async fn test_manual_boundary_coalesces_early_releases() {
        let boundary = ManualBoundary::new();
        boundary.release();
        boundary.release();

        // Early releases store a single permit, not a queue of them.
        assert!(boundary.defer().now_or_never().is_some());
        assert!(boundary.defer().now_or_never().is_none());
    }
}
