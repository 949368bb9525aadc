//! The loader registry.
//!
//! [`BatchLoader`] owns one [`RelationLoader`] per distinct [`LoaderIdentity`]
//! and hands out clones of them. Keys loaded through the same identity in the
//! same scheduling tick coalesce into one query, so a registry must be scoped
//! to one logical request: sharing it wider would leak one caller's keys into
//! another's batch window.
//!
//! ```rust,ignore
//! let registry = BatchLoader::new(executor)
//!     .use_selection_filter(filter);
//!
//! let posts = registry.get_loader(
//!     &LoaderSpec::has_many("posts")
//!         .foreign_key("userId")
//!         .order_by("createdAt", "desc"),
//! )?;
//!
//! // One query for both users, however deep in resolution these calls sit.
//! let (a, b) = tokio::join!(posts.load_many(1), posts.load_many(2));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::batch::Batcher;
use crate::error::LoadResult;
use crate::executor::Executor;
use crate::query::Dialect;
use crate::relations::spec::{LoaderIdentity, LoaderSpec, RelationKind};
use crate::relations::strategy::{Related, batch_for};
use crate::row::Row;
use crate::schedule::{DispatchBoundary, YieldBoundary};
use crate::selection::SelectionFilter;
use crate::value::Key;

/// A per-request registry of relation loaders.
///
/// Loaders are cached by [`LoaderIdentity`]: kind, target table, foreign key,
/// raw ordering, and page. The join, query refinement, and projection do not
/// participate, so specs differing only in those share the first-built loader.
pub struct BatchLoader<E> {
    executor: E,
    dialect: Dialect,
    filter: Option<Arc<SelectionFilter>>,
    boundary: Arc<dyn DispatchBoundary>,
    loaders: Mutex<HashMap<LoaderIdentity, RelationLoader>>,
}

impl<E> BatchLoader<E>
where
    E: Executor + Clone + Send + Sync + 'static,
{
    /// Create a registry over `executor`, rendering PostgreSQL placeholders.
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            dialect: Dialect::default(),
            filter: None,
            boundary: Arc::new(YieldBoundary::default()),
            loaders: Mutex::new(HashMap::new()),
        }
    }

    /// Set the placeholder dialect batched queries render with.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Install a prepared [`SelectionFilter`]. Loaders built afterwards apply
    /// it to specs carrying a [`projection`](LoaderSpec::project).
    pub fn use_selection_filter(mut self, filter: impl Into<Arc<SelectionFilter>>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Replace the dispatch boundary new loaders flush on. Mostly useful in
    /// tests, where a [`ManualBoundary`](crate::ManualBoundary) makes batch
    /// windows explicit.
    pub fn with_boundary(mut self, boundary: Arc<dyn DispatchBoundary>) -> Self {
        self.boundary = boundary;
        self
    }

    /// Get the loader for `spec`, building and caching it on first use.
    ///
    /// Validation runs only when a loader is actually built: a spec whose
    /// identity is already cached returns the cached loader without being
    /// re-checked. Construction errors (bad order direction, missing or
    /// malformed join, paginated `belongsTo`) surface here, synchronously.
    pub fn get_loader(&self, spec: &LoaderSpec) -> LoadResult<RelationLoader> {
        let identity = spec.identity();

        if let Some(loader) = self.loaders.lock().get(&identity) {
            debug!(identity = ?identity, "loader cache hit");
            return Ok(loader.clone());
        }

        let relation = Arc::new(spec.normalize()?);
        debug!(kind = %relation.kind, table = %relation.table, "building loader");

        let batch = batch_for(
            Arc::clone(&relation),
            self.executor.clone(),
            self.dialect,
            self.filter.clone(),
        );
        let loader = RelationLoader {
            kind: relation.kind,
            batcher: Batcher::with_boundary(batch, Arc::clone(&self.boundary)),
        };

        // Two racing misses keep whichever loader landed first.
        Ok(self
            .loaders
            .lock()
            .entry(identity)
            .or_insert(loader)
            .clone())
    }

    /// Number of loaders built so far.
    pub fn loader_count(&self) -> usize {
        self.loaders.lock().len()
    }
}

/// A cached relation loader. Clones share the same batch window.
#[derive(Clone)]
pub struct RelationLoader {
    kind: RelationKind,
    batcher: Batcher<Key, Related>,
}

impl fmt::Debug for RelationLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationLoader")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl RelationLoader {
    /// The relation kind this loader serves.
    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    /// Load the related rows for `key`.
    ///
    /// The key joins the loader's current batch immediately; the returned
    /// future resolves once the batch's single query has run.
    pub fn load(
        &self,
        key: impl Into<Key>,
    ) -> impl Future<Output = LoadResult<Related>> + Send + 'static {
        self.batcher.load(key.into())
    }

    /// Load a single related row. For list relations this is the first row
    /// in relation order.
    pub fn load_one(
        &self,
        key: impl Into<Key>,
    ) -> impl Future<Output = LoadResult<Option<Row>>> + Send + 'static {
        let related = self.load(key);
        async move { related.await.map(Related::row) }
    }

    /// Load the related rows as a list. A `belongsTo` hit becomes a
    /// one-element list.
    pub fn load_many(
        &self,
        key: impl Into<Key>,
    ) -> impl Future<Output = LoadResult<Vec<Row>>> + Send + 'static {
        let related = self.load(key);
        async move { related.await.map(Related::rows) }
    }

    /// Whether `other` is a clone of this loader, coalescing into the same
    /// batches.
    pub fn shares_batch(&self, other: &Self) -> bool {
        self.batcher.shares_window(&other.batcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::executor::BoxFuture;
    use crate::query::RelationQuery;
    use crate::relations::spec::JoinSpec;
    use crate::types::Page;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    #[derive(Clone, Default)]
    struct CountingExecutor {
        inner: Arc<CountingInner>,
    }

    #[derive(Default)]
    struct CountingInner {
        queries: Mutex<Vec<String>>,
        rows: Mutex<Vec<Row>>,
    }

    impl CountingExecutor {
        fn with_rows(rows: Vec<Row>) -> Self {
            let executor = Self::default();
            *executor.inner.rows.lock() = rows;
            executor
        }

        fn query_count(&self) -> usize {
            self.inner.queries.lock().len()
        }
    }

    impl Executor for CountingExecutor {
        fn fetch_rows(&self, sql: &str, _params: Vec<Value>) -> BoxFuture<'_, LoadResult<Vec<Row>>> {
            let sql = sql.to_string();
            Box::pin(async move {
                self.inner.queries.lock().push(sql);
                Ok(self.inner.rows.lock().clone())
            })
        }

        fn table_columns(&self, _table: &str) -> BoxFuture<'_, LoadResult<Vec<String>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    fn post(id: i64, user_id: i64) -> Row {
        Row::from_pairs([
            ("id", Value::Int(id)),
            ("userId", Value::Int(user_id)),
        ])
    }

    // ========== Caching ==========

    #[test]
    fn test_same_spec_shares_one_loader() {
        let registry = BatchLoader::new(CountingExecutor::default());
        let spec = LoaderSpec::has_many("posts").foreign_key("userId");

        let a = registry.get_loader(&spec).unwrap();
        let b = registry.get_loader(&spec).unwrap();

        assert!(a.shares_batch(&b));
        assert_eq!(registry.loader_count(), 1);
    }

    #[test]
    fn test_refinement_does_not_split_the_cache() {
        let registry = BatchLoader::new(CountingExecutor::default());

        let plain = registry
            .get_loader(&LoaderSpec::has_many("posts").foreign_key("userId"))
            .unwrap();
        let refined = registry
            .get_loader(
                &LoaderSpec::has_many("posts")
                    .foreign_key("userId")
                    .refine(|query: &mut RelationQuery| {
                        query.select("title");
                    }),
            )
            .unwrap();

        // Same identity: the first-built loader (and its refinement) wins.
        assert!(plain.shares_batch(&refined));
        assert_eq!(registry.loader_count(), 1);
    }

    #[test]
    fn test_page_and_order_split_the_cache() {
        let registry = BatchLoader::new(CountingExecutor::default());
        let base = LoaderSpec::has_many("posts").foreign_key("userId");

        let plain = registry.get_loader(&base).unwrap();
        let paged = registry
            .get_loader(&base.clone().page(Page::new(10, 0)))
            .unwrap();
        let ordered = registry
            .get_loader(&base.clone().order_by("createdAt", "desc"))
            .unwrap();

        assert!(!plain.shares_batch(&paged));
        assert!(!plain.shares_batch(&ordered));
        assert_eq!(registry.loader_count(), 3);
    }

    #[test]
    fn test_cache_hit_skips_validation() {
        let registry = BatchLoader::new(CountingExecutor::default());

        let valid = LoaderSpec::has_many_through(
            "comments",
            JoinSpec::new("posts.userId", "comments.postId"),
        );
        let first = registry.get_loader(&valid).unwrap();

        // Same identity, malformed join: the cached loader comes back and the
        // bad join is never inspected.
        let malformed = LoaderSpec::has_many_through("comments", JoinSpec::new("nodots", "x"));
        let second = registry.get_loader(&malformed).unwrap();
        assert!(first.shares_batch(&second));
    }

    // ========== Validation ==========

    #[test]
    fn test_paged_belongs_to_is_rejected_synchronously() {
        let registry = BatchLoader::new(CountingExecutor::default());
        let err = registry
            .get_loader(&LoaderSpec::belongs_to("users").page(Page::new(1, 0)))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedPagination);
        assert_eq!(registry.loader_count(), 0);
    }

    #[test]
    fn test_invalid_direction_is_rejected() {
        let registry = BatchLoader::new(CountingExecutor::default());
        let err = registry
            .get_loader(&LoaderSpec::has_many("posts").order_by("id", "sideways"))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidOrderDirection);
    }

    // ========== Loading ==========

    #[tokio::test]
    async fn test_loads_in_one_tick_share_one_query() {
        let executor = CountingExecutor::with_rows(vec![post(10, 1), post(11, 2), post(12, 1)]);
        let registry = BatchLoader::new(executor.clone());
        let loader = registry
            .get_loader(&LoaderSpec::has_many("posts").foreign_key("userId"))
            .unwrap();

        let (a, b) = tokio::join!(loader.load_many(1), loader.load_many(2));

        assert_eq!(executor.query_count(), 1);
        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].key_of("id"), Some(Key::Int(10)));
    }

    #[tokio::test]
    async fn test_load_one_takes_first_row() {
        let executor = CountingExecutor::with_rows(vec![post(10, 1), post(12, 1)]);
        let registry = BatchLoader::new(executor);
        let loader = registry
            .get_loader(&LoaderSpec::has_many("posts").foreign_key("userId"))
            .unwrap();

        let first = loader.load_one(1).await.unwrap().unwrap();
        assert_eq!(first.key_of("id"), Some(Key::Int(10)));
    }

    #[tokio::test]
    async fn test_belongs_to_miss_loads_none() {
        let executor = CountingExecutor::with_rows(vec![post(1, 0)]);
        let registry = BatchLoader::new(executor);
        let loader = registry.get_loader(&LoaderSpec::belongs_to("users")).unwrap();

        assert!(loader.load_one(1).await.unwrap().is_some());
        assert!(loader.load_one(99).await.unwrap().is_none());
    }
}
