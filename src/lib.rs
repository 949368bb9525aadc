//! # rowbatch
//!
//! Per-request batching and caching for relational lookups.
//!
//! Hierarchical resolvers (GraphQL fields, nested serializers, tree walkers)
//! naturally issue one query per parent row. This crate collapses those into
//! one query per relation per scheduling tick:
//! - A tick-scoped [`Batcher`] that coalesces and de-duplicates keys
//! - Relation strategies for `hasMany`, `belongsTo`, `hasManyThrough` and
//!   `manyToMany`, the list kinds each with a windowed paginated variant
//! - A [`BatchLoader`] registry caching loaders per relation identity
//! - A [`SelectionFilter`] that narrows queries to the requested columns
//!
//! The crate builds SQL text plus positional parameters and hands them to an
//! [`Executor`] you implement over your driver; it owns no connections.
//!
//! ## Batching
//!
//! Keys requested in the same tick resolve through one call to the batch
//! function:
//!
//! ```rust
//! use rowbatch::{Batcher, BoxFuture, LoadResult};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> LoadResult<()> {
//! let batcher = Batcher::new(|keys: Vec<i64>| -> BoxFuture<'static, LoadResult<Vec<i64>>> {
//!     Box::pin(async move { Ok(keys.iter().map(|k| k * 10).collect()) })
//! });
//!
//! // Two loads, one batch-function call.
//! let (a, b) = tokio::join!(batcher.load(1), batcher.load(2));
//! assert_eq!(a?, 10);
//! assert_eq!(b?, 20);
//! # Ok(())
//! # }
//! ```
//!
//! ## Relation Loaders
//!
//! Describe relations declaratively and let the registry batch them:
//!
//! ```rust,ignore
//! use rowbatch::{BatchLoader, LoaderSpec, Page};
//!
//! let registry = BatchLoader::new(executor);
//! let posts = registry.get_loader(
//!     &LoaderSpec::has_many("posts")
//!         .foreign_key("userId")
//!         .order_by("createdAt", "desc")
//!         .page(Page::new(10, 0)),
//! )?;
//!
//! // One windowed query serves every user resolved this tick.
//! let latest = posts.load_many(user_id).await?;
//! ```
//!
//! ## Selection Filtering
//!
//! Reduce a field selection to the columns actually worth fetching:
//!
//! ```rust
//! use regex_lite::Regex;
//! use rowbatch::{SelectionFilter, SelectionSet, TableSchema};
//!
//! let pattern = Regex::new(r"Id$").unwrap();
//! let filter = SelectionFilter::from_schemas([
//!     TableSchema::new("users", ["id", "name", "email"], &pattern),
//! ]);
//!
//! let selection = SelectionSet::new().field("name");
//! assert_eq!(filter.reduce_selection("users", &selection, &[]), vec!["id", "name"]);
//! ```
//!
//! ## Values and Keys
//!
//! Rows are dynamic; batch keys are the hashable subset of cell values:
//!
//! ```rust
//! use rowbatch::{Key, Value};
//!
//! let value = Value::from(42);
//! assert_eq!(value.as_key(), Some(Key::Int(42)));
//! assert_eq!(Value::Null.as_key(), None);
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use rowbatch::{BatchError, ErrorCode};
//!
//! let err = BatchError::unsupported_pagination("users");
//! assert_eq!(err.code, ErrorCode::UnsupportedPagination);
//! assert_eq!(err.code.code(), "L1004");
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod batch;
pub mod error;
pub mod executor;
pub mod logging;
pub mod query;
pub mod relations;
pub mod row;
pub mod schedule;
pub mod selection;
pub mod types;
pub mod value;

pub use batch::{BatchFn, Batcher};
pub use error::{BatchError, ErrorCode, ErrorContext, IntoBatchError, LoadResult};
pub use executor::{BoxFuture, Executor};
pub use query::{
    Dialect, InnerJoin, QueryRefinement, RELATION_INDEX, RelationQuery, quote_identifier,
    quote_qualified,
};
pub use relations::{
    BatchLoader, JoinSpec, LoaderIdentity, LoaderSpec, Related, RelationKind, RelationLoader,
};
pub use row::Row;
pub use schedule::{DispatchBoundary, ManualBoundary, YieldBoundary};
pub use selection::{SelectionFilter, SelectionSet, TableSchema};
pub use types::{OrderBy, Page, SortOrder};
pub use value::{Key, Value};

// Re-export logging utilities
pub use logging::{
    get_log_format, get_log_level, init as init_logging, init_debug, init_with_level,
    is_debug_enabled,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::batch::{BatchFn, Batcher};
    pub use crate::error::{BatchError, ErrorCode, LoadResult};
    pub use crate::executor::{BoxFuture, Executor};
    pub use crate::query::{Dialect, QueryRefinement, RelationQuery};
    pub use crate::relations::{
        BatchLoader, JoinSpec, LoaderSpec, Related, RelationKind, RelationLoader,
    };
    pub use crate::row::Row;
    pub use crate::selection::{SelectionFilter, SelectionSet};
    pub use crate::types::{OrderBy, Page, SortOrder};
    pub use crate::value::{Key, Value};
}
