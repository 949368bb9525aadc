//! The query execution boundary.
//!
//! This crate builds SQL; it never talks to a database. Drivers (or test
//! mocks) implement [`Executor`] and are handed `(sql, params)` pairs to run.
//! Methods return [`BoxFuture`] so the trait stays object-safe and free of
//! proc macros.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::LoadResult;
use crate::row::Row;
use crate::value::Value;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Executes parameterized SQL and introspects table metadata.
///
/// Implementations should copy `sql` into the returned future rather than
/// borrow it; the future is only tied to `&self`.
///
/// # Example
///
/// ```rust,ignore
/// struct PgExecutor { pool: deadpool_postgres::Pool }
///
/// impl Executor for PgExecutor {
///     fn fetch_rows(&self, sql: &str, params: Vec<Value>) -> BoxFuture<'_, LoadResult<Vec<Row>>> {
///         let sql = sql.to_string();
///         Box::pin(async move { /* run through the pool */ })
///     }
///     // ...
/// }
/// ```
pub trait Executor: Send + Sync {
    /// Execute a query and return its rows in result order.
    fn fetch_rows(&self, sql: &str, params: Vec<Value>) -> BoxFuture<'_, LoadResult<Vec<Row>>>;

    /// Column names of a table, in table order.
    ///
    /// Only used by [`SelectionFilter::prepare`](crate::SelectionFilter::prepare).
    fn table_columns(&self, table: &str) -> BoxFuture<'_, LoadResult<Vec<String>>>;
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn fetch_rows(&self, sql: &str, params: Vec<Value>) -> BoxFuture<'_, LoadResult<Vec<Row>>> {
        (**self).fetch_rows(sql, params)
    }

    fn table_columns(&self, table: &str) -> BoxFuture<'_, LoadResult<Vec<String>>> {
        (**self).table_columns(table)
    }
}
