//! Error types for loader construction and batch execution.
//!
//! Errors carry a stable code for programmatic handling plus optional context
//! (table, column, rendered SQL) and an optional source error.
//!
//! # Error Codes
//!
//! Error codes follow a pattern: L{category}{number}
//! - 1xxx: Specification errors (invalid relation shape, bad join, bad order)
//! - 2xxx: Batch execution errors (query failure, resolver shape mismatch)
//! - 3xxx: Introspection errors (column metadata lookup)
//!
//! # Creating Errors
//!
//! ```rust
//! use rowbatch::{BatchError, ErrorCode};
//!
//! let err = BatchError::unsupported_pagination("users");
//! assert_eq!(err.code, ErrorCode::UnsupportedPagination);
//! assert_eq!(err.code.code(), "L1004");
//! assert!(err.is_spec_error());
//! ```
//!
//! Batch failures fan out to every caller waiting on the same tick, so
//! [`BatchError`] is `Clone`; source errors are shared behind an `Arc`.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for loader operations.
pub type LoadResult<T> = Result<T, BatchError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Specification errors (1xxx)
    /// Loader specification is invalid (L1001).
    InvalidSpec = 1001,
    /// Joined relation is missing its join description (L1002).
    MissingJoin = 1002,
    /// `join.from` is not of the form `table.column` (L1003).
    MalformedJoin = 1003,
    /// Pagination requested for a relation kind that cannot be paginated (L1004).
    UnsupportedPagination = 1004,
    /// Order direction is not ASC or DESC (L1005).
    InvalidOrderDirection = 1005,

    // Batch execution errors (2xxx)
    /// The batched query failed (L2001).
    QueryFailed = 2001,
    /// The batch resolver returned a result count different from the key count (L2002).
    ResultShapeMismatch = 2002,
    /// The dispatch task went away before delivering results (L2003).
    DispatchAbandoned = 2003,

    // Introspection errors (3xxx)
    /// Column metadata lookup failed during selection-filter preparation (L3001).
    IntrospectionFailed = 3001,
}

impl ErrorCode {
    /// Get the error code string (e.g., "L1001").
    pub fn code(&self) -> String {
        format!("L{}", *self as u16)
    }

    /// Get a short description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidSpec => "Invalid loader specification",
            Self::MissingJoin => "Missing join description",
            Self::MalformedJoin => "Malformed join column",
            Self::UnsupportedPagination => "Unsupported pagination",
            Self::InvalidOrderDirection => "Invalid order direction",
            Self::QueryFailed => "Batched query failed",
            Self::ResultShapeMismatch => "Batch resolver shape mismatch",
            Self::DispatchAbandoned => "Batch dispatch abandoned",
            Self::IntrospectionFailed => "Column introspection failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Additional context for an error.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The table involved.
    pub table: Option<String>,
    /// The column involved.
    pub column: Option<String>,
    /// The rendered SQL (if the error happened at execution time).
    pub sql: Option<String>,
}

/// Errors that can occur while constructing or running a loader.
#[derive(Error, Debug, Clone)]
pub struct BatchError {
    /// The error code.
    pub code: ErrorCode,
    /// The error message.
    pub message: String,
    /// Additional context.
    pub context: ErrorContext,
    /// The source error (if any), shared so the error stays cloneable.
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl BatchError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Set the table.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.context.table = Some(table.into());
        self
    }

    /// Set the column.
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.context.column = Some(column.into());
        self
    }

    /// Set the rendered SQL.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.context.sql = Some(sql.into());
        self
    }

    /// Set the source error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    // ============== Constructor Functions ==============

    /// Create a generic invalid-specification error.
    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidSpec, message)
    }

    /// Create a missing-join error for a joined relation kind.
    pub fn missing_join(kind: impl fmt::Display, table: impl Into<String>) -> Self {
        let table = table.into();
        Self::new(
            ErrorCode::MissingJoin,
            format!("{} relation for table '{}' requires a join", kind, table),
        )
        .with_table(table)
    }

    /// Create a malformed-join error; `from` must look like `table.column`.
    pub fn malformed_join(from: impl Into<String>) -> Self {
        let from = from.into();
        Self::new(
            ErrorCode::MalformedJoin,
            format!("join.from must be 'table.column', got '{}'", from),
        )
        .with_column(from)
    }

    /// Create an error for pagination on a relation kind that rejects it.
    pub fn unsupported_pagination(table: impl Into<String>) -> Self {
        let table = table.into();
        Self::new(
            ErrorCode::UnsupportedPagination,
            format!("belongsTo relation for table '{}' cannot be paginated", table),
        )
        .with_table(table)
    }

    /// Create an invalid order-direction error.
    pub fn invalid_order_direction(direction: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InvalidOrderDirection,
            format!(
                "order direction must be ASC or DESC (case-insensitive), got '{}'",
                direction.into()
            ),
        )
    }

    /// Create a query execution error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::QueryFailed, message)
    }

    /// Create a resolver shape-mismatch error.
    pub fn result_shape(expected: usize, got: usize) -> Self {
        Self::new(
            ErrorCode::ResultShapeMismatch,
            format!("batch resolver returned {} results for {} keys", got, expected),
        )
    }

    /// Create a dispatch-abandoned error.
    pub fn abandoned() -> Self {
        Self::new(
            ErrorCode::DispatchAbandoned,
            "batch dispatch went away before delivering results",
        )
    }

    /// Create an introspection error for a table.
    pub fn introspection(table: impl Into<String>, message: impl Into<String>) -> Self {
        let table = table.into();
        Self::new(
            ErrorCode::IntrospectionFailed,
            format!("column introspection failed for table '{}': {}", table, message.into()),
        )
        .with_table(table)
    }

    // ============== Error Checks ==============

    /// Check if this is a construction-time specification error.
    pub fn is_spec_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::InvalidSpec
                | ErrorCode::MissingJoin
                | ErrorCode::MalformedJoin
                | ErrorCode::UnsupportedPagination
                | ErrorCode::InvalidOrderDirection
        )
    }

    /// Check if this is a batch execution error.
    pub fn is_batch_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::QueryFailed | ErrorCode::ResultShapeMismatch | ErrorCode::DispatchAbandoned
        )
    }

    /// Check if this is an introspection error.
    pub fn is_introspection_error(&self) -> bool {
        self.code == ErrorCode::IntrospectionFailed
    }

    /// Display the error with all available context.
    pub fn display_full(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!("Error [{}]: {}\n", self.code.code(), self.message));

        if let Some(ref table) = self.context.table {
            output.push_str(&format!("  → Table: {}\n", table));
        }
        if let Some(ref column) = self.context.column {
            output.push_str(&format!("  → Column: {}\n", column));
        }
        if let Some(ref sql) = self.context.sql {
            let sql_display = if sql.len() > 200 {
                format!("{}...", &sql[..200])
            } else {
                sql.clone()
            };
            output.push_str(&format!("  → SQL: {}\n", sql_display));
        }

        output
    }
}

/// Extension trait for converting foreign errors to [`BatchError`].
///
/// Intended for [`Executor`](crate::Executor) implementations wrapping driver
/// errors.
pub trait IntoBatchError {
    /// Convert to a query-failure [`BatchError`].
    fn into_batch_error(self) -> BatchError;
}

impl<E: std::error::Error + Send + Sync + 'static> IntoBatchError for E {
    fn into_batch_error(self) -> BatchError {
        BatchError::query(self.to_string()).with_source(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::InvalidSpec.code(), "L1001");
        assert_eq!(ErrorCode::QueryFailed.code(), "L2001");
        assert_eq!(ErrorCode::IntrospectionFailed.code(), "L3001");
    }

    #[test]
    fn test_missing_join_error() {
        let err = BatchError::missing_join("manyToMany", "tags");
        assert!(err.is_spec_error());
        assert!(err.message.contains("tags"));
        assert_eq!(err.context.table, Some("tags".to_string()));
    }

    #[test]
    fn test_malformed_join_error() {
        let err = BatchError::malformed_join("userId");
        assert_eq!(err.code, ErrorCode::MalformedJoin);
        assert!(err.message.contains("table.column"));
    }

    #[test]
    fn test_unsupported_pagination_error() {
        let err = BatchError::unsupported_pagination("users");
        assert!(err.is_spec_error());
        assert!(!err.is_batch_error());
        assert!(err.message.contains("belongsTo"));
    }

    #[test]
    fn test_result_shape_error() {
        let err = BatchError::result_shape(3, 2);
        assert!(err.is_batch_error());
        assert!(err.message.contains("2 results for 3 keys"));
    }

    #[test]
    fn test_error_is_cloneable_with_source() {
        let io = std::io::Error::other("socket closed");
        let err = BatchError::query("connection dropped").with_source(io);
        let cloned = err.clone();
        assert_eq!(cloned.code, ErrorCode::QueryFailed);
        assert!(cloned.source.is_some());
    }

    #[test]
    fn test_into_batch_error() {
        let io = std::io::Error::other("boom");
        let err = io.into_batch_error();
        assert_eq!(err.code, ErrorCode::QueryFailed);
        assert!(err.message.contains("boom"));
    }

    #[test]
    fn test_display_full() {
        let err = BatchError::query("duplicate column")
            .with_table("posts")
            .with_sql("SELECT * FROM posts");

        let output = err.display_full();
        assert!(output.contains("L2001"));
        assert!(output.contains("posts"));
        assert!(output.contains("SELECT"));
    }
}
