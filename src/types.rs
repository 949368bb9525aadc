//! Common types used in relation query building.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BatchError, LoadResult};

/// Sort order for relation query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    /// Ascending order (A-Z, 0-9, oldest first).
    Asc,
    /// Descending order (Z-A, 9-0, newest first).
    Desc,
}

impl SortOrder {
    /// Get the SQL keyword for this sort order.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    /// Parse a direction string, case-insensitively.
    ///
    /// Anything other than `ASC` or `DESC` is a construction-time error.
    ///
    /// ```rust
    /// use rowbatch::SortOrder;
    ///
    /// assert_eq!(SortOrder::parse("desc").unwrap(), SortOrder::Desc);
    /// assert_eq!(SortOrder::parse("Asc").unwrap(), SortOrder::Asc);
    /// assert!(SortOrder::parse("sideways").is_err());
    /// ```
    pub fn parse(direction: &str) -> LoadResult<Self> {
        if direction.eq_ignore_ascii_case("asc") {
            Ok(Self::Asc)
        } else if direction.eq_ignore_ascii_case("desc") {
            Ok(Self::Desc)
        } else {
            Err(BatchError::invalid_order_direction(direction))
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::Asc
    }
}

/// Order by specification for a single column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    /// The column to order by (may be qualified, e.g. `posts.created_at`).
    pub column: String,
    /// The sort order.
    pub direction: SortOrder,
}

impl OrderBy {
    /// Create a new order by specification.
    pub fn new(column: impl Into<String>, direction: SortOrder) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }

    /// Create an ascending order.
    pub fn asc(column: impl Into<String>) -> Self {
        Self::new(column, SortOrder::Asc)
    }

    /// Create a descending order.
    pub fn desc(column: impl Into<String>) -> Self {
        Self::new(column, SortOrder::Desc)
    }
}

impl Default for OrderBy {
    /// Relations order by `id` ascending unless told otherwise.
    fn default() -> Self {
        Self::asc("id")
    }
}

/// Per-group page bounds for windowed relation pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Page {
    /// Maximum rows per group (see [`Page::window_bounds`] for the boundary rule).
    pub limit: u64,
    /// Row-number offset into each group.
    pub offset: u64,
}

impl Page {
    /// Create a new page.
    pub fn new(limit: u64, offset: u64) -> Self {
        Self { limit, offset }
    }

    /// The inclusive row-number range `[offset, offset + limit]` applied to the
    /// window query.
    ///
    /// Both ends are inclusive, so a group spans `limit + 1` row numbers.
    /// Callers that want exactly `limit` rows trim the extra one; keeping it
    /// lets them detect that another page exists. The upper bound saturates
    /// at `u64::MAX` instead of overflowing.
    ///
    /// ```rust
    /// use rowbatch::Page;
    ///
    /// let (lo, hi) = Page::new(10, 5).window_bounds();
    /// assert_eq!((lo, hi), (5, 15));
    /// assert_eq!(hi - lo + 1, 11); // limit + 1 row numbers
    /// ```
    pub fn window_bounds(&self) -> (u64, u64) {
        (self.offset, self.offset.saturating_add(self.limit))
    }
}
