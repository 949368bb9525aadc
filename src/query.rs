//! Relation query construction.
//!
//! [`RelationQuery`] is a buildable description of one batched relation query:
//! a target table, a key-set filter, an optional inner join, ordering, and an
//! optional per-group row-number window. Strategies construct one per batch;
//! [`QueryRefinement`]s may then mutate it (extra select columns, `GROUP BY`)
//! before it renders to parameterized SQL via [`RelationQuery::to_sql`].
//!
//! Select columns accumulate: the strategy's base select, then refinement
//! columns, then projection columns. An empty accumulated list renders as `*`.
//! For windowed queries the base select feeds the inner query and the
//! accumulated columns select from the outer one.

use smallvec::SmallVec;
use std::fmt::Write;

use crate::types::{OrderBy, Page};
use crate::value::Value;

/// Parameter placeholder style of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// PostgreSQL uses $1, $2, etc.
    Postgres,
    /// MySQL uses ?.
    MySql,
    /// SQLite uses ?.
    Sqlite,
}

impl Dialect {
    /// Get the parameter placeholder for a 1-based index.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Self::Postgres => format!("${}", index),
            Self::MySql | Self::Sqlite => "?".to_string(),
        }
    }
}

impl Default for Dialect {
    fn default() -> Self {
        Self::Postgres
    }
}

/// Escape an identifier part unconditionally.
fn escape_identifier(name: &str) -> String {
    let escaped = name.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Check if an identifier part needs quoting.
fn needs_quoting(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "user", "order", "group", "select", "from", "where", "table", "index", "key",
        "primary", "default", "null", "not", "and", "or", "in", "is", "like", "between",
        "case", "when", "then", "else", "end", "as", "on", "join", "inner", "left",
        "right", "limit", "offset", "union", "all", "distinct", "having",
    ];

    if RESERVED.contains(&name.to_lowercase().as_str()) {
        return true;
    }
    !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Quote a single identifier if needed.
pub fn quote_identifier(name: &str) -> String {
    if needs_quoting(name) {
        escape_identifier(name)
    } else {
        name.to_string()
    }
}

/// Quote a possibly qualified identifier (`table.column`), part by part.
pub fn quote_qualified(name: &str) -> String {
    name.split('.')
        .map(|part| {
            if part == "*" {
                part.to_string()
            } else {
                quote_identifier(part)
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// True for a bare or dot-qualified column path (`title`, `posts.userId`,
/// `posts.*`), false for expression fragments.
fn is_identifier_path(column: &str) -> bool {
    !column.is_empty()
        && column.split('.').all(|part| {
            part == "*"
                || (!part.is_empty()
                    && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        })
}

/// Render one select-list entry: column paths quote as needed, expression
/// fragments pass through untouched.
fn render_select_column(column: &str) -> String {
    if is_identifier_path(column) {
        quote_qualified(column)
    } else {
        column.to_string()
    }
}

/// An `INNER JOIN table ON left = right` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerJoin {
    /// The joined table.
    pub table: String,
    /// Left side of the equality (qualified column).
    pub left: String,
    /// Right side of the equality (qualified column).
    pub right: String,
}

impl InnerJoin {
    /// Create a new inner join.
    pub fn new(
        table: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            left: left.into(),
            right: right.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Window {
    /// Partition column for the row number (qualified).
    partition: String,
    page: Page,
}

type ColumnList = SmallVec<[String; 4]>;

/// Alias of the row-number column in windowed queries.
pub const RELATION_INDEX: &str = "relation_index";

/// Alias of the windowed sub-query.
const WINDOW_ALIAS: &str = "_t";

/// A buildable description of one batched relation query.
#[derive(Debug, Clone)]
pub struct RelationQuery {
    table: String,
    key_column: String,
    keys: Vec<Value>,
    join: Option<InnerJoin>,
    order: Option<OrderBy>,
    window: Option<Window>,
    base_columns: ColumnList,
    select_columns: ColumnList,
    group_by: ColumnList,
}

impl RelationQuery {
    /// Start a query over `table`, filtering `key_column` by the batch keys.
    pub fn new(table: impl Into<String>, key_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key_column: key_column.into(),
            keys: Vec::new(),
            join: None,
            order: None,
            window: None,
            base_columns: SmallVec::new(),
            select_columns: SmallVec::new(),
            group_by: SmallVec::new(),
        }
    }

    /// Set the batch key set (one `IN` parameter per key).
    pub fn keys(mut self, keys: Vec<Value>) -> Self {
        self.keys = keys;
        self
    }

    /// Add an inner join.
    pub fn join(mut self, join: InnerJoin) -> Self {
        self.join = Some(join);
        self
    }

    /// Set the ordering (also orders the window when one is set).
    pub fn order(mut self, order: OrderBy) -> Self {
        self.order = Some(order);
        self
    }

    /// Window the query: row-number rows per `partition` and keep only the
    /// page's inclusive row-number range.
    pub fn window(mut self, partition: impl Into<String>, page: Page) -> Self {
        self.window = Some(Window {
            partition: partition.into(),
            page,
        });
        self
    }

    /// Add a fixed base select column (the strategy's own select; feeds the
    /// inner query when windowed).
    pub fn base_column(mut self, column: impl Into<String>) -> Self {
        self.base_columns.push(column.into());
        self
    }

    /// Append a select column. Plain or dot-qualified column names are quoted
    /// as needed; anything else (raw fragments like `count(id) as n`) renders
    /// verbatim. Layered after the base select; the list accumulates,
    /// duplicates included.
    pub fn select(&mut self, column: impl Into<String>) -> &mut Self {
        self.select_columns.push(column.into());
        self
    }

    /// Append several select columns.
    pub fn select_all<C: Into<String>>(
        &mut self,
        columns: impl IntoIterator<Item = C>,
    ) -> &mut Self {
        for column in columns {
            self.select_columns.push(column.into());
        }
        self
    }

    /// Append a `GROUP BY` column (rendered verbatim).
    pub fn group_by(&mut self, column: impl Into<String>) -> &mut Self {
        self.group_by.push(column.into());
        self
    }

    /// The target table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Render to SQL plus positional parameters.
    pub fn to_sql(&self, dialect: Dialect) -> (String, Vec<Value>) {
        match &self.window {
            None => self.render_plain(dialect),
            Some(window) => self.render_windowed(dialect, window),
        }
    }

    fn effective_columns<'a>(
        &self,
        lists: impl IntoIterator<Item = &'a ColumnList>,
    ) -> String {
        let mut columns = Vec::new();
        for list in lists {
            columns.extend(list.iter().map(String::as_str).map(render_select_column));
        }
        if columns.is_empty() {
            "*".to_string()
        } else {
            columns.join(", ")
        }
    }

    fn write_key_filter(&self, sql: &mut String, dialect: Dialect, params: &mut Vec<Value>) {
        if self.keys.is_empty() {
            // An empty key set matches nothing.
            sql.push_str("1 = 0");
            return;
        }
        let _ = write!(sql, "{} IN (", quote_qualified(&self.key_column));
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            params.push(key.clone());
            sql.push_str(&dialect.placeholder(params.len()));
        }
        sql.push(')');
    }

    fn write_join(&self, sql: &mut String) {
        if let Some(join) = &self.join {
            let _ = write!(
                sql,
                " INNER JOIN {} ON {} = {}",
                quote_identifier(&join.table),
                quote_qualified(&join.left),
                quote_qualified(&join.right),
            );
        }
    }

    fn write_group_by(&self, sql: &mut String) {
        if !self.group_by.is_empty() {
            let _ = write!(sql, " GROUP BY {}", self.group_by.join(", "));
        }
    }

    fn render_plain(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut sql = String::with_capacity(128);
        let mut params = Vec::with_capacity(self.keys.len());

        let columns = self.effective_columns([&self.base_columns, &self.select_columns]);
        let _ = write!(sql, "SELECT {} FROM {}", columns, quote_identifier(&self.table));
        self.write_join(&mut sql);
        sql.push_str(" WHERE ");
        self.write_key_filter(&mut sql, dialect, &mut params);
        self.write_group_by(&mut sql);
        if let Some(order) = &self.order {
            let _ = write!(
                sql,
                " ORDER BY {} {}",
                quote_qualified(&order.column),
                order.direction.as_sql()
            );
        }

        (sql, params)
    }

    fn render_windowed(&self, dialect: Dialect, window: &Window) -> (String, Vec<Value>) {
        let mut sql = String::with_capacity(256);
        let mut params = Vec::with_capacity(self.keys.len() + 2);

        let outer = self.effective_columns([&self.select_columns]);
        let inner = self.effective_columns([&self.base_columns]);

        let _ = write!(
            sql,
            "SELECT {} FROM (SELECT {}, ROW_NUMBER() OVER (PARTITION BY {}",
            outer,
            inner,
            quote_qualified(&window.partition)
        );
        if let Some(order) = &self.order {
            let _ = write!(
                sql,
                " ORDER BY {} {}",
                quote_qualified(&order.column),
                order.direction.as_sql()
            );
        }
        let _ = write!(
            sql,
            ") AS {} FROM {}",
            RELATION_INDEX,
            quote_identifier(&self.table)
        );
        self.write_join(&mut sql);
        sql.push_str(" WHERE ");
        self.write_key_filter(&mut sql, dialect, &mut params);
        let _ = write!(sql, ") AS {} WHERE {} BETWEEN ", WINDOW_ALIAS, RELATION_INDEX);

        // Bounds past i64::MAX clamp instead of wrapping negative.
        let (lo, hi) = window.page.window_bounds();
        params.push(Value::Int(i64::try_from(lo).unwrap_or(i64::MAX)));
        sql.push_str(&dialect.placeholder(params.len()));
        sql.push_str(" AND ");
        params.push(Value::Int(i64::try_from(hi).unwrap_or(i64::MAX)));
        sql.push_str(&dialect.placeholder(params.len()));

        self.write_group_by(&mut sql);

        (sql, params)
    }
}

/// A caller-supplied query refinement, applied before projection.
///
/// Replaces the closure-valued query modifier: one method, no captured
/// environment requirements beyond `Send + Sync`. Plain closures implement it.
///
/// ```rust
/// use rowbatch::{QueryRefinement, RelationQuery};
///
/// let refine = |query: &mut RelationQuery| {
///     query.select("count(id) as n").group_by("id");
/// };
/// let mut query = RelationQuery::new("posts", "author_id");
/// QueryRefinement::apply(&refine, &mut query);
/// ```
pub trait QueryRefinement: Send + Sync {
    /// Mutate the query before it renders.
    fn apply(&self, query: &mut RelationQuery);
}

impl<F> QueryRefinement for F
where
    F: Fn(&mut RelationQuery) + Send + Sync,
{
    fn apply(&self, query: &mut RelationQuery) {
        self(query)
    }
}
