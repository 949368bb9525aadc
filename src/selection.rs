//! Column projection from field selections.
//!
//! Resolvers usually know which fields the caller asked for. [`SelectionFilter`]
//! turns that knowledge into a concrete column list: it introspects table
//! columns once up front, then [`reduce_selection`](SelectionFilter::reduce_selection)
//! intersects a request's top-level fields with the table's real columns.
//!
//! Two kinds of columns are always kept regardless of the selection: the `id`
//! primary key, and every reference column of every prepared table. Reference
//! columns are the ones matching the pattern given to
//! [`prepare`](SelectionFilter::prepare); dropping them would strip the key
//! material that later batched relation loads group by.

use futures::future;
use indexmap::IndexMap;
use regex_lite::Regex;
use smol_str::SmolStr;
use tracing::debug;

use crate::error::LoadResult;
use crate::executor::Executor;

// ==============================================================================
// Selection Sets
// ==============================================================================

/// One level of a field-selection tree.
///
/// A field with an empty sub-selection is a leaf (a scalar); a field with a
/// non-empty sub-selection is an object whose own columns belong to some other
/// table. Deserializes from the nested-object form, so a captured selection
/// like `{"id": {}, "posts": {"id": {}}}` loads directly.
///
/// ```rust
/// use rowbatch::SelectionSet;
///
/// let selection = SelectionSet::new()
///     .fields(["id", "name"])
///     .nested("posts", SelectionSet::new().field("id"));
///
/// assert_eq!(selection.leaf_fields(), vec!["id", "name"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SelectionSet {
    fields: IndexMap<SmolStr, SelectionSet>,
}

impl SelectionSet {
    /// Create an empty selection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a leaf field.
    pub fn field(mut self, name: impl Into<SmolStr>) -> Self {
        self.fields.insert(name.into(), SelectionSet::new());
        self
    }

    /// Add several leaf fields.
    pub fn fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        for name in names {
            self.fields.insert(name.into(), SelectionSet::new());
        }
        self
    }

    /// Add an object field with its own sub-selection.
    pub fn nested(mut self, name: impl Into<SmolStr>, selection: SelectionSet) -> Self {
        self.fields.insert(name.into(), selection);
        self
    }

    /// Names of the top-level leaf fields, in selection order. Object fields
    /// are skipped without recursing into them.
    pub fn leaf_fields(&self) -> Vec<SmolStr> {
        self.fields
            .iter()
            .filter(|(_, sub)| sub.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Look up a field's sub-selection.
    pub fn get(&self, name: &str) -> Option<&SelectionSet> {
        self.fields.get(name)
    }

    /// Whether a field was selected at this level.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Number of fields at this level.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether this level selects nothing.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ==============================================================================
// Table Schemas
// ==============================================================================

/// Introspected column metadata for one table.
///
/// Built during [`SelectionFilter::prepare`] and read-only afterward, so a
/// filter can be shared process-wide once prepared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// The table name.
    pub table: SmolStr,
    /// All columns, in the table's own order.
    pub columns: Vec<SmolStr>,
    /// The subset of columns matching the reference pattern.
    pub reference_columns: Vec<SmolStr>,
}

impl TableSchema {
    /// Build a schema, marking columns matching `reference_pattern` as
    /// reference columns.
    pub fn new<S: Into<SmolStr>>(
        table: impl Into<SmolStr>,
        columns: impl IntoIterator<Item = S>,
        reference_pattern: &Regex,
    ) -> Self {
        let columns: Vec<SmolStr> = columns.into_iter().map(Into::into).collect();
        let reference_columns = columns
            .iter()
            .filter(|c| reference_pattern.is_match(c))
            .cloned()
            .collect();
        Self {
            table: table.into(),
            columns,
            reference_columns,
        }
    }
}

// ==============================================================================
// Selection Filter
// ==============================================================================

/// Reduces field selections to minimal column lists.
///
/// # Examples
///
/// ```rust
/// use regex_lite::Regex;
/// use rowbatch::{SelectionFilter, SelectionSet, TableSchema};
///
/// let pattern = Regex::new(r"Id$").unwrap();
/// let filter = SelectionFilter::from_schemas([
///     TableSchema::new("users", ["id", "name", "email", "createdAt"], &pattern),
///     TableSchema::new("posts", ["id", "userId", "title"], &pattern),
/// ]);
///
/// let selection = SelectionSet::new()
///     .field("name")
///     .nested("posts", SelectionSet::new().field("id"));
///
/// // `id` is forced in, `email` and `createdAt` were not asked for, and the
/// // `posts` object field is not a users column.
/// let columns = filter.reduce_selection("users", &selection, &[]);
/// assert_eq!(columns, vec!["id", "name"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SelectionFilter {
    schemas: IndexMap<SmolStr, TableSchema>,
}

impl SelectionFilter {
    /// Build a filter from already-known schemas, without touching a database.
    pub fn from_schemas(schemas: impl IntoIterator<Item = TableSchema>) -> Self {
        Self {
            schemas: schemas
                .into_iter()
                .map(|schema| (schema.table.clone(), schema))
                .collect(),
        }
    }

    /// Introspect `tables` through `executor` and build a filter.
    ///
    /// Introspection runs concurrently across tables; any single failure
    /// rejects the whole call. Columns matching `reference_pattern` become
    /// reference columns, which [`reduce_selection`](Self::reduce_selection)
    /// keeps unconditionally.
    pub async fn prepare<E, I, S>(
        executor: &E,
        tables: I,
        reference_pattern: &Regex,
    ) -> LoadResult<Self>
    where
        E: Executor + ?Sized,
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        let lookups = tables.into_iter().map(|table| {
            let table: SmolStr = table.into();
            async move {
                let columns = executor
                    .table_columns(&table)
                    .await
                    .map_err(|err| err.with_table(table.as_str()))?;
                let schema = TableSchema::new(table.clone(), columns, reference_pattern);
                debug!(
                    table = %table,
                    columns = schema.columns.len(),
                    references = schema.reference_columns.len(),
                    "introspected table"
                );
                LoadResult::Ok(schema)
            }
        });

        let schemas = future::try_join_all(lookups).await?;
        Ok(Self::from_schemas(schemas))
    }

    /// Whether `table` was prepared.
    pub fn is_prepared(&self, table: &str) -> bool {
        self.schemas.contains_key(table)
    }

    /// Look up a prepared table's schema.
    pub fn schema(&self, table: &str) -> Option<&TableSchema> {
        self.schemas.get(table)
    }

    /// Reduce `selection` to the columns worth fetching from `table`.
    ///
    /// The requested set is the selection's top-level leaf fields plus `id`
    /// plus every prepared table's reference columns. The result is that set
    /// intersected with `table`'s real columns, in the table's own column
    /// order, with `always_load` appended verbatim afterward.
    ///
    /// An empty result means "fetch all columns": it is returned for tables
    /// never prepared, and callers must treat it as the absence of a
    /// projection rather than an empty one.
    pub fn reduce_selection(
        &self,
        table: &str,
        selection: &SelectionSet,
        always_load: &[&str],
    ) -> Vec<SmolStr> {
        let Some(schema) = self.schemas.get(table) else {
            // Unknown table: the all-columns sentinel.
            return Vec::new();
        };

        let mut requested = selection.leaf_fields();
        if !requested.iter().any(|field| field == "id") {
            requested.push(SmolStr::new_static("id"));
        }

        // Keep key material loadable for relation batches on any table.
        for other in self.schemas.values() {
            requested.extend(other.reference_columns.iter().cloned());
        }

        let mut columns: Vec<SmolStr> = schema
            .columns
            .iter()
            .filter(|column| requested.contains(column))
            .cloned()
            .collect();
        columns.extend(always_load.iter().map(|c| SmolStr::new(c)));
        columns
    }
}
