//! Batch recipes for each relation kind.
//!
//! A strategy turns a [`NormalizedRelation`] into the batch function its
//! loader runs once per tick: build one query over the whole key set, execute
//! it, and collate the rows back into per-key results aligned with the key
//! order.
//!
//! Query shapes by kind:
//! - `hasMany` filters the target table's foreign key by the key set.
//! - `belongsTo` filters the target table's `id` by the key set.
//! - `hasManyThrough` selects `target.*` plus the join table's qualified key
//!   column, joining `join_table.id = join.to`.
//! - `manyToMany` does the same but joins `target.id = join.to`.
//!
//! Paged variants wrap the same row set in a per-key row-number window instead
//! of a plain `ORDER BY`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::batch::BatchFn;
use crate::error::LoadResult;
use crate::executor::{BoxFuture, Executor};
use crate::query::{Dialect, InnerJoin, RelationQuery};
use crate::relations::spec::{KeySpec, NormalizedRelation, RelationKind};
use crate::row::Row;
use crate::selection::SelectionFilter;
use crate::value::{Key, Value};

/// Related rows resolved for one key.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// At most one row. Produced by `belongsTo` loaders.
    One(Option<Row>),
    /// Ordered rows. Produced by every other kind.
    Many(Vec<Row>),
}

impl Related {
    /// The single related row, if any. For list relations this is the first
    /// row in relation order.
    pub fn row(self) -> Option<Row> {
        match self {
            Self::One(row) => row,
            Self::Many(rows) => rows.into_iter().next(),
        }
    }

    /// The related rows as a list. A present single row becomes a
    /// one-element list.
    pub fn rows(self) -> Vec<Row> {
        match self {
            Self::One(row) => row.into_iter().collect(),
            Self::Many(rows) => rows,
        }
    }

    /// Number of related rows.
    pub fn len(&self) -> usize {
        match self {
            Self::One(row) => usize::from(row.is_some()),
            Self::Many(rows) => rows.len(),
        }
    }

    /// Whether no related row came back.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build the batch function for a relation.
pub(crate) fn batch_for<E>(
    relation: Arc<NormalizedRelation>,
    executor: E,
    dialect: Dialect,
    filter: Option<Arc<SelectionFilter>>,
) -> impl BatchFn<Key, Related>
where
    E: Executor + Clone + Send + Sync + 'static,
{
    move |keys: Vec<Key>| -> BoxFuture<'static, LoadResult<Vec<Related>>> {
        let relation = Arc::clone(&relation);
        let executor = executor.clone();
        let filter = filter.clone();
        Box::pin(async move {
            run_batch(&relation, &executor, dialect, filter.as_deref(), keys).await
        })
    }
}

async fn run_batch<E>(
    relation: &NormalizedRelation,
    executor: &E,
    dialect: Dialect,
    filter: Option<&SelectionFilter>,
    keys: Vec<Key>,
) -> LoadResult<Vec<Related>>
where
    E: Executor,
{
    let query = build_query(relation, filter, &keys);
    let (sql, params) = query.to_sql(dialect);
    debug!(
        kind = %relation.kind,
        table = %relation.table,
        keys = keys.len(),
        sql = %sql,
        "dispatching relation batch"
    );

    let rows = executor
        .fetch_rows(&sql, params)
        .await
        .map_err(|err| err.with_table(relation.table.clone()).with_sql(sql))?;

    Ok(collate(relation, keys, rows))
}

/// Build the batched query for one tick's key set: shape by kind, then the
/// caller's refinement, then the projection on top.
fn build_query(
    relation: &NormalizedRelation,
    filter: Option<&SelectionFilter>,
    keys: &[Key],
) -> RelationQuery {
    let values: Vec<Value> = keys.iter().map(Key::to_value).collect();

    let mut query = RelationQuery::new(&relation.table, relation.key_column())
        .keys(values)
        .order(relation.order.clone());

    if let KeySpec::Join(join) = &relation.keys {
        let left = match relation.kind {
            RelationKind::ManyToMany => format!("{}.id", relation.table),
            _ => format!("{}.id", join.table),
        };
        query = query
            .base_column(format!("{}.*", relation.table))
            .base_column(join.from.clone())
            .join(InnerJoin::new(join.table.clone(), left, join.to.clone()));
    }

    if let Some(page) = relation.page {
        query = query.window(relation.key_column(), page);
    }

    if let Some(refinement) = &relation.refinement {
        refinement.apply(&mut query);
    }

    if let (Some(filter), Some(selection)) = (filter, &relation.projection) {
        // An empty reduction is the all-columns sentinel and adds nothing.
        query.select_all(filter.reduce_selection(&relation.table, selection, &[]));
    }

    query
}

/// Redistribute fetched rows to the keys that asked for them, in key order.
/// Rows without a usable grouping value are dropped; keys without rows get an
/// empty result.
fn collate(relation: &NormalizedRelation, keys: Vec<Key>, rows: Vec<Row>) -> Vec<Related> {
    let column = relation.group_column();

    if relation.kind.is_single() {
        let mut first: HashMap<Key, Row> = HashMap::with_capacity(keys.len());
        for row in rows {
            if let Some(key) = row.key_of(column) {
                first.entry(key).or_insert(row);
            }
        }
        keys.into_iter()
            .map(|key| Related::One(first.remove(&key)))
            .collect()
    } else {
        let mut groups: HashMap<Key, Vec<Row>> = HashMap::with_capacity(keys.len());
        for row in rows {
            if let Some(key) = row.key_of(column) {
                groups.entry(key).or_default().push(row);
            }
        }
        keys.into_iter()
            .map(|key| Related::Many(groups.remove(&key).unwrap_or_default()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relations::spec::{JoinSpec, LoaderSpec};
    use crate::selection::{SelectionSet, TableSchema};
    use crate::types::Page;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Clone, Default)]
    struct RecordingExecutor {
        inner: Arc<RecordingInner>,
    }

    #[derive(Default)]
    struct RecordingInner {
        queries: Mutex<Vec<(String, Vec<Value>)>>,
        rows: Mutex<Vec<Row>>,
    }

    impl RecordingExecutor {
        fn with_rows(rows: Vec<Row>) -> Self {
            let executor = Self::default();
            *executor.inner.rows.lock() = rows;
            executor
        }

        fn queries(&self) -> Vec<(String, Vec<Value>)> {
            self.inner.queries.lock().clone()
        }
    }

    impl Executor for RecordingExecutor {
        fn fetch_rows(&self, sql: &str, params: Vec<Value>) -> BoxFuture<'_, LoadResult<Vec<Row>>> {
            let sql = sql.to_string();
            Box::pin(async move {
                self.inner.queries.lock().push((sql, params));
                Ok(self.inner.rows.lock().clone())
            })
        }

        fn table_columns(&self, _table: &str) -> BoxFuture<'_, LoadResult<Vec<String>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    fn row(pairs: &[(&str, i64)]) -> Row {
        Row::from_pairs(pairs.iter().map(|(c, v)| (*c, Value::Int(*v))))
    }

    fn sql_for(spec: &LoaderSpec, keys: &[i64]) -> (String, Vec<Value>) {
        let relation = spec.normalize().unwrap();
        let keys: Vec<Key> = keys.iter().map(|k| Key::Int(*k)).collect();
        build_query(&relation, None, &keys).to_sql(Dialect::Postgres)
    }

    // ========== Query Shapes ==========

    #[test]
    fn test_has_many_query_shape() {
        let spec = LoaderSpec::has_many("posts")
            .foreign_key("userId")
            .order_by("createdAt", "desc");

        let (sql, params) = sql_for(&spec, &[1, 2]);
        assert_eq!(
            sql,
            "SELECT * FROM posts WHERE userId IN ($1, $2) ORDER BY createdAt DESC"
        );
        assert_eq!(params, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_belongs_to_query_shape_keys_on_id() {
        let spec = LoaderSpec::belongs_to("users").foreign_key("ignoredKey");

        let (sql, _) = sql_for(&spec, &[7]);
        assert_eq!(sql, "SELECT * FROM users WHERE id IN ($1) ORDER BY id ASC");
    }

    #[test]
    fn test_has_many_through_query_shape() {
        let spec = LoaderSpec::has_many_through(
            "comments",
            JoinSpec::new("posts.userId", "comments.postId"),
        );

        let (sql, _) = sql_for(&spec, &[1]);
        assert_eq!(
            sql,
            "SELECT comments.*, posts.userId FROM comments \
             INNER JOIN posts ON posts.id = comments.postId \
             WHERE posts.userId IN ($1) ORDER BY id ASC"
        );
    }

    #[test]
    fn test_many_to_many_query_shape_joins_on_target_id() {
        let spec = LoaderSpec::many_to_many(
            "tags",
            JoinSpec::new("postTags.postId", "postTags.tagId"),
        );

        let (sql, _) = sql_for(&spec, &[1]);
        assert_eq!(
            sql,
            "SELECT tags.*, postTags.postId FROM tags \
             INNER JOIN postTags ON tags.id = postTags.tagId \
             WHERE postTags.postId IN ($1) ORDER BY id ASC"
        );
    }

    #[test]
    fn test_paged_has_many_query_shape() {
        let spec = LoaderSpec::has_many("posts")
            .foreign_key("userId")
            .order_by("createdAt", "asc")
            .page(Page::new(10, 5));

        let (sql, params) = sql_for(&spec, &[1, 2]);
        assert_eq!(
            sql,
            "SELECT * FROM (SELECT *, ROW_NUMBER() OVER (PARTITION BY userId \
             ORDER BY createdAt ASC) AS relation_index FROM posts \
             WHERE userId IN ($1, $2)) AS _t \
             WHERE relation_index BETWEEN $3 AND $4"
        );
        assert_eq!(
            params,
            vec![Value::Int(1), Value::Int(2), Value::Int(5), Value::Int(15)]
        );
    }

    #[test]
    fn test_paged_has_many_through_query_shape() {
        let spec = LoaderSpec::has_many_through(
            "comments",
            JoinSpec::new("posts.userId", "comments.postId"),
        )
        .order_by("createdAt", "desc")
        .page(Page::new(5, 10));

        let (sql, params) = sql_for(&spec, &[7]);
        assert_eq!(
            sql,
            "SELECT * FROM (SELECT comments.*, posts.userId, ROW_NUMBER() OVER \
             (PARTITION BY posts.userId ORDER BY createdAt DESC) AS relation_index \
             FROM comments INNER JOIN posts ON posts.id = comments.postId \
             WHERE posts.userId IN ($1)) AS _t \
             WHERE relation_index BETWEEN $2 AND $3"
        );
        assert_eq!(params, vec![Value::Int(7), Value::Int(10), Value::Int(15)]);
    }

    #[test]
    fn test_paged_many_to_many_partitions_on_join_from() {
        let spec = LoaderSpec::many_to_many(
            "tags",
            JoinSpec::new("postTags.postId", "postTags.tagId"),
        )
        .page(Page::new(2, 0));

        let (sql, params) = sql_for(&spec, &[3]);
        assert_eq!(
            sql,
            "SELECT * FROM (SELECT tags.*, postTags.postId, ROW_NUMBER() OVER \
             (PARTITION BY postTags.postId ORDER BY id ASC) AS relation_index FROM tags \
             INNER JOIN postTags ON tags.id = postTags.tagId \
             WHERE postTags.postId IN ($1)) AS _t \
             WHERE relation_index BETWEEN $2 AND $3"
        );
        assert_eq!(params, vec![Value::Int(3), Value::Int(0), Value::Int(2)]);
    }

    #[test]
    fn test_projection_layers_after_refinement() {
        let filter = SelectionFilter::from_schemas([TableSchema::new(
            "posts",
            ["id", "userId", "title", "body"],
            &regex_lite::Regex::new(r"Id$").unwrap(),
        )]);
        let relation = LoaderSpec::has_many("posts")
            .foreign_key("userId")
            .refine(|query: &mut RelationQuery| {
                query.select("body");
            })
            .project(SelectionSet::new().field("title"))
            .normalize()
            .unwrap();

        let (sql, _) = build_query(&relation, Some(&filter), &[Key::Int(1)])
            .to_sql(Dialect::Postgres);
        assert_eq!(
            sql,
            "SELECT body, id, userId, title FROM posts WHERE userId IN ($1) ORDER BY id ASC"
        );
    }

    #[test]
    fn test_projection_quotes_reserved_column_names() {
        let filter = SelectionFilter::from_schemas([TableSchema::new(
            "orders",
            ["id", "userId", "order", "total"],
            &regex_lite::Regex::new(r"Id$").unwrap(),
        )]);
        let relation = LoaderSpec::has_many("orders")
            .foreign_key("userId")
            .project(SelectionSet::new().field("order"))
            .normalize()
            .unwrap();

        let (sql, _) = build_query(&relation, Some(&filter), &[Key::Int(1)])
            .to_sql(Dialect::Postgres);
        assert_eq!(
            sql,
            "SELECT id, userId, \"order\" FROM orders WHERE userId IN ($1) ORDER BY id ASC"
        );
    }

    #[test]
    fn test_projection_without_filter_is_ignored() {
        let relation = LoaderSpec::has_many("posts")
            .project(SelectionSet::new().field("title"))
            .normalize()
            .unwrap();

        let (sql, _) = build_query(&relation, None, &[Key::Int(1)]).to_sql(Dialect::Postgres);
        assert_eq!(sql, "SELECT * FROM posts WHERE id IN ($1) ORDER BY id ASC");
    }

    #[test]
    fn test_unprepared_projection_table_keeps_select_star() {
        let filter = SelectionFilter::from_schemas([]);
        let relation = LoaderSpec::has_many("posts")
            .project(SelectionSet::new().field("title"))
            .normalize()
            .unwrap();

        let (sql, _) = build_query(&relation, Some(&filter), &[Key::Int(1)])
            .to_sql(Dialect::Postgres);
        assert_eq!(sql, "SELECT * FROM posts WHERE id IN ($1) ORDER BY id ASC");
    }

    // ========== Collation ==========

    #[test]
    fn test_collate_groups_in_key_order() {
        let relation = LoaderSpec::has_many("posts")
            .foreign_key("userId")
            .normalize()
            .unwrap();
        let rows = vec![
            row(&[("id", 10), ("userId", 2)]),
            row(&[("id", 11), ("userId", 1)]),
            row(&[("id", 12), ("userId", 2)]),
        ];

        let related = collate(&relation, vec![Key::Int(1), Key::Int(2), Key::Int(3)], rows);
        assert_eq!(related.len(), 3);
        assert_eq!(related[0], Related::Many(vec![row(&[("id", 11), ("userId", 1)])]));
        assert_eq!(
            related[1],
            Related::Many(vec![
                row(&[("id", 10), ("userId", 2)]),
                row(&[("id", 12), ("userId", 2)]),
            ])
        );
        // A key with no rows still gets a slot.
        assert_eq!(related[2], Related::Many(Vec::new()));
    }

    #[test]
    fn test_collate_belongs_to_takes_first_match() {
        let relation = LoaderSpec::belongs_to("users").normalize().unwrap();
        let rows = vec![
            row(&[("id", 1), ("version", 1)]),
            row(&[("id", 1), ("version", 2)]),
        ];

        let related = collate(&relation, vec![Key::Int(1), Key::Int(2)], rows);
        assert_eq!(related[0], Related::One(Some(row(&[("id", 1), ("version", 1)]))));
        assert_eq!(related[1], Related::One(None));
    }

    #[test]
    fn test_collate_drops_rows_without_group_value() {
        let relation = LoaderSpec::has_many("posts")
            .foreign_key("userId")
            .normalize()
            .unwrap();
        let mut null_row = Row::new();
        null_row.insert("id", Value::Int(1));
        null_row.insert("userId", Value::Null);
        let rows = vec![null_row, Row::from_pairs([("id", Value::Int(2))])];

        let related = collate(&relation, vec![Key::Int(1)], rows);
        assert_eq!(related, vec![Related::Many(Vec::new())]);
    }

    #[test]
    fn test_collate_joined_kind_groups_by_join_column() {
        let relation = LoaderSpec::has_many_through(
            "comments",
            JoinSpec::new("posts.userId", "comments.postId"),
        )
        .normalize()
        .unwrap();
        let rows = vec![
            row(&[("id", 100), ("userId", 1)]),
            row(&[("id", 101), ("userId", 1)]),
        ];

        let related = collate(&relation, vec![Key::Int(1)], rows);
        assert_eq!(related[0].len(), 2);
    }

    // ========== Batch Function ==========

    #[tokio::test]
    async fn test_batch_runs_one_query_and_aligns_results() {
        let executor = RecordingExecutor::with_rows(vec![
            row(&[("id", 10), ("userId", 2)]),
            row(&[("id", 11), ("userId", 1)]),
        ]);
        let relation = Arc::new(
            LoaderSpec::has_many("posts")
                .foreign_key("userId")
                .normalize()
                .unwrap(),
        );

        let batch = batch_for(relation, executor.clone(), Dialect::Postgres, None);
        let related = batch.run(vec![Key::Int(1), Key::Int(2)]).await.unwrap();

        assert_eq!(related.len(), 2);
        assert_eq!(related[0].len(), 1);
        assert_eq!(related[1].len(), 1);

        let queries = executor.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(
            queries[0].0,
            "SELECT * FROM posts WHERE userId IN ($1, $2) ORDER BY id ASC"
        );
    }

    #[tokio::test]
    async fn test_batch_failure_carries_sql_context() {
        #[derive(Clone)]
        struct FailingExecutor;

        impl Executor for FailingExecutor {
            fn fetch_rows(
                &self,
                _sql: &str,
                _params: Vec<Value>,
            ) -> BoxFuture<'_, LoadResult<Vec<Row>>> {
                Box::pin(async { Err(crate::error::BatchError::query("connection reset")) })
            }

            fn table_columns(&self, _table: &str) -> BoxFuture<'_, LoadResult<Vec<String>>> {
                Box::pin(async { Ok(Vec::new()) })
            }
        }

        let relation = Arc::new(LoaderSpec::has_many("posts").normalize().unwrap());
        let batch = batch_for(relation, FailingExecutor, Dialect::Postgres, None);
        let err = batch.run(vec![Key::Int(1)]).await.unwrap_err();

        assert_eq!(err.context.table.as_deref(), Some("posts"));
        assert!(err.context.sql.as_deref().unwrap_or("").contains("FROM posts"));
    }
}
