//! Relation specifications and their normalized form.
//!
//! A [`LoaderSpec`] says which relation to load and how: the relation kind,
//! the target table, and optional tuning (foreign key, join, ordering, page,
//! query refinement, projection). Specs are cheap descriptions; validation
//! happens in [`normalize`](LoaderSpec::normalize) when a loader is actually
//! built, and the [`LoaderIdentity`] used for loader caching is derived from
//! the raw, pre-validation fields.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{BatchError, LoadResult};
use crate::query::QueryRefinement;
use crate::selection::SelectionSet;
use crate::types::{OrderBy, Page, SortOrder};

/// How related rows hang off the parent row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    /// 1:n, children carry the parent's key in a foreign-key column.
    HasMany,
    /// n:1, the parent carries the target row's `id`.
    BelongsTo,
    /// 1:n through an intermediate table owning the target rows.
    HasManyThrough,
    /// n:m through a junction table.
    ManyToMany,
}

impl RelationKind {
    /// The wire/display name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HasMany => "hasMany",
            Self::BelongsTo => "belongsTo",
            Self::HasManyThrough => "hasManyThrough",
            Self::ManyToMany => "manyToMany",
        }
    }

    /// Whether this kind resolves through a join table.
    pub fn is_joined(&self) -> bool {
        matches!(self, Self::HasManyThrough | Self::ManyToMany)
    }

    /// Whether this kind yields at most one row per key.
    pub fn is_single(&self) -> bool {
        matches!(self, Self::BelongsTo)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The join of a [`HasManyThrough`](RelationKind::HasManyThrough) or
/// [`ManyToMany`](RelationKind::ManyToMany) relation.
///
/// `from` is the qualified column the batch keys filter and group on, and must
/// be of the form `table.column`; `to` is the other side of the join equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Qualified key column on the join table (`"posts.userId"`).
    pub from: String,
    /// Qualified join target column (`"comments.postId"`).
    pub to: String,
}

impl JoinSpec {
    /// Create a join description.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// `JoinSpec::from` split into its table and column parts.
#[derive(Debug, Clone)]
pub(crate) struct ParsedJoin {
    /// The join table (part of `from` before the dot).
    pub(crate) table: String,
    /// The key column name (part of `from` after the dot). Related rows are
    /// grouped by this column of the result set.
    pub(crate) column: String,
    /// The original qualified `from`.
    pub(crate) from: String,
    /// The original qualified `to`.
    pub(crate) to: String,
}

/// Description of one relation to batch-load.
///
/// # Examples
///
/// ```rust
/// use rowbatch::{JoinSpec, LoaderSpec, Page};
///
/// // All posts of a user, newest first.
/// let posts = LoaderSpec::has_many("posts")
///     .foreign_key("userId")
///     .order_by("createdAt", "desc");
///
/// // The three newest comments per post.
/// let comments = LoaderSpec::has_many("comments")
///     .foreign_key("postId")
///     .order_by("createdAt", "desc")
///     .page(Page::new(3, 0));
///
/// // Comments on a user's posts, through the posts table.
/// let through = LoaderSpec::has_many_through(
///     "comments",
///     JoinSpec::new("posts.userId", "comments.postId"),
/// );
///
/// assert_ne!(posts.identity(), comments.identity());
/// ```
#[derive(Clone)]
pub struct LoaderSpec {
    kind: RelationKind,
    table: String,
    foreign_key: Option<String>,
    join: Option<JoinSpec>,
    order_by: Option<(String, String)>,
    page: Option<Page>,
    refinement: Option<Arc<dyn QueryRefinement>>,
    projection: Option<SelectionSet>,
}

impl fmt::Debug for LoaderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderSpec")
            .field("kind", &self.kind)
            .field("table", &self.table)
            .field("foreign_key", &self.foreign_key)
            .field("join", &self.join)
            .field("order_by", &self.order_by)
            .field("page", &self.page)
            .field("refinement", &self.refinement.as_ref().map(|_| "..."))
            .field("projection", &self.projection)
            .finish()
    }
}

impl LoaderSpec {
    fn new(kind: RelationKind, table: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            foreign_key: None,
            join: None,
            order_by: None,
            page: None,
            refinement: None,
            projection: None,
        }
    }

    /// A 1:n relation: rows of `table` whose foreign key equals the parent key.
    pub fn has_many(table: impl Into<String>) -> Self {
        Self::new(RelationKind::HasMany, table)
    }

    /// An n:1 relation: the row of `table` whose `id` equals the parent's
    /// stored key.
    pub fn belongs_to(table: impl Into<String>) -> Self {
        Self::new(RelationKind::BelongsTo, table)
    }

    /// A 1:n relation through an intermediate table.
    pub fn has_many_through(table: impl Into<String>, join: JoinSpec) -> Self {
        let mut spec = Self::new(RelationKind::HasManyThrough, table);
        spec.join = Some(join);
        spec
    }

    /// An n:m relation through a junction table.
    pub fn many_to_many(table: impl Into<String>, join: JoinSpec) -> Self {
        let mut spec = Self::new(RelationKind::ManyToMany, table);
        spec.join = Some(join);
        spec
    }

    /// Set the foreign-key column batch keys filter on. Defaults to `id`.
    pub fn foreign_key(mut self, key: impl Into<String>) -> Self {
        self.foreign_key = Some(key.into());
        self
    }

    /// Order related rows. `direction` is validated case-insensitively
    /// against `ASC`/`DESC` when the loader is built. Defaults to `id`
    /// ascending.
    pub fn order_by(mut self, column: impl Into<String>, direction: impl Into<String>) -> Self {
        self.order_by = Some((column.into(), direction.into()));
        self
    }

    /// Cap each key's related rows to one page, via a per-key row-number
    /// window. Not supported for [`belongs_to`](Self::belongs_to) relations.
    pub fn page(mut self, page: Page) -> Self {
        self.page = Some(page);
        self
    }

    /// Refine the batched query before execution, e.g. to add selects or a
    /// `GROUP BY`. Applied before any projection, so projected columns layer
    /// on top of refinement-driven selects.
    ///
    /// The refinement is not part of the loader's cache identity: two specs
    /// differing only here share one loader, and the first-built refinement
    /// wins.
    pub fn refine(mut self, refinement: impl QueryRefinement + 'static) -> Self {
        self.refinement = Some(Arc::new(refinement));
        self
    }

    /// Project the batched query down to the columns this selection needs,
    /// through the registry's [`SelectionFilter`](crate::SelectionFilter).
    /// Ignored when the registry has no filter installed. Like
    /// [`refine`](Self::refine), not part of the cache identity.
    pub fn project(mut self, selection: SelectionSet) -> Self {
        self.projection = Some(selection);
        self
    }

    /// The relation kind.
    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    /// The target table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The identity this spec caches under.
    ///
    /// Derived from the raw fields before validation; the join, refinement,
    /// and projection deliberately do not participate.
    pub fn identity(&self) -> LoaderIdentity {
        LoaderIdentity {
            kind: self.kind,
            table: self.table.clone(),
            foreign_key: self
                .foreign_key
                .clone()
                .unwrap_or_else(|| DEFAULT_KEY_COLUMN.to_string()),
            order_column: self.order_by.as_ref().map(|(column, _)| column.clone()),
            order_direction: self.order_by.as_ref().map(|(_, direction)| direction.clone()),
            limit: self.page.map(|page| page.limit),
            offset: self.page.map(|page| page.offset),
        }
    }

    /// Validate the spec and fill in defaults.
    pub(crate) fn normalize(&self) -> LoadResult<NormalizedRelation> {
        if self.kind.is_single() && self.page.is_some() {
            return Err(BatchError::unsupported_pagination(&self.table));
        }

        let keys = if self.kind.is_joined() {
            match &self.join {
                Some(join) => KeySpec::Join(parse_join(join)?),
                None => return Err(BatchError::missing_join(self.kind, &self.table)),
            }
        } else if self.kind.is_single() {
            // belongsTo always keys on the target's id.
            KeySpec::Column(DEFAULT_KEY_COLUMN.to_string())
        } else {
            KeySpec::Column(
                self.foreign_key
                    .clone()
                    .unwrap_or_else(|| DEFAULT_KEY_COLUMN.to_string()),
            )
        };

        let order = match &self.order_by {
            Some((column, direction)) => OrderBy::new(column, SortOrder::parse(direction)?),
            None => OrderBy::default(),
        };

        Ok(NormalizedRelation {
            kind: self.kind,
            table: self.table.clone(),
            keys,
            order,
            page: self.page,
            refinement: self.refinement.clone(),
            projection: self.projection.clone(),
        })
    }
}

/// Key column used when a spec names none.
pub(crate) const DEFAULT_KEY_COLUMN: &str = "id";

fn parse_join(join: &JoinSpec) -> LoadResult<ParsedJoin> {
    match join.from.split_once('.') {
        Some((table, column))
            if !table.is_empty() && !column.is_empty() && !column.contains('.') =>
        {
            Ok(ParsedJoin {
                table: table.to_string(),
                column: column.to_string(),
                from: join.from.clone(),
                to: join.to.clone(),
            })
        }
        _ => Err(BatchError::malformed_join(&join.from)),
    }
}

/// The cache key of a loader.
///
/// Two [`LoaderSpec`]s with equal identity resolve to the same loader
/// instance, so their keys coalesce into shared batches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoaderIdentity {
    kind: RelationKind,
    table: String,
    foreign_key: String,
    order_column: Option<String>,
    order_direction: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

/// How a relation's batch keys map onto result rows.
#[derive(Debug, Clone)]
pub(crate) enum KeySpec {
    /// Filter and group on one column of the target table.
    Column(String),
    /// Filter and group through a join table's qualified key column.
    Join(ParsedJoin),
}

/// A validated relation, ready for query building.
pub(crate) struct NormalizedRelation {
    pub(crate) kind: RelationKind,
    pub(crate) table: String,
    pub(crate) keys: KeySpec,
    pub(crate) order: OrderBy,
    pub(crate) page: Option<Page>,
    pub(crate) refinement: Option<Arc<dyn QueryRefinement>>,
    pub(crate) projection: Option<SelectionSet>,
}

impl fmt::Debug for NormalizedRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalizedRelation")
            .field("kind", &self.kind)
            .field("table", &self.table)
            .field("keys", &self.keys)
            .field("order", &self.order)
            .field("page", &self.page)
            .field("projection", &self.projection)
            .finish_non_exhaustive()
    }
}

impl NormalizedRelation {
    /// The column the batched query filters (and, when paged, partitions) on.
    pub(crate) fn key_column(&self) -> &str {
        match &self.keys {
            KeySpec::Column(column) => column,
            KeySpec::Join(join) => &join.from,
        }
    }

    /// The result-set column related rows are grouped by.
    pub(crate) fn group_column(&self) -> &str {
        match &self.keys {
            KeySpec::Column(column) => column,
            KeySpec::Join(join) => &join.column,
        }
    }
}
