//! Query model.
//!
//! A [`Query`] is one analytic request, validated against a
//! [`MetadataModel`] and immutable afterwards. It is built with a
//! [`QueryBuilder`], either fluently or from a deserialized
//! [`QueryRequest`]:
//!
//! ```rust
//! use quarry::metadata::{Aggregation, Column, MetadataModel, Table};
//! use quarry::query::{FilterExpr, Operator, QueryBuilder, SortDirection};
//!
//! let model = MetadataModel::new(vec![Table::new("players")
//!     .column(Column::metric("score", "{{$score}}", Aggregation::Max))
//!     .column(Column::dimension("rating", "{{$rating}}"))])
//! .unwrap();
//!
//! let query = QueryBuilder::new("players")
//!     .select("rating")
//!     .select("score")
//!     .filter(FilterExpr::predicate("score", Operator::Gt, vec![100.into()]))
//!     .order_by("score", SortDirection::Desc)
//!     .limit(10)
//!     .build(&model)
//!     .unwrap();
//! assert!(query.is_aggregated());
//! ```

mod filter;
mod request;

pub use filter::{Arity, ColumnPath, FilterExpr, FilterValue, Operator, Predicate};
pub use request::{ProjectionRequest, QueryRequest};

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::cache::short_hash;
use crate::error::{CompileError, CompileResult};
use crate::metadata::{
    Arguments, ArgumentDef, Column, ColumnKind, MetadataModel, Table, ValueType,
};

/// How a projected column participates in aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Metric,
    Dimension,
    TimeDimension,
}

impl ColumnRole {
    pub fn of(column: &Column) -> Self {
        match column.kind {
            ColumnKind::Metric { .. } => ColumnRole::Metric,
            ColumnKind::Dimension => ColumnRole::Dimension,
            ColumnKind::TimeDimension { .. } => ColumnRole::TimeDimension,
        }
    }

    pub fn is_dimension(&self) -> bool {
        !matches!(self, ColumnRole::Metric)
    }
}

/// A requested output column. Time dimensions always carry a grain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub path: ColumnPath,
    pub role: ColumnRole,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One ORDER BY entry, keyed by output alias (or `id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub key: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Pagination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Also compute the number of rows before LIMIT/OFFSET.
    #[serde(default)]
    pub want_total: bool,
}

/// A validated analytic request.
///
/// Serializes deterministically; `bypass_cache` is left out so it never
/// affects the cache key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    table: String,
    table_arguments: Arguments,
    projections: Vec<Projection>,
    where_filter: Option<FilterExpr>,
    having_filter: Option<FilterExpr>,
    sorting: Vec<Sort>,
    pagination: Option<Pagination>,
    #[serde(skip)]
    bypass_cache: bool,
}

impl Query {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn table_arguments(&self) -> &Arguments {
        &self.table_arguments
    }

    pub fn projections(&self) -> &[Projection] {
        &self.projections
    }

    pub fn where_filter(&self) -> Option<&FilterExpr> {
        self.where_filter.as_ref()
    }

    pub fn having_filter(&self) -> Option<&FilterExpr> {
        self.having_filter.as_ref()
    }

    pub fn sorting(&self) -> &[Sort] {
        &self.sorting
    }

    pub fn pagination(&self) -> Option<&Pagination> {
        self.pagination.as_ref()
    }

    pub fn bypass_cache(&self) -> bool {
        self.bypass_cache
    }

    /// Whether at least one metric is projected.
    pub fn is_aggregated(&self) -> bool {
        self.projections.iter().any(|p| p.role == ColumnRole::Metric)
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &Projection> {
        self.projections.iter().filter(|p| p.role.is_dimension())
    }

    pub fn metrics(&self) -> impl Iterator<Item = &Projection> {
        self.projections.iter().filter(|p| p.role == ColumnRole::Metric)
    }

    pub fn projection(&self, alias: &str) -> Option<&Projection> {
        self.projections.iter().find(|p| p.alias == alias)
    }

    /// The dimension projection a filter on `path` can be grouped with: the
    /// same column and arguments, and the same grain unless the filter gives
    /// none.
    pub fn grouping_projection(&self, path: &ColumnPath) -> Option<&Projection> {
        self.dimensions().find(|p| {
            p.path.same_column(path) && (path.grain.is_none() || path.grain == p.path.grain)
        })
    }

    /// The metric projection of the same column and arguments, if any.
    pub fn metric_projection(&self, path: &ColumnPath) -> Option<&Projection> {
        self.metrics().find(|p| p.path.same_column(path))
    }
}

/// Fluent builder over a [`QueryRequest`].
#[derive(Debug, Clone, Default)]
#[must_use = "call build() to validate the query"]
pub struct QueryBuilder {
    request: QueryRequest,
}

impl From<QueryRequest> for QueryBuilder {
    fn from(request: QueryRequest) -> Self {
        Self { request }
    }
}

impl QueryBuilder {
    pub fn new(table: &str) -> Self {
        Self {
            request: QueryRequest {
                table: table.into(),
                ..QueryRequest::default()
            },
        }
    }

    pub fn table_argument(mut self, name: &str, value: &str) -> Self {
        self.request
            .table_arguments
            .insert(name.into(), value.into());
        self
    }

    /// Project a column given as a path such as `score`, `country.name` or
    /// `played_at@month`.
    pub fn select(self, path: impl Into<ColumnPath>) -> Self {
        self.project(ProjectionRequest::new(path.into()))
    }

    pub fn select_as(self, path: impl Into<ColumnPath>, alias: &str) -> Self {
        self.project(ProjectionRequest::new(path.into()).with_alias(alias))
    }

    pub fn project(mut self, projection: ProjectionRequest) -> Self {
        self.request.select.push(projection);
        self
    }

    /// Add a WHERE filter, ANDed with any existing one.
    pub fn filter(mut self, expr: FilterExpr) -> Self {
        self.request.filter = Some(match self.request.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Add a HAVING filter, ANDed with any existing one.
    pub fn having(mut self, expr: FilterExpr) -> Self {
        self.request.having = Some(match self.request.having.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn order_by(mut self, key: &str, direction: SortDirection) -> Self {
        self.request.order_by.push(Sort {
            key: key.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.request.pagination.get_or_insert_with(Pagination::default).limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.request.pagination.get_or_insert_with(Pagination::default).offset = Some(offset);
        self
    }

    pub fn with_total(mut self) -> Self {
        self.request.pagination.get_or_insert_with(Pagination::default).want_total = true;
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.request.bypass_cache = true;
        self
    }

    /// Validate names, grains, arguments and aliases against `model`.
    pub fn build(self, model: &MetadataModel) -> CompileResult<Query> {
        let request = self.request;
        let table = model.require_table(&request.table)?;

        for (name, value) in &request.table_arguments {
            let decl = table
                .get_argument(name)
                .ok_or_else(|| CompileError::InvalidArgument {
                    column: table.name.clone(),
                    argument: name.clone(),
                    reason: "not declared by the table".into(),
                })?;
            decl.validate(value)
                .map_err(|reason| CompileError::InvalidArgument {
                    column: table.name.clone(),
                    argument: name.clone(),
                    reason,
                })?;
        }

        if request.select.is_empty() {
            return Err(CompileError::InvalidProjection {
                table: table.name.clone(),
                reason: "no columns selected".into(),
            });
        }

        let mut resolved = Vec::with_capacity(request.select.len());
        let mut only_ids = true;
        for projection in &request.select {
            let mut path = projection.column.clone();
            let (_, column) = resolve_path(model, table, &path)?;
            only_ids &= column.value_type == ValueType::Id;
            if column.is_time_dimension() && path.grain.is_none() {
                path.grain = column.default_grain();
            }
            resolved.push((path, ColumnRole::of(column), projection.alias.clone()));
        }
        if only_ids {
            return Err(CompileError::InvalidProjection {
                table: table.name.clone(),
                reason: "a table cannot be queried only by its id columns".into(),
            });
        }
        let projections = assign_aliases(resolved)?;

        for filter in [&request.filter, &request.having].into_iter().flatten() {
            for predicate in filter.predicates() {
                resolve_path(model, table, &predicate.column)?;
            }
        }

        Ok(Query {
            table: table.name.clone(),
            table_arguments: request.table_arguments,
            projections,
            where_filter: request.filter,
            having_filter: request.having,
            sorting: request.order_by,
            pagination: request.pagination,
            bypass_cache: request.bypass_cache,
        })
    }
}

/// Give every projection a unique alias. Projections whose default aliases
/// collide get `<name>[_<grain>]_<hash of the full column path>`.
fn assign_aliases(
    resolved: Vec<(ColumnPath, ColumnRole, Option<String>)>,
) -> CompileResult<Vec<Projection>> {
    let mut base_counts: HashMap<String, usize> = HashMap::new();
    for (path, _, alias) in &resolved {
        if alias.is_none() {
            *base_counts.entry(path.base_alias()).or_default() += 1;
        }
    }

    let mut seen = HashSet::new();
    let mut projections = Vec::with_capacity(resolved.len());
    for (path, role, explicit) in resolved {
        let alias = match explicit {
            Some(alias) => alias,
            None => {
                let base = path.base_alias();
                if base_counts.get(&base).copied().unwrap_or(0) > 1 {
                    let hash = short_hash(&path.to_string());
                    match path.grain {
                        Some(grain) => format!("{}_{}_{}", base, grain, hash),
                        None => format!("{}_{}", base, hash),
                    }
                } else {
                    base
                }
            }
        };
        if !seen.insert(alias.clone()) {
            return Err(CompileError::DuplicateAlias(alias));
        }
        projections.push(Projection { path, role, alias });
    }
    Ok(projections)
}

/// Walk a column path from `root`, checking joins, the column, its grain
/// and its arguments.
pub(crate) fn resolve_path<'m>(
    model: &'m MetadataModel,
    root: &'m Table,
    path: &ColumnPath,
) -> CompileResult<(&'m Table, &'m Column)> {
    let mut table = root;
    for name in &path.joins {
        let join = table.get_join(name).ok_or_else(|| CompileError::UnknownColumn {
            table: table.name.clone(),
            column: name.clone(),
        })?;
        table = model.require_table(&join.table)?;
    }
    let column = table
        .get_column(&path.column)
        .ok_or_else(|| CompileError::UnknownColumn {
            table: table.name.clone(),
            column: path.column.clone(),
        })?;
    let qualified = format!("{}.{}", table.name, column.name);

    if let Some(grain) = path.grain {
        if column.grain(grain).is_none() {
            return Err(CompileError::InvalidArgument {
                column: qualified,
                argument: "grain".into(),
                reason: if column.is_time_dimension() {
                    format!("grain '{}' is not declared", grain)
                } else {
                    "only time dimensions take a grain".into()
                },
            });
        }
    }

    for (name, value) in &path.arguments {
        let decl: &ArgumentDef =
            column
                .argument(name)
                .ok_or_else(|| CompileError::InvalidArgument {
                    column: qualified.clone(),
                    argument: name.clone(),
                    reason: "not declared by the column".into(),
                })?;
        decl.validate(value)
            .map_err(|reason| CompileError::InvalidArgument {
                column: qualified.clone(),
                argument: name.clone(),
                reason,
            })?;
    }

    Ok((table, column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Aggregation, Join, JoinKind, TimeGrain, ValueType};

    fn model() -> MetadataModel {
        MetadataModel::new(vec![
            Table::new("players")
                .argument(ArgumentDef::new("season", ValueType::Integer).with_default("2024"))
                .column(Column::metric("score", "{{$score}}", Aggregation::Max))
                .column(Column::dimension("rating", "{{$rating}}"))
                .column(Column::dimension("country_name", "{{country.name}}"))
                .column(Column::dimension("player_id", "{{$id}}").with_type(ValueType::Id))
                .column(
                    Column::dimension("label", "{{$name}}").with_argument(
                        ArgumentDef::new("case", ValueType::Text)
                            .with_allowed_values(&["upper", "lower"])
                            .with_default("lower"),
                    ),
                )
                .column(Column::time_dimension(
                    "played_at",
                    "{{$played_at}}",
                    &[TimeGrain::Day, TimeGrain::Month],
                ))
                .join(Join::new(
                    "country",
                    "countries",
                    JoinKind::Left,
                    "{{$country_id}} = {{country.$id}}",
                )),
            Table::new("countries").column(Column::dimension("name", "{{$name}}")),
        ])
        .unwrap()
    }

    #[test]
    fn test_default_alias_and_grain() {
        let q = QueryBuilder::new("players")
            .select("played_at")
            .select("country.name")
            .build(&model())
            .unwrap();
        assert_eq!(q.projections()[0].alias, "played_at");
        assert_eq!(q.projections()[0].path.grain, Some(TimeGrain::Day));
        assert_eq!(q.projections()[1].alias, "country_name");
        assert!(!q.is_aggregated());
    }

    #[test]
    fn test_repeated_column_aliases_are_distinct() {
        let q = QueryBuilder::new("players")
            .select("played_at@day")
            .select("played_at@month")
            .build(&model())
            .unwrap();
        let aliases: Vec<_> = q.projections().iter().map(|p| p.alias.clone()).collect();
        assert_ne!(aliases[0], aliases[1]);
        assert!(aliases[0].starts_with("played_at_day_"));
        assert!(aliases[1].starts_with("played_at_month_"));
        assert_eq!(aliases[0].len(), "played_at_day_".len() + 8);
    }

    #[test]
    fn test_local_and_joined_columns_with_one_default_alias() {
        let q = QueryBuilder::new("players")
            .select("country_name")
            .select("country.name")
            .build(&model())
            .unwrap();
        let aliases: Vec<_> = q.projections().iter().map(|p| p.alias.as_str()).collect();
        assert_ne!(aliases[0], aliases[1]);
        assert!(aliases.iter().all(|a| a.starts_with("country_name_")));
        assert_ne!(aliases[0], format!("country_name_{}", short_hash("")));
    }

    #[test]
    fn test_id_only_selection_rejected() {
        let err = QueryBuilder::new("players")
            .select("player_id")
            .build(&model())
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidProjection { ref table, .. } if table == "players"));
        assert!(err.is_request_error());

        let q = QueryBuilder::new("players")
            .select("player_id")
            .select("rating")
            .build(&model())
            .unwrap();
        assert_eq!(q.projections().len(), 2);
    }

    #[test]
    fn test_empty_selection_rejected() {
        let err = QueryBuilder::new("players").build(&model()).unwrap_err();
        assert!(matches!(err, CompileError::InvalidProjection { .. }));
    }

    #[test]
    fn test_argument_aliases_are_deterministic() {
        let build = || {
            QueryBuilder::new("players")
                .select(ColumnPath::new("label").with_argument("case", "upper"))
                .select(ColumnPath::new("label").with_argument("case", "lower"))
                .build(&model())
                .unwrap()
        };
        assert_eq!(build(), build());
        let q = build();
        assert_ne!(q.projections()[0].alias, q.projections()[1].alias);
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let err = QueryBuilder::new("players")
            .select_as("score", "x")
            .select_as("rating", "x")
            .build(&model())
            .unwrap_err();
        assert_eq!(err, CompileError::DuplicateAlias("x".into()));

        let err = QueryBuilder::new("players")
            .select("score")
            .select("score")
            .build(&model())
            .unwrap_err();
        assert!(matches!(err, CompileError::DuplicateAlias(_)));
    }

    #[test]
    fn test_unknown_names_rejected() {
        let m = model();
        let err = QueryBuilder::new("players").select("nope").build(&m).unwrap_err();
        assert!(matches!(err, CompileError::UnknownColumn { .. }));

        let err = QueryBuilder::new("players")
            .select("team.name")
            .build(&m)
            .unwrap_err();
        assert!(matches!(err, CompileError::UnknownColumn { ref column, .. } if column == "team"));

        let err = QueryBuilder::new("players")
            .select("rating")
            .filter(FilterExpr::predicate("ghost", Operator::IsNull, vec![]))
            .build(&m)
            .unwrap_err();
        assert!(matches!(err, CompileError::UnknownColumn { .. }));
    }

    #[test]
    fn test_argument_validation() {
        let m = model();
        let err = QueryBuilder::new("players")
            .select(ColumnPath::new("label").with_argument("case", "title"))
            .build(&m)
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidArgument { .. }));

        let err = QueryBuilder::new("players")
            .table_argument("season", "last")
            .select("rating")
            .build(&m)
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidArgument { .. }));

        let err = QueryBuilder::new("players")
            .select("played_at@year")
            .build(&m)
            .unwrap_err();
        assert!(err.to_string().contains("not declared"));
    }

    #[test]
    fn test_serialization_ignores_bypass_cache() {
        let m = model();
        let a = QueryBuilder::new("players").select("score").build(&m).unwrap();
        let b = QueryBuilder::new("players")
            .select("score")
            .bypass_cache()
            .build(&m)
            .unwrap();
        assert!(b.bypass_cache());
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_grouping_projection() {
        let q = QueryBuilder::new("players")
            .select("score")
            .select("played_at@month")
            .build(&model())
            .unwrap();
        assert!(q.grouping_projection(&"played_at".into()).is_some());
        assert!(q.grouping_projection(&"played_at@month".into()).is_some());
        assert!(q.grouping_projection(&"played_at@day".into()).is_none());
        assert!(q.metric_projection(&"score".into()).is_some());
    }
}
