//! SQL generation.
//!
//! [`SqlGenerator`] turns a validated [`Query`] into a [`CompiledQuery`]:
//! the main SELECT, an optional COUNT companion for pagination, and the
//! output-column description the hydrator needs.
//!
//! A query compiles to one of two shapes:
//!
//! - **single pass**: dimensions in GROUP BY, metrics wrapped in their
//!   aggregation, WHERE and HAVING on the same statement. Without metrics
//!   the statement is a SELECT DISTINCT.
//! - **nested**: used when any metric formula already aggregates and the
//!   metric declares an outer aggregation on top. The inner statement
//!   groups by the projected dimensions plus each metric's `nest_by`
//!   columns; the outer statement re-groups by the projected dimensions and
//!   applies the outer aggregations. WHERE goes inside, HAVING outside.

mod joins;
mod predicate;
mod statement;

pub use statement::{BoundValue, CompiledQuery, OutputColumn, SqlStatement};

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::error::{CompileError, CompileResult};
use crate::filter::{self, ClassifiedFilters};
use crate::metadata::{embeds_aggregate, Aggregation, Column, MetadataModel, Table};
use crate::query::{resolve_path, ColumnPath, ColumnRole, Predicate, Query, SortDirection};
use crate::resolver::{fit_identifier, ColumnResolver, Scope};
use crate::sql::{
    avg, count, count_distinct, count_star, max, min, raw_sql, sum, table_col, col,
    CountDistinctTuple, Dialect, Expr, ExprExt, OrderByExpr, SelectExpr, SelectStatement,
    SqlDialect, TableRef,
};

use joins::{apply_joins, plan_joins, table_ref, PlannedJoin};
use predicate::{render_filter, Params};

/// Alias of the derived table wrapping the main statement in a count query.
const PAGINATION_SUBQUERY: &str = "pagination_subquery";

/// Compiles queries against one metadata model for one dialect.
pub struct SqlGenerator<'a> {
    model: &'a MetadataModel,
    dialect: Dialect,
}

impl<'a> SqlGenerator<'a> {
    pub fn new(model: &'a MetadataModel, dialect: Dialect) -> Self {
        Self { model, dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Compile `query` into its main statement and optional count statement.
    ///
    /// Output is a pure function of the query, the model and the dialect.
    pub fn compile(&self, query: &Query) -> CompileResult<CompiledQuery> {
        let plan = Plan::build(self.model, self.dialect, query)?;
        debug!(
            table = query.table(),
            nested = plan.nested,
            joins = plan.joins.len(),
            "planned query"
        );

        let (stmt, params) = plan.statement(true)?;
        let main = SqlStatement {
            sql: stmt.to_sql(self.dialect),
            params: params.into_values(),
        };
        let count = plan.count_statement()?;

        debug!(sql = %main.sql, params = main.params.len(), "compiled main statement");
        if let Some(count) = &count {
            debug!(sql = %count.sql, "compiled count statement");
        }

        Ok(CompiledQuery {
            main,
            count,
            nested: plan.nested,
            dialect: self.dialect,
            data_source: plan.root.data_source.clone(),
            columns: plan.columns,
        })
    }

    /// SQL text of every statement `query` compiles to, main first.
    pub fn explain(&self, query: &Query) -> CompileResult<Vec<String>> {
        let compiled = self.compile(query)?;
        Ok(std::iter::once(compiled.main.sql)
            .chain(compiled.count.map(|c| c.sql))
            .collect())
    }
}

/// A projected dimension or a hidden `nest_by` grouping column.
struct GroupColumn {
    sql: String,
    sql_alias: String,
}

/// A metric read by the statement, projected or referenced only by HAVING.
struct MetricSlot {
    path: ColumnPath,
    sql: String,
    aggregation: Option<Aggregation>,
    /// The formula aggregates and an outer aggregation applies on top.
    two_pass: bool,
    sql_alias: String,
}

#[derive(Clone, Copy)]
enum Output {
    Dimension(usize),
    Metric(usize),
}

/// Everything resolved for one query, ready to be assembled into statements.
struct Plan<'a, 'q> {
    dialect: Dialect,
    query: &'q Query,
    root: &'a Table,
    root_alias: String,
    inner_alias: String,
    filters: ClassifiedFilters,
    dimensions: Vec<GroupColumn>,
    nest_columns: Vec<GroupColumn>,
    metrics: Vec<MetricSlot>,
    /// Parallel to the query's projections.
    outputs: Vec<Output>,
    where_columns: HashMap<ColumnPath, String>,
    joins: Vec<PlannedJoin<'a>>,
    nested: bool,
    columns: Vec<OutputColumn>,
}

impl<'a, 'q> Plan<'a, 'q> {
    fn build(model: &'a MetadataModel, dialect: Dialect, query: &'q Query) -> CompileResult<Self> {
        let filters = filter::classify(model, query)?;
        let root = model.require_table(query.table())?;
        let resolver = ColumnResolver::new(model, dialect);
        let scope = Scope::new(root, query.table_arguments());
        let mut required: BTreeSet<Vec<String>> = BTreeSet::new();

        let mut dimensions = Vec::new();
        let mut metrics = Vec::new();
        let mut outputs = Vec::with_capacity(query.projections().len());
        let mut columns = Vec::with_capacity(query.projections().len());
        let mut sql_aliases = HashSet::new();

        for projection in query.projections() {
            let path = &projection.path;
            let (_, column) = resolve_path(model, root, path)?;
            let resolved =
                resolver.resolve_column(&scope, &path.joins, &path.column, &path.arguments, path.grain)?;
            required.extend(resolved.joins);

            let sql_alias = fit_identifier(&projection.alias, dialect);
            if !sql_aliases.insert(sql_alias.clone()) {
                return Err(CompileError::DuplicateAlias(sql_alias));
            }
            columns.push(OutputColumn {
                alias: projection.alias.clone(),
                sql_alias: sql_alias.clone(),
                role: projection.role,
                grain: path.grain,
                value_type: column.value_type,
                values: column.values.clone(),
            });

            if projection.role == ColumnRole::Metric {
                outputs.push(Output::Metric(metrics.len()));
                metrics.push(MetricSlot::new(path.clone(), column, resolved.sql, sql_alias));
            } else {
                outputs.push(Output::Dimension(dimensions.len()));
                dimensions.push(GroupColumn {
                    sql: resolved.sql,
                    sql_alias,
                });
            }
        }

        // Metrics only HAVING reads still need a slot in a nested query.
        if let Some(having) = &filters.having_filter {
            for predicate in having.predicates() {
                let (_, column) = resolve_path(model, root, &predicate.column)?;
                if !column.is_metric() || metrics.iter().any(|m: &MetricSlot| m.path.same_column(&predicate.column)) {
                    continue;
                }
                let path = &predicate.column;
                let resolved =
                    resolver.resolve_column(&scope, &path.joins, &path.column, &path.arguments, None)?;
                required.extend(resolved.joins);
                let sql_alias = fit_identifier(&format!("having_{}", metrics.len()), dialect);
                metrics.push(MetricSlot::new(path.clone(), column, resolved.sql, sql_alias));
            }
        }

        let mut where_columns = HashMap::new();
        if let Some(where_filter) = &filters.where_filter {
            for predicate in where_filter.predicates() {
                let path = &predicate.column;
                if where_columns.contains_key(path) {
                    continue;
                }
                let resolved =
                    resolver.resolve_column(&scope, &path.joins, &path.column, &path.arguments, path.grain)?;
                required.extend(resolved.joins);
                where_columns.insert(path.clone(), resolved.sql);
            }
        }

        let nested = metrics.iter().any(|m| m.two_pass);
        let mut nest_columns = Vec::new();
        if nested {
            for slot in &metrics {
                if !slot.two_pass && !slot.reaggregates() {
                    return Err(CompileError::UnsupportedByDialect {
                        dialect: dialect.name().to_string(),
                        feature: format!("re-aggregating '{}' in a nested query", slot.path),
                    });
                }
            }
            let mut seen = HashSet::new();
            for slot in metrics.iter().filter(|m| m.two_pass) {
                let (_, metric) = resolve_path(model, root, &slot.path)?;
                for nest in metric.nest_by_list() {
                    let mut path = slot
                        .path
                        .joins
                        .iter()
                        .fold(ColumnPath::new(&nest.column), |p, j| p.via(j));
                    let (_, column) = resolve_path(model, root, &path)?;
                    let grain = nest.grain.or_else(|| column.default_grain());
                    path.grain = grain;

                    let projected = query
                        .dimensions()
                        .any(|d| d.path.same_column(&path) && d.path.grain == path.grain);
                    if projected {
                        continue;
                    }

                    let name = match grain {
                        Some(g) => format!("nest_{}_{}", path.base_alias(), g),
                        None => format!("nest_{}", path.base_alias()),
                    };
                    let sql_alias = fit_identifier(&name, dialect);
                    if !seen.insert(sql_alias.clone()) {
                        continue;
                    }
                    let resolved = resolver.resolve_column(
                        &scope,
                        &path.joins,
                        &path.column,
                        &path.arguments,
                        path.grain,
                    )?;
                    required.extend(resolved.joins);
                    nest_columns.push(GroupColumn {
                        sql: resolved.sql,
                        sql_alias,
                    });
                }
            }
        }

        let joins = plan_joins(model, &resolver, &scope, &required)?;
        let root_alias = resolver.alias_for(root, &[]);
        let inner_alias = fit_identifier(&format!("{}_inner", root_alias), dialect);

        Ok(Self {
            dialect,
            query,
            root,
            root_alias,
            inner_alias,
            filters,
            dimensions,
            nest_columns,
            metrics,
            outputs,
            where_columns,
            joins,
            nested,
            columns,
        })
    }

    /// FROM, joins and WHERE of the statement reading the source table.
    fn base(&self, params: &mut Params) -> CompileResult<SelectStatement> {
        let where_expr = self.render_where(params)?;
        let stmt = SelectStatement::new().from(table_ref(self.root, &self.root_alias));
        Ok(apply_joins(stmt, &self.joins).filter(where_expr))
    }

    /// Assemble the main statement. Sorting and pagination are left off for
    /// the copy wrapped by the count query.
    fn statement(&self, ordered: bool) -> CompileResult<(SelectStatement, Params)> {
        let mut params = Params::new(self.dialect);
        let base = self.base(&mut params)?;

        let mut stmt = if self.nested {
            let mut select: Vec<SelectExpr> = self
                .dimensions
                .iter()
                .chain(&self.nest_columns)
                .map(|g| SelectExpr::new(raw_sql(&g.sql)).with_alias(&g.sql_alias))
                .collect();
            for slot in &self.metrics {
                select.extend(self.partials(slot));
            }
            let group_by = self
                .dimensions
                .iter()
                .chain(&self.nest_columns)
                .map(|g| raw_sql(&g.sql))
                .collect();
            let inner = base.select(select).group_by(group_by);

            let outer_select: Vec<SelectExpr> = self
                .outputs
                .iter()
                .zip(&self.columns)
                .map(|(o, c)| SelectExpr::new(self.output_expr(*o)).with_alias(&c.sql_alias))
                .collect();
            let outer_group = self
                .dimensions
                .iter()
                .map(|g| table_col(&self.inner_alias, &g.sql_alias))
                .collect();
            SelectStatement::new()
                .select(outer_select)
                .from(TableRef::subquery(inner).with_alias(&self.inner_alias))
                .group_by(outer_group)
        } else {
            let select: Vec<SelectExpr> = self
                .outputs
                .iter()
                .zip(&self.columns)
                .map(|(o, c)| SelectExpr::new(self.output_expr(*o)).with_alias(&c.sql_alias))
                .collect();
            let stmt = base.select(select);
            if self.query.is_aggregated() {
                stmt.group_by(self.dimensions.iter().map(|g| raw_sql(&g.sql)).collect())
            } else {
                stmt.distinct()
            }
        };

        stmt = stmt.having(self.render_having(&mut params)?);

        if ordered {
            stmt = stmt.order_by(self.order_by()?);
            if let Some(p) = self.query.pagination() {
                if p.limit.is_some() || p.offset.is_some() {
                    stmt = stmt.limit_offset(p.limit, p.offset);
                }
            }
        }
        Ok((stmt, params))
    }

    /// COUNT companion, when the caller wants a total and grouping exists.
    fn count_statement(&self) -> CompileResult<Option<SqlStatement>> {
        let wants_total = self.query.pagination().is_some_and(|p| p.want_total);
        if !wants_total || self.dimensions.is_empty() {
            return Ok(None);
        }

        let tuple = self.dialect.count_distinct_tuple();
        let simple = !self.nested
            && self.filters.having_filter.is_none()
            && (self.dimensions.len() == 1 || tuple.is_native());

        let (stmt, params) = if simple {
            let mut params = Params::new(self.dialect);
            let mut exprs: Vec<Expr> = self.dimensions.iter().map(|g| raw_sql(&g.sql)).collect();
            let total = if exprs.len() == 1 {
                count_distinct(exprs.remove(0))
            } else {
                let args = match tuple {
                    CountDistinctTuple::Parenthesized => vec![Expr::Tuple(exprs)],
                    _ => exprs,
                };
                Expr::Function {
                    name: "COUNT".into(),
                    args,
                    distinct: true,
                }
            };
            let stmt = self
                .base(&mut params)?
                .select(vec![SelectExpr::new(total).with_alias("total")]);
            (stmt, params)
        } else {
            let (inner, params) = self.statement(false)?;
            let stmt = SelectStatement::new()
                .select(vec![SelectExpr::new(count_star()).with_alias("total")])
                .from(TableRef::subquery(inner).with_alias(PAGINATION_SUBQUERY));
            (stmt, params)
        };

        Ok(Some(SqlStatement {
            sql: stmt.to_sql(self.dialect),
            params: params.into_values(),
        }))
    }

    /// Expression of one projection in the outermost SELECT.
    fn output_expr(&self, output: Output) -> Expr {
        match output {
            Output::Dimension(i) => {
                let g = &self.dimensions[i];
                if self.nested {
                    table_col(&self.inner_alias, &g.sql_alias)
                } else {
                    raw_sql(&g.sql)
                }
            }
            Output::Metric(i) => self.metric_expr(&self.metrics[i]),
        }
    }

    fn metric_expr(&self, slot: &MetricSlot) -> Expr {
        if !self.nested {
            return aggregate(slot.aggregation, raw_sql(&slot.sql));
        }
        let inner = |alias: &str| table_col(&self.inner_alias, alias);
        if slot.two_pass {
            return aggregate(slot.aggregation, inner(&slot.sql_alias));
        }
        match slot.aggregation {
            Some(Aggregation::Count) => sum(inner(&slot.sql_alias)),
            Some(Aggregation::Avg) => sum(inner(&slot.partial("sum", self.dialect)))
                .mul(raw_sql("1.0"))
                .div(sum(inner(&slot.partial("count", self.dialect)))),
            other => aggregate(other, inner(&slot.sql_alias)),
        }
    }

    /// Inner-statement columns a metric contributes in a nested query.
    fn partials(&self, slot: &MetricSlot) -> Vec<SelectExpr> {
        let value = raw_sql(&slot.sql);
        if slot.two_pass {
            return vec![SelectExpr::new(value).with_alias(&slot.sql_alias)];
        }
        match slot.aggregation {
            Some(Aggregation::Avg) => vec![
                SelectExpr::new(sum(value.clone())).with_alias(&slot.partial("sum", self.dialect)),
                SelectExpr::new(count(value)).with_alias(&slot.partial("count", self.dialect)),
            ],
            other => vec![SelectExpr::new(aggregate(other, value)).with_alias(&slot.sql_alias)],
        }
    }

    fn render_where(&self, params: &mut Params) -> CompileResult<Option<Expr>> {
        let Some(filter) = &self.filters.where_filter else {
            return Ok(None);
        };
        let mut column = |p: &Predicate| -> CompileResult<String> {
            self.where_columns
                .get(&p.column)
                .cloned()
                .ok_or_else(|| CompileError::UnknownColumn {
                    table: self.root.name.clone(),
                    column: p.column.to_string(),
                })
        };
        render_filter(filter, self.dialect, params, &mut column).map(Some)
    }

    fn render_having(&self, params: &mut Params) -> CompileResult<Option<Expr>> {
        let Some(filter) = &self.filters.having_filter else {
            return Ok(None);
        };
        let mut column = |p: &Predicate| -> CompileResult<String> {
            if let Some(slot) = self.metrics.iter().find(|m| m.path.same_column(&p.column)) {
                return Ok(self.metric_expr(slot).to_sql(self.dialect));
            }
            let position = self
                .query
                .grouping_projection(&p.column)
                .and_then(|g| self.query.projections().iter().position(|x| x.alias == g.alias))
                .ok_or_else(|| CompileError::UngroupedFilter {
                    column: p.column.to_string(),
                    filter: p.to_string(),
                })?;
            Ok(self.output_expr(self.outputs[position]).to_sql(self.dialect))
        };
        render_filter(filter, self.dialect, params, &mut column).map(Some)
    }

    fn order_by(&self) -> CompileResult<Vec<OrderByExpr>> {
        let mut order = Vec::with_capacity(self.query.sorting().len());
        for sort in self.query.sorting() {
            let position = self
                .query
                .projections()
                .iter()
                .position(|p| p.alias == sort.key);
            let position = match position {
                Some(position) => position,
                None if sort.key == "id" && self.query.is_aggregated() => {
                    return Err(CompileError::InvalidSort(sort.key.clone()))
                }
                None => return Err(CompileError::UnprojectedSort(sort.key.clone())),
            };
            let expr = if self.dialect.use_alias_in_order_by() {
                col(&self.columns[position].sql_alias)
            } else {
                self.output_expr(self.outputs[position])
            };
            order.push(match sort.direction {
                SortDirection::Asc => OrderByExpr::asc(expr),
                SortDirection::Desc => OrderByExpr::desc(expr),
            });
        }
        Ok(order)
    }
}

impl MetricSlot {
    fn new(path: ColumnPath, column: &Column, sql: String, sql_alias: String) -> Self {
        let aggregation = column.aggregation();
        let two_pass = aggregation.is_some() && embeds_aggregate(&sql);
        Self {
            path,
            sql,
            aggregation,
            two_pass,
            sql_alias,
        }
    }

    /// Whether a single-pass partial of this metric can be aggregated again.
    fn reaggregates(&self) -> bool {
        matches!(
            self.aggregation,
            Some(Aggregation::Sum | Aggregation::Min | Aggregation::Max | Aggregation::Count | Aggregation::Avg)
        )
    }

    fn partial(&self, suffix: &str, dialect: Dialect) -> String {
        fit_identifier(&format!("{}_{}", self.sql_alias, suffix), dialect)
    }
}

fn aggregate(aggregation: Option<Aggregation>, expr: Expr) -> Expr {
    match aggregation {
        None => expr,
        Some(Aggregation::Sum) => sum(expr),
        Some(Aggregation::Min) => min(expr),
        Some(Aggregation::Max) => max(expr),
        Some(Aggregation::Count) => count(expr),
        Some(Aggregation::CountDistinct) => count_distinct(expr),
        Some(Aggregation::Avg) => avg(expr),
    }
}
