//! WHERE/HAVING classification.
//!
//! Filters arrive as two caller-supplied trees. Each is normalized (NOT
//! pushed to the leaves) and split on its top-level AND chain, at any depth;
//! every conjunct is then placed on its own:
//!
//! ```text
//!   rating = 'A' AND (score > 100 AND country.name = 'NZ')
//!   └─ WHERE ─┘        └ HAVING ┘     └──── WHERE ────┘
//! ```
//!
//! An OR that mixes both sides cannot be split and goes to HAVING whole,
//! which requires every dimension inside it to be grouped.

use crate::error::{CompileError, CompileResult};
use crate::metadata::{embeds_aggregate, Column, MetadataModel, Table, ValueType};
use crate::query::{resolve_path, Arity, FilterExpr, FilterValue, Predicate, Query};
use crate::resolver::{ColumnResolver, Scope};

/// Which clause a predicate is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clause {
    Where,
    Having,
}

/// Filters after placement. Metric predicates in `where_filter` use the raw
/// formula; in `having_filter` they use the aggregated expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifiedFilters {
    pub where_filter: Option<FilterExpr>,
    pub having_filter: Option<FilterExpr>,
}

/// Classify the filters of `query`.
pub fn classify(model: &MetadataModel, query: &Query) -> CompileResult<ClassifiedFilters> {
    FilterClassifier::new(model, query)?.classify()
}

pub struct FilterClassifier<'a> {
    model: &'a MetadataModel,
    query: &'a Query,
    root: &'a Table,
}

impl<'a> FilterClassifier<'a> {
    pub fn new(model: &'a MetadataModel, query: &'a Query) -> CompileResult<Self> {
        Ok(Self {
            model,
            query,
            root: model.require_table(query.table())?,
        })
    }

    pub fn classify(&self) -> CompileResult<ClassifiedFilters> {
        let where_filter = self.query.where_filter().cloned().map(FilterExpr::push_not_down);
        let having_filter = self.query.having_filter().cloned().map(FilterExpr::push_not_down);

        for filter in [&where_filter, &having_filter].into_iter().flatten() {
            for predicate in filter.predicates() {
                let (_, column) = resolve_path(self.model, self.root, &predicate.column)?;
                check_operator(predicate, column)?;
            }
        }

        if !self.query.is_aggregated() {
            let merged = FilterExpr::all(where_filter.into_iter().chain(having_filter));
            if let Some(filter) = &merged {
                for predicate in filter.predicates() {
                    let (_, column) = resolve_path(self.model, self.root, &predicate.column)?;
                    if column.is_metric() {
                        self.check_raw_metric(predicate)?;
                    }
                }
            }
            return Ok(ClassifiedFilters {
                where_filter: merged,
                having_filter: None,
            });
        }

        let mut where_parts = Vec::new();
        let mut having_parts = Vec::new();
        if let Some(filter) = where_filter {
            self.split(filter, Clause::Where, &mut where_parts, &mut having_parts)?;
        }
        if let Some(filter) = having_filter {
            self.split(filter, Clause::Having, &mut where_parts, &mut having_parts)?;
        }

        Ok(ClassifiedFilters {
            where_filter: FilterExpr::all(where_parts),
            having_filter: FilterExpr::all(having_parts),
        })
    }

    fn split(
        &self,
        expr: FilterExpr,
        origin: Clause,
        where_parts: &mut Vec<FilterExpr>,
        having_parts: &mut Vec<FilterExpr>,
    ) -> CompileResult<()> {
        let mut pending = vec![expr];
        let mut conjuncts = Vec::new();
        while let Some(node) = pending.pop() {
            match node {
                FilterExpr::And(a, b) => {
                    pending.push(*b);
                    pending.push(*a);
                }
                other => conjuncts.push(other),
            }
        }

        for conjunct in conjuncts {
            let mut to_where = true;
            let mut to_having = true;
            for predicate in conjunct.predicates() {
                match self.place(predicate, origin)? {
                    Clause::Where => to_having = false,
                    Clause::Having => to_where = false,
                }
            }

            if to_where {
                where_parts.push(conjunct);
            } else if to_having {
                having_parts.push(conjunct);
            } else {
                for predicate in conjunct.predicates() {
                    if self.place(predicate, origin)? == Clause::Where {
                        self.check_promotable(predicate)?;
                    }
                }
                having_parts.push(conjunct);
            }
        }
        Ok(())
    }

    /// Placement of one predicate in an aggregated query.
    fn place(&self, predicate: &Predicate, origin: Clause) -> CompileResult<Clause> {
        let (_, column) = resolve_path(self.model, self.root, &predicate.column)?;

        if column.is_metric() {
            if origin == Clause::Having || self.query.metric_projection(&predicate.column).is_some() {
                return Ok(Clause::Having);
            }
            self.check_raw_metric(predicate)?;
            return Ok(Clause::Where);
        }

        if predicate.column.joins.is_empty()
            && self.query.grouping_projection(&predicate.column).is_none()
        {
            return Err(ungrouped(predicate));
        }
        Ok(Clause::Where)
    }

    /// A predicate dragged into HAVING by a mixed OR must be expressible
    /// after grouping.
    fn check_promotable(&self, predicate: &Predicate) -> CompileResult<()> {
        let (_, column) = resolve_path(self.model, self.root, &predicate.column)?;
        if column.is_metric() {
            return Err(CompileError::FilterType {
                column: predicate.column.to_string(),
                operator: predicate.op.to_string(),
                reason: "an unprojected metric cannot be combined with aggregated predicates in OR"
                    .into(),
            });
        }
        if self.query.grouping_projection(&predicate.column).is_none() {
            return Err(ungrouped(predicate));
        }
        Ok(())
    }

    /// A metric used unaggregated must not already contain an aggregate.
    fn check_raw_metric(&self, predicate: &Predicate) -> CompileResult<()> {
        let resolver = ColumnResolver::new(self.model, Default::default());
        let scope = Scope::new(self.root, self.query.table_arguments());
        let resolved = resolver.resolve_column(
            &scope,
            &predicate.column.joins,
            &predicate.column.column,
            &predicate.column.arguments,
            None,
        )?;
        if embeds_aggregate(&resolved.sql) {
            return Err(CompileError::FilterType {
                column: predicate.column.to_string(),
                operator: predicate.op.to_string(),
                reason: "the metric's formula is already aggregated; project it to filter on it"
                    .into(),
            });
        }
        Ok(())
    }
}

fn ungrouped(predicate: &Predicate) -> CompileError {
    CompileError::UngroupedFilter {
        column: predicate.column.to_string(),
        filter: predicate.to_string(),
    }
}

/// Check operand count and operand/column types.
pub fn check_operator(predicate: &Predicate, column: &Column) -> CompileResult<()> {
    let fail = |reason: String| CompileError::FilterType {
        column: predicate.column.to_string(),
        operator: predicate.op.to_string(),
        reason,
    };

    if predicate.op.is_collection() && column.value_type != ValueType::Collection {
        return Err(fail(format!(
            "requires a collection column, '{}' is {}",
            column.name,
            column.value_type.as_str()
        )));
    }

    let got = predicate.values.len();
    let expected = match predicate.op.arity() {
        Arity::Nullary => Some(0),
        Arity::Unary => Some(1),
        Arity::Binary => Some(2),
        Arity::List => None,
    };
    if let Some(n) = expected {
        if got != n {
            return Err(fail(format!("expects {} operand(s), got {}", n, got)));
        }
    }

    if predicate.values.iter().any(|v| *v == FilterValue::Null) {
        return Err(fail("null operand; use is_null or not_null".into()));
    }
    if predicate.op.needs_text()
        && predicate
            .values
            .iter()
            .any(|v| !matches!(v, FilterValue::Text(_)))
    {
        return Err(fail("operands must be text".into()));
    }
    Ok(())
}
