//! Rendering filter trees into SQL expressions with bound parameters.

use crate::error::{CompileError, CompileResult};
use crate::query::{FilterExpr, FilterValue, Operator, Predicate};
use crate::sql::{and_all, lower, or_all, raw_sql, Dialect, Expr, ExprExt, SqlDialect};

use super::statement::BoundValue;

/// Escape character for LIKE patterns.
const LIKE_ESCAPE: char = '!';

/// Collects bind parameters for one statement, numbering them from 1.
#[derive(Debug)]
pub(crate) struct Params {
    dialect: Dialect,
    values: Vec<BoundValue>,
}

impl Params {
    pub(crate) fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    pub(crate) fn bind(&mut self, value: BoundValue) -> Expr {
        self.values.push(value);
        Expr::Param(self.values.len())
    }

    /// Bind a value and return its placeholder text, for use inside raw SQL.
    fn bind_raw(&mut self, value: BoundValue) -> String {
        self.values.push(value);
        self.dialect.placeholder(self.values.len())
    }

    pub(crate) fn into_values(self) -> Vec<BoundValue> {
        self.values
    }
}

/// Render a filter tree. `column` maps each predicate to the SQL of the
/// value it tests.
pub(crate) fn render_filter<F>(
    expr: &FilterExpr,
    dialect: Dialect,
    params: &mut Params,
    column: &mut F,
) -> CompileResult<Expr>
where
    F: FnMut(&Predicate) -> CompileResult<String>,
{
    Ok(match expr {
        FilterExpr::And(..) => {
            let parts = chain(expr, true)
                .into_iter()
                .map(|e| render_filter(e, dialect, params, column))
                .collect::<CompileResult<Vec<_>>>()?;
            and_all(parts).unwrap_or_else(|| raw_sql("1 = 1"))
        }
        FilterExpr::Or(..) => {
            let parts = chain(expr, false)
                .into_iter()
                .map(|e| render_filter(e, dialect, params, column))
                .collect::<CompileResult<Vec<_>>>()?;
            or_all(parts).unwrap_or_else(|| raw_sql("1 = 0"))
        }
        FilterExpr::Not(inner) => render_filter(inner, dialect, params, column)?.paren().not(),
        FilterExpr::Predicate(p) => {
            let sql = column(p)?;
            render_predicate(&sql, p, dialect, params)?
        }
    })
}

/// Operands of a run of ANDs (or ORs), left to right.
fn chain(expr: &FilterExpr, conjunction: bool) -> Vec<&FilterExpr> {
    match (expr, conjunction) {
        (FilterExpr::And(a, b), true) | (FilterExpr::Or(a, b), false) => {
            let mut parts = chain(a, conjunction);
            parts.extend(chain(b, conjunction));
            parts
        }
        _ => vec![expr],
    }
}

fn render_predicate(
    column_sql: &str,
    predicate: &Predicate,
    dialect: Dialect,
    params: &mut Params,
) -> CompileResult<Expr> {
    let column = raw_sql(column_sql);
    let values = &predicate.values;
    let first = || values.first().map(BoundValue::from).unwrap_or(BoundValue::Null);
    let second = || values.get(1).map(BoundValue::from).unwrap_or(BoundValue::Null);
    let unsupported = || CompileError::UnsupportedByDialect {
        dialect: dialect.name().to_string(),
        feature: format!("{} filter", predicate.op),
    };

    Ok(match predicate.op {
        Operator::Eq => column.eq(params.bind(first())),
        Operator::Ne => column.ne(params.bind(first())),
        Operator::Lt => column.lt(params.bind(first())),
        Operator::Le => column.lte(params.bind(first())),
        Operator::Gt => column.gt(params.bind(first())),
        Operator::Ge => column.gte(params.bind(first())),

        Operator::In | Operator::NotIn => {
            let list = values.iter().map(|v| params.bind(v.into())).collect();
            if predicate.op == Operator::In {
                column.in_list(list)
            } else {
                column.not_in_list(list)
            }
        }
        Operator::InInsensitive | Operator::NotInInsensitive => {
            let list = values
                .iter()
                .map(|v| params.bind(BoundValue::Text(text_of(v).to_lowercase())))
                .collect();
            if predicate.op == Operator::InInsensitive {
                lower(column).in_list(list)
            } else {
                lower(column).not_in_list(list)
            }
        }

        Operator::Between => {
            let low = params.bind(first());
            let high = params.bind(second());
            column.between(low, high)
        }
        Operator::NotBetween => {
            let low = params.bind(first());
            let high = params.bind(second());
            column.not_between(low, high)
        }

        Operator::Prefix
        | Operator::Postfix
        | Operator::Infix
        | Operator::PrefixInsensitive
        | Operator::PostfixInsensitive
        | Operator::InfixInsensitive => {
            let text = values.first().map(text_of).unwrap_or_default();
            let insensitive = matches!(
                predicate.op,
                Operator::PrefixInsensitive
                    | Operator::PostfixInsensitive
                    | Operator::InfixInsensitive
            );
            let text = if insensitive { text.to_lowercase() } else { text };
            let escaped = escape_like(&text);
            let pattern = match predicate.op {
                Operator::Prefix | Operator::PrefixInsensitive => format!("{}%", escaped),
                Operator::Postfix | Operator::PostfixInsensitive => format!("%{}", escaped),
                _ => format!("%{}%", escaped),
            };
            let target = if insensitive { lower(column) } else { column };
            target.like_escape(params.bind(BoundValue::Text(pattern)), LIKE_ESCAPE)
        }

        Operator::IsNull => column.is_null(),
        Operator::NotNull => column.is_not_null(),

        Operator::IsEmpty | Operator::NotEmpty => {
            let sql = dialect.collection_is_empty(column_sql).ok_or_else(unsupported)?;
            if predicate.op == Operator::IsEmpty {
                raw_sql(&sql)
            } else {
                raw_sql(&sql).paren().not()
            }
        }
        Operator::HasMember | Operator::HasNoMember => {
            let placeholder = params.bind_raw(first());
            let sql = dialect
                .collection_contains(column_sql, &placeholder)
                .ok_or_else(unsupported)?;
            if predicate.op == Operator::HasMember {
                raw_sql(&sql)
            } else {
                raw_sql(&sql).paren().not()
            }
        }
    })
}

fn text_of(value: &FilterValue) -> String {
    match value {
        FilterValue::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Escape LIKE wildcards and the escape character itself.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_') || c == LIKE_ESCAPE {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}
