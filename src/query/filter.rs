//! Filter expression trees.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metadata::{Arguments, TimeGrain};

/// A column reached from the source table: zero or more join names, the
/// column, and optionally a grain and argument values.
///
/// Deserializes from either a struct or the short string form
/// `join.join.column@grain`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ColumnPathRepr")]
pub struct ColumnPath {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joins: Vec<String>,
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grain: Option<TimeGrain>,
    #[serde(default, skip_serializing_if = "Arguments::is_empty")]
    pub arguments: Arguments,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColumnPathRepr {
    Short(String),
    Full {
        #[serde(default)]
        joins: Vec<String>,
        column: String,
        #[serde(default)]
        grain: Option<TimeGrain>,
        #[serde(default)]
        arguments: Arguments,
    },
}

impl TryFrom<ColumnPathRepr> for ColumnPath {
    type Error = String;

    fn try_from(repr: ColumnPathRepr) -> Result<Self, Self::Error> {
        match repr {
            ColumnPathRepr::Short(s) => s.parse(),
            ColumnPathRepr::Full {
                joins,
                column,
                grain,
                arguments,
            } => Ok(ColumnPath {
                joins,
                column,
                grain,
                arguments,
            }),
        }
    }
}

impl ColumnPath {
    pub fn new(column: &str) -> Self {
        Self {
            joins: Vec::new(),
            column: column.into(),
            grain: None,
            arguments: Arguments::new(),
        }
    }

    pub fn via(mut self, join: &str) -> Self {
        self.joins.push(join.into());
        self
    }

    pub fn with_grain(mut self, grain: TimeGrain) -> Self {
        self.grain = Some(grain);
        self
    }

    pub fn with_argument(mut self, name: &str, value: &str) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Same column through the same joins with the same arguments. The grain
    /// is not compared.
    pub fn same_column(&self, other: &ColumnPath) -> bool {
        self.joins == other.joins && self.column == other.column && self.arguments == other.arguments
    }

    /// Output name before disambiguation: join names and column joined by `_`.
    pub fn base_alias(&self) -> String {
        let mut name = self.joins.join("_");
        if !name.is_empty() {
            name.push('_');
        }
        name.push_str(&self.column);
        name
    }
}

impl std::str::FromStr for ColumnPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, grain) = match s.split_once('@') {
            Some((path, grain)) => (path, Some(grain.parse::<TimeGrain>()?)),
            None => (s, None),
        };
        let mut parts: Vec<String> = path.split('.').map(|p| p.trim().to_string()).collect();
        if parts.iter().any(String::is_empty) {
            return Err(format!("malformed column path '{}'", s));
        }
        let column = parts.pop().unwrap_or_default();
        Ok(ColumnPath {
            joins: parts,
            column,
            grain,
            arguments: Arguments::new(),
        })
    }
}

impl fmt::Display for ColumnPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for join in &self.joins {
            write!(f, "{}.", join)?;
        }
        write!(f, "{}", self.column)?;
        if let Some(grain) = self.grain {
            write!(f, "@{}", grain)?;
        }
        if !self.arguments.is_empty() {
            let args: Vec<String> = self
                .arguments
                .iter()
                .map(|(k, v)| format!("{}:{}", k, v))
                .collect();
            write!(f, "[{}]", args.join(","))?;
        }
        Ok(())
    }
}

/// Predicate operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    In,
    NotIn,
    InInsensitive,
    NotInInsensitive,
    Lt,
    Le,
    Gt,
    Ge,
    Between,
    NotBetween,
    Prefix,
    Postfix,
    Infix,
    PrefixInsensitive,
    PostfixInsensitive,
    InfixInsensitive,
    IsNull,
    NotNull,
    IsEmpty,
    NotEmpty,
    HasMember,
    HasNoMember,
}

/// Number of operands an operator takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Nullary,
    Unary,
    Binary,
    /// Any number, including zero.
    List,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::InInsensitive => "in_insensitive",
            Operator::NotInInsensitive => "not_in_insensitive",
            Operator::Lt => "lt",
            Operator::Le => "le",
            Operator::Gt => "gt",
            Operator::Ge => "ge",
            Operator::Between => "between",
            Operator::NotBetween => "not_between",
            Operator::Prefix => "prefix",
            Operator::Postfix => "postfix",
            Operator::Infix => "infix",
            Operator::PrefixInsensitive => "prefix_insensitive",
            Operator::PostfixInsensitive => "postfix_insensitive",
            Operator::InfixInsensitive => "infix_insensitive",
            Operator::IsNull => "is_null",
            Operator::NotNull => "not_null",
            Operator::IsEmpty => "is_empty",
            Operator::NotEmpty => "not_empty",
            Operator::HasMember => "has_member",
            Operator::HasNoMember => "has_no_member",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Operator::IsNull | Operator::NotNull | Operator::IsEmpty | Operator::NotEmpty => {
                Arity::Nullary
            }
            Operator::Between | Operator::NotBetween => Arity::Binary,
            Operator::In
            | Operator::NotIn
            | Operator::InInsensitive
            | Operator::NotInInsensitive => Arity::List,
            _ => Arity::Unary,
        }
    }

    /// Operators that only apply to collection-typed columns.
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            Operator::IsEmpty | Operator::NotEmpty | Operator::HasMember | Operator::HasNoMember
        )
    }

    /// Operators whose operands must be text.
    pub fn needs_text(&self) -> bool {
        matches!(
            self,
            Operator::InInsensitive
                | Operator::NotInInsensitive
                | Operator::Prefix
                | Operator::Postfix
                | Operator::Infix
                | Operator::PrefixInsensitive
                | Operator::PostfixInsensitive
                | Operator::InfixInsensitive
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A literal operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Null => f.write_str("null"),
            FilterValue::Bool(b) => write!(f, "{}", b),
            FilterValue::Int(i) => write!(f, "{}", i),
            FilterValue::Float(x) => write!(f, "{}", x),
            FilterValue::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        FilterValue::Int(v)
    }
}

impl From<i32> for FilterValue {
    fn from(v: i32) -> Self {
        FilterValue::Int(v.into())
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        FilterValue::Float(v)
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        FilterValue::Bool(v)
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::Text(v.into())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        FilterValue::Text(v)
    }
}

/// A single comparison against a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: ColumnPath,
    pub op: Operator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<FilterValue>,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.column, self.op)?;
        for (i, v) in self.values.iter().enumerate() {
            write!(f, "{}{}", if i == 0 { " " } else { ", " }, v)?;
        }
        Ok(())
    }
}

/// Binary boolean tree over predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterExpr {
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
    Predicate(Predicate),
}

impl FilterExpr {
    pub fn predicate(
        column: impl Into<ColumnPath>,
        op: Operator,
        values: Vec<FilterValue>,
    ) -> Self {
        FilterExpr::Predicate(Predicate {
            column: column.into(),
            op,
            values,
        })
    }

    pub fn and(self, other: FilterExpr) -> Self {
        FilterExpr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: FilterExpr) -> Self {
        FilterExpr::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        FilterExpr::Not(Box::new(self))
    }

    /// Every predicate in the tree, left to right.
    pub fn predicates(&self) -> Vec<&Predicate> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                FilterExpr::And(a, b) | FilterExpr::Or(a, b) => {
                    stack.push(b);
                    stack.push(a);
                }
                FilterExpr::Not(inner) => stack.push(inner),
                FilterExpr::Predicate(p) => out.push(p),
            }
        }
        out
    }

    /// Push NOT down to the leaves with De Morgan's laws. Double negation
    /// cancels; a NOT directly over a predicate stays.
    pub fn push_not_down(self) -> Self {
        match self {
            FilterExpr::Not(inner) => match *inner {
                FilterExpr::Not(x) => x.push_not_down(),
                FilterExpr::And(a, b) => a.not().push_not_down().or(b.not().push_not_down()),
                FilterExpr::Or(a, b) => a.not().push_not_down().and(b.not().push_not_down()),
                leaf @ FilterExpr::Predicate(_) => leaf.not(),
            },
            FilterExpr::And(a, b) => a.push_not_down().and(b.push_not_down()),
            FilterExpr::Or(a, b) => a.push_not_down().or(b.push_not_down()),
            leaf => leaf,
        }
    }

    /// AND together a list of filters.
    pub fn all(filters: impl IntoIterator<Item = FilterExpr>) -> Option<FilterExpr> {
        filters.into_iter().reduce(FilterExpr::and)
    }
}

impl From<&str> for ColumnPath {
    fn from(s: &str) -> Self {
        s.parse().unwrap_or_else(|_| ColumnPath::new(s))
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::And(a, b) => write!(f, "({} AND {})", a, b),
            FilterExpr::Or(a, b) => write!(f, "({} OR {})", a, b),
            FilterExpr::Not(x) => write!(f, "NOT {}", x),
            FilterExpr::Predicate(p) => write!(f, "{}", p),
        }
    }
}
