//! Column definitions: metrics, dimensions and time dimensions.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::grain::TimeGrain;

/// Matches an aggregate function call anywhere in expanded SQL.
static AGGREGATE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(SUM|MIN|MAX|COUNT|AVG)\s*\(").expect("aggregate pattern is valid")
});

/// Whether an expanded SQL fragment contains an aggregate function call.
pub fn embeds_aggregate(sql: &str) -> bool {
    AGGREGATE_CALL.is_match(sql)
}

/// Value type of a column or argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    Text,
    Integer,
    Decimal,
    Boolean,
    Time,
    Id,
    Collection,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Text => "text",
            ValueType::Integer => "integer",
            ValueType::Decimal => "decimal",
            ValueType::Boolean => "boolean",
            ValueType::Time => "time",
            ValueType::Id => "id",
            ValueType::Collection => "collection",
        }
    }
}

/// Outer aggregation applied when a metric is projected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Min,
    Max,
    Count,
    CountDistinct,
    Avg,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Count => "count",
            Aggregation::CountDistinct => "count_distinct",
            Aggregation::Avg => "avg",
        }
    }
}

/// A declared argument of a column or table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentDef {
    pub name: String,
    #[serde(default)]
    pub value_type: ValueType,
    /// When set, values must be one of these.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ArgumentDef {
    pub fn new(name: &str, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            allowed_values: None,
            default: None,
        }
    }

    pub fn with_default(mut self, default: &str) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_allowed_values(mut self, values: &[&str]) -> Self {
        self.allowed_values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    /// Check a value before it is spliced into SQL.
    ///
    /// Returns the reason on failure.
    pub fn validate(&self, value: &str) -> Result<(), String> {
        if let Some(allowed) = &self.allowed_values {
            if !allowed.iter().any(|a| a == value) {
                return Err(format!(
                    "'{}' is not one of [{}]",
                    value,
                    allowed.join(", ")
                ));
            }
            return Ok(());
        }
        match self.value_type {
            ValueType::Integer | ValueType::Id => value
                .parse::<i64>()
                .map(|_| ())
                .map_err(|_| format!("'{}' is not an integer", value)),
            ValueType::Decimal => value
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(|_| ())
                .ok_or_else(|| format!("'{}' is not a decimal", value)),
            ValueType::Boolean => match value {
                "true" | "false" => Ok(()),
                _ => Err(format!("'{}' is not a boolean", value)),
            },
            ValueType::Text | ValueType::Time | ValueType::Collection => {
                if is_safe_text(value) {
                    Ok(())
                } else {
                    Err(format!(
                        "'{}' may only contain letters, digits, spaces and _ - . : characters",
                        value
                    ))
                }
            }
        }
    }
}

fn is_safe_text(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | ' '))
}

/// A grain supported by a time dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrainDef {
    pub grain: TimeGrain,
    /// Replaces the dialect truncation. May use `{{$$column.expr}}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

/// A dimension the inner pass of a two-pass metric must group by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NestBy {
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grain: Option<TimeGrain>,
}

/// What kind of column this is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnKind {
    Metric {
        /// `None` means the formula is already fully aggregated.
        #[serde(default)]
        aggregation: Option<Aggregation>,
        #[serde(default)]
        nest_by: Vec<NestBy>,
    },
    Dimension,
    TimeDimension {
        grains: Vec<GrainDef>,
    },
}

/// A column of an analytic table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Templated formula. Empty means `{{$<name>}}`.
    #[serde(default)]
    pub formula: String,
    #[serde(default)]
    pub value_type: ValueType,
    /// Enumerated values; makes the column a nullable enumeration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    #[serde(default)]
    pub arguments: Vec<ArgumentDef>,
    #[serde(flatten)]
    pub kind: ColumnKind,
}

impl Column {
    fn new(name: &str, formula: &str, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            formula: formula.into(),
            value_type: ValueType::default(),
            values: None,
            arguments: Vec::new(),
            kind,
        }
    }

    /// A metric aggregated with `aggregation` when projected.
    pub fn metric(name: &str, formula: &str, aggregation: Aggregation) -> Self {
        Self::new(
            name,
            formula,
            ColumnKind::Metric {
                aggregation: Some(aggregation),
                nest_by: Vec::new(),
            },
        )
        .with_type(ValueType::Decimal)
    }

    /// A metric whose formula is already an aggregate expression.
    pub fn aggregated_metric(name: &str, formula: &str) -> Self {
        Self::new(
            name,
            formula,
            ColumnKind::Metric {
                aggregation: None,
                nest_by: Vec::new(),
            },
        )
        .with_type(ValueType::Decimal)
    }

    pub fn dimension(name: &str, formula: &str) -> Self {
        Self::new(name, formula, ColumnKind::Dimension)
    }

    pub fn time_dimension(name: &str, formula: &str, grains: &[TimeGrain]) -> Self {
        Self::new(
            name,
            formula,
            ColumnKind::TimeDimension {
                grains: grains
                    .iter()
                    .map(|g| GrainDef {
                        grain: *g,
                        formula: None,
                    })
                    .collect(),
            },
        )
        .with_type(ValueType::Time)
    }

    pub fn with_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn with_values(mut self, values: &[&str]) -> Self {
        self.values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn with_argument(mut self, argument: ArgumentDef) -> Self {
        self.arguments.push(argument);
        self
    }

    /// Override the formula of one grain. No-op for non-time columns.
    pub fn with_grain_formula(mut self, grain: TimeGrain, formula: &str) -> Self {
        if let ColumnKind::TimeDimension { grains } = &mut self.kind {
            match grains.iter_mut().find(|g| g.grain == grain) {
                Some(def) => def.formula = Some(formula.into()),
                None => grains.push(GrainDef {
                    grain,
                    formula: Some(formula.into()),
                }),
            }
        }
        self
    }

    /// Add a `nest_by` requirement. No-op for non-metrics.
    pub fn nest_by(mut self, column: &str, grain: Option<TimeGrain>) -> Self {
        if let ColumnKind::Metric { nest_by, .. } = &mut self.kind {
            nest_by.push(NestBy {
                column: column.into(),
                grain,
            });
        }
        self
    }

    pub fn is_metric(&self) -> bool {
        matches!(self.kind, ColumnKind::Metric { .. })
    }

    pub fn is_time_dimension(&self) -> bool {
        matches!(self.kind, ColumnKind::TimeDimension { .. })
    }

    pub fn aggregation(&self) -> Option<Aggregation> {
        match &self.kind {
            ColumnKind::Metric { aggregation, .. } => *aggregation,
            _ => None,
        }
    }

    pub fn nest_by_list(&self) -> &[NestBy] {
        match &self.kind {
            ColumnKind::Metric { nest_by, .. } => nest_by,
            _ => &[],
        }
    }

    pub fn grain(&self, grain: TimeGrain) -> Option<&GrainDef> {
        match &self.kind {
            ColumnKind::TimeDimension { grains } => grains.iter().find(|g| g.grain == grain),
            _ => None,
        }
    }

    /// Finest declared grain, used when a time dimension is referenced
    /// without one.
    pub fn default_grain(&self) -> Option<TimeGrain> {
        match &self.kind {
            ColumnKind::TimeDimension { grains } => grains.iter().map(|g| g.grain).min(),
            _ => None,
        }
    }

    pub fn argument(&self, name: &str) -> Option<&ArgumentDef> {
        self.arguments.iter().find(|a| a.name == name)
    }
}
