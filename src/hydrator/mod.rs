//! Result hydration.
//!
//! Maps the raw rows of a compiled query back onto its projections: each
//! row becomes a [`ResultRow`] keyed by projection alias, with cells typed
//! by the projected column.

mod cursor;
mod value;

pub use cursor::{RawValue, RowCursor, VecCursor};
pub use value::{GrainValue, Value};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{HydrationError, HydrationResult};
use crate::generator::{CompiledQuery, OutputColumn};
use crate::metadata::ValueType;
use crate::query::ColumnRole;

/// One hydrated row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Position of the row in the result, from 0.
    pub id: u64,
    pub values: IndexMap<String, Value>,
}

impl ResultRow {
    pub fn get(&self, alias: &str) -> Option<&Value> {
        self.values.get(alias)
    }
}

/// Turns a cursor into typed rows. The cursor can be read once.
pub struct ResultHydrator {
    cursor: Option<Box<dyn RowCursor>>,
    columns: Vec<OutputColumn>,
}

impl ResultHydrator {
    pub fn new(cursor: Box<dyn RowCursor>, compiled: &CompiledQuery) -> Self {
        Self {
            cursor: Some(cursor),
            columns: compiled.columns.clone(),
        }
    }

    /// Iterate the rows. A second call fails with
    /// [`HydrationError::ExhaustedResult`].
    pub fn rows(&mut self) -> HydrationResult<Rows> {
        let cursor = self.cursor.take().ok_or(HydrationError::ExhaustedResult)?;
        let labels = cursor.columns();
        let positions = self
            .columns
            .iter()
            .map(|c| {
                labels
                    .iter()
                    .position(|l| l == &c.sql_alias)
                    .ok_or_else(|| HydrationError::MissingColumn(c.sql_alias.clone()))
            })
            .collect::<HydrationResult<Vec<_>>>()?;
        Ok(Rows {
            cursor,
            columns: self.columns.clone(),
            positions,
            next_id: 0,
            done: false,
        })
    }

    /// Hydrate every row.
    pub fn collect(&mut self) -> HydrationResult<Vec<ResultRow>> {
        self.rows()?.collect()
    }
}

/// Iterator over hydrated rows.
pub struct Rows {
    cursor: Box<dyn RowCursor>,
    columns: Vec<OutputColumn>,
    /// Cursor position of each output column.
    positions: Vec<usize>,
    next_id: u64,
    done: bool,
}

impl Iterator for Rows {
    type Item = HydrationResult<ResultRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let raw = match self.cursor.next_row() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };

        let mut values = IndexMap::with_capacity(self.columns.len());
        for (column, &position) in self.columns.iter().zip(&self.positions) {
            let cell = raw.get(position).unwrap_or(&RawValue::Null);
            match hydrate(column, cell) {
                Ok(value) => {
                    values.insert(column.alias.clone(), value);
                }
                Err(e) => return Some(Err(e)),
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        Some(Ok(ResultRow { id, values }))
    }
}

fn hydrate(column: &OutputColumn, cell: &RawValue) -> HydrationResult<Value> {
    let invalid = |reason: String| HydrationError::InvalidValue {
        alias: column.alias.clone(),
        reason,
    };

    if matches!(cell, RawValue::Null) {
        return Ok(Value::Null);
    }

    if let Some(values) = &column.values {
        return match cell {
            RawValue::Integer(i) => usize::try_from(*i)
                .ok()
                .and_then(|i| values.get(i))
                .map(|v| Value::Enum(v.clone()))
                .ok_or_else(|| invalid(format!("ordinal {} out of range", i))),
            RawValue::Text(s) if values.contains(s) => Ok(Value::Enum(s.clone())),
            other => Err(invalid(format!("{:?} is not a declared value", other))),
        };
    }

    if column.role == ColumnRole::TimeDimension {
        let grain = column
            .grain
            .ok_or_else(|| invalid("time dimension without a grain".into()))?;
        let parsed = match cell {
            RawValue::Text(s) => GrainValue::parse(grain, s),
            RawValue::Integer(i) => GrainValue::from_epoch(grain, *i),
            _ => None,
        };
        return parsed
            .map(Value::Time)
            .ok_or_else(|| invalid(format!("{:?} is not a timestamp", cell)));
    }

    Ok(match (column.value_type, cell) {
        (ValueType::Integer | ValueType::Id, RawValue::Integer(i)) => Value::Integer(*i),
        (ValueType::Integer | ValueType::Id, RawValue::Real(f)) if f.fract() == 0.0 => {
            Value::Integer(*f as i64)
        }
        (ValueType::Decimal, RawValue::Integer(i)) => Value::Decimal(*i as f64),
        (ValueType::Decimal, RawValue::Real(f)) => Value::Decimal(*f),
        (ValueType::Boolean, RawValue::Integer(i)) => Value::Boolean(*i != 0),
        (ValueType::Boolean, RawValue::Text(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Value::Boolean(true),
            "false" | "f" | "0" => Value::Boolean(false),
            _ => return Err(invalid(format!("'{}' is not a boolean", s))),
        },
        (ValueType::Time, RawValue::Text(s)) => Value::Text(s.clone()),
        (_, RawValue::Text(s)) => {
            if matches!(column.value_type, ValueType::Integer | ValueType::Id | ValueType::Decimal)
            {
                return Err(invalid(format!("'{}' is not numeric", s)));
            }
            Value::Text(s.clone())
        }
        (_, RawValue::Integer(i)) => Value::Integer(*i),
        (_, RawValue::Real(f)) => Value::Decimal(*f),
        (_, RawValue::Blob(b)) => Value::Text(String::from_utf8_lossy(b).into_owned()),
        (_, RawValue::Null) => Value::Null,
    })
}
