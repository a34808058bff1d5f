//! Raw result rows as delivered by an executor.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::ExecutionResult;

/// One untyped cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// Forward-only access to a result set.
pub trait RowCursor: Send {
    /// Column labels, in result order.
    fn columns(&self) -> &[String];

    /// The next row, or `None` once the result set is exhausted.
    fn next_row(&mut self) -> ExecutionResult<Option<Vec<RawValue>>>;
}

/// A cursor over rows already fetched into memory.
#[derive(Debug, Clone, Default)]
pub struct VecCursor {
    columns: Vec<String>,
    rows: VecDeque<Vec<RawValue>>,
}

impl VecCursor {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<RawValue>>) -> Self {
        Self {
            columns,
            rows: rows.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RowCursor for VecCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> ExecutionResult<Option<Vec<RawValue>>> {
        Ok(self.rows.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_cursor_is_forward_only() {
        let mut cursor = VecCursor::new(
            vec!["a".into()],
            vec![vec![RawValue::Integer(1)], vec![RawValue::Null]],
        );
        assert_eq!(cursor.len(), 2);
        assert_eq!(cursor.next_row().unwrap(), Some(vec![RawValue::Integer(1)]));
        assert_eq!(cursor.next_row().unwrap(), Some(vec![RawValue::Null]));
        assert_eq!(cursor.next_row().unwrap(), None);
        assert!(cursor.is_empty());
    }
}
