//! Typed result values.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::metadata::TimeGrain;

/// A hydrated cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Integer(i64),
    Decimal(f64),
    Text(String),
    Boolean(bool),
    Time(GrainValue),
    /// One of a column's declared values.
    Enum(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Decimal(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Decimal(x) => write!(f, "{}", x),
            Value::Text(s) | Value::Enum(s) => f.write_str(s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Time(t) => write!(f, "{}", t),
        }
    }
}

/// A timestamp truncated to a grain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrainValue {
    pub grain: TimeGrain,
    pub value: NaiveDateTime,
}

impl GrainValue {
    pub fn new(grain: TimeGrain, value: NaiveDateTime) -> Self {
        Self {
            grain,
            value: grain.truncate(value),
        }
    }

    /// Parse text as returned by a database, truncating to `grain`.
    pub fn parse(grain: TimeGrain, text: &str) -> Option<Self> {
        parse_timestamp(text).map(|v| Self::new(grain, v))
    }

    /// Interpret integer epoch seconds, truncating to `grain`.
    pub fn from_epoch(grain: TimeGrain, seconds: i64) -> Option<Self> {
        DateTime::from_timestamp(seconds, 0).map(|dt| Self::new(grain, dt.naive_utc()))
    }
}

impl fmt::Display for GrainValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.grain.format(self.value))
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    // Grain renderings: `2024-03-05T10`, `2024-03-05`, `2024-03`, `2024`.
    if let Some((date, hour)) = text.split_once('T') {
        let hour: u32 = hour.parse().ok()?;
        return NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .ok()?
            .and_hms_opt(hour, 0, 0);
    }
    let date = match text.len() {
        4 => NaiveDate::from_ymd_opt(text.parse().ok()?, 1, 1),
        7 => NaiveDate::parse_from_str(&format!("{}-01", text), "%Y-%m-%d").ok(),
        _ => NaiveDate::parse_from_str(text, "%Y-%m-%d").ok(),
    }?;
    date.and_hms_opt(0, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(text: &str, grain: TimeGrain) -> String {
        GrainValue::parse(grain, text).unwrap().to_string()
    }

    #[test]
    fn test_parse_and_format_by_grain() {
        assert_eq!(at("2024-03-05 10:42:17", TimeGrain::Year), "2024");
        assert_eq!(at("2024-03-05 10:42:17", TimeGrain::Month), "2024-03");
        assert_eq!(at("2024-03-05 10:42:17", TimeGrain::Day), "2024-03-05");
        assert_eq!(at("2024-03-05T10:42:17", TimeGrain::Hour), "2024-03-05T10");
        assert_eq!(at("2024-03-05T10:42:17Z", TimeGrain::Minute), "2024-03-05T10:42");
        assert_eq!(at("2024-03-01", TimeGrain::Month), "2024-03");
        assert_eq!(at("2024-03", TimeGrain::Month), "2024-03");
        assert_eq!(at("2024", TimeGrain::Year), "2024");
    }

    #[test]
    fn test_epoch_seconds() {
        let v = GrainValue::from_epoch(TimeGrain::Day, 1_709_633_000).unwrap();
        assert_eq!(v.to_string(), "2024-03-05");
    }

    #[test]
    fn test_unparseable_text() {
        assert!(GrainValue::parse(TimeGrain::Day, "yesterday").is_none());
    }

    #[test]
    fn test_value_serde_keeps_variant() {
        let v = Value::Enum("Gold".into());
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"type":"enum","value":"Gold"}"#);
        assert_eq!(serde_json::from_str::<Value>(&json).unwrap(), v);
    }
}
