//! Time grains for time dimensions.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Temporal granularity at which a time dimension is projected.
///
/// Variants are ordered from finest to coarsest, so `Ord` can be used to
/// pick the finer of two grains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGrain {
    Second,
    Minute,
    Hour,
    Day,
    /// Monday-start week.
    IsoWeek,
    /// Sunday-start week.
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGrain {
    pub const ALL: [TimeGrain; 9] = [
        TimeGrain::Second,
        TimeGrain::Minute,
        TimeGrain::Hour,
        TimeGrain::Day,
        TimeGrain::IsoWeek,
        TimeGrain::Week,
        TimeGrain::Month,
        TimeGrain::Quarter,
        TimeGrain::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGrain::Second => "second",
            TimeGrain::Minute => "minute",
            TimeGrain::Hour => "hour",
            TimeGrain::Day => "day",
            TimeGrain::IsoWeek => "iso_week",
            TimeGrain::Week => "week",
            TimeGrain::Month => "month",
            TimeGrain::Quarter => "quarter",
            TimeGrain::Year => "year",
        }
    }

    /// Truncate a timestamp to the start of its grain bucket.
    pub fn truncate(&self, value: NaiveDateTime) -> NaiveDateTime {
        let date = value.date();
        let midnight = |d: NaiveDate| d.and_hms_opt(0, 0, 0).unwrap_or(value);
        match self {
            TimeGrain::Second => value.with_nanosecond(0).unwrap_or(value),
            TimeGrain::Minute => date
                .and_hms_opt(value.hour(), value.minute(), 0)
                .unwrap_or(value),
            TimeGrain::Hour => date.and_hms_opt(value.hour(), 0, 0).unwrap_or(value),
            TimeGrain::Day => midnight(date),
            TimeGrain::IsoWeek => {
                let back = date.weekday().num_days_from_monday() as i64;
                midnight(date - Duration::days(back))
            }
            TimeGrain::Week => {
                let back = date.weekday().num_days_from_sunday() as i64;
                midnight(date - Duration::days(back))
            }
            TimeGrain::Month => midnight(date.with_day(1).unwrap_or(date)),
            TimeGrain::Quarter => {
                let month = (date.month0() / 3) * 3 + 1;
                midnight(NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date))
            }
            TimeGrain::Year => {
                midnight(NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date))
            }
        }
    }

    /// Render a (truncated) timestamp the way result rows show it.
    pub fn format(&self, value: NaiveDateTime) -> String {
        match self {
            TimeGrain::Second => value.format("%Y-%m-%dT%H:%M:%S").to_string(),
            TimeGrain::Minute => value.format("%Y-%m-%dT%H:%M").to_string(),
            TimeGrain::Hour => value.format("%Y-%m-%dT%H").to_string(),
            TimeGrain::Day | TimeGrain::IsoWeek | TimeGrain::Week => {
                value.format("%Y-%m-%d").to_string()
            }
            TimeGrain::Month => value.format("%Y-%m").to_string(),
            TimeGrain::Quarter => format!("{}-Q{}", value.year(), value.month0() / 3 + 1),
            TimeGrain::Year => value.format("%Y").to_string(),
        }
    }
}

impl fmt::Display for TimeGrain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeGrain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "second" => Ok(TimeGrain::Second),
            "minute" => Ok(TimeGrain::Minute),
            "hour" => Ok(TimeGrain::Hour),
            "day" => Ok(TimeGrain::Day),
            "iso_week" | "isoweek" => Ok(TimeGrain::IsoWeek),
            "week" => Ok(TimeGrain::Week),
            "month" => Ok(TimeGrain::Month),
            "quarter" => Ok(TimeGrain::Quarter),
            "year" => Ok(TimeGrain::Year),
            other => Err(format!("unknown time grain '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_ordering_finest_first() {
        assert!(TimeGrain::Day < TimeGrain::Month);
        assert!(TimeGrain::Second < TimeGrain::Year);
        assert_eq!(
            TimeGrain::Month.min(TimeGrain::Day),
            TimeGrain::Day
        );
    }

    #[test]
    fn test_from_str_roundtrip() {
        for grain in TimeGrain::ALL {
            assert_eq!(grain.as_str().parse::<TimeGrain>().unwrap(), grain);
        }
        assert_eq!("MONTH".parse::<TimeGrain>().unwrap(), TimeGrain::Month);
        assert!("fortnight".parse::<TimeGrain>().is_err());
    }

    #[test]
    fn test_truncate() {
        let v = ts("2024-05-15 13:47:12");
        assert_eq!(TimeGrain::Hour.truncate(v), ts("2024-05-15 13:00:00"));
        assert_eq!(TimeGrain::Day.truncate(v), ts("2024-05-15 00:00:00"));
        assert_eq!(TimeGrain::Month.truncate(v), ts("2024-05-01 00:00:00"));
        assert_eq!(TimeGrain::Quarter.truncate(v), ts("2024-04-01 00:00:00"));
        assert_eq!(TimeGrain::Year.truncate(v), ts("2024-01-01 00:00:00"));
    }

    #[test]
    fn test_truncate_weeks() {
        // 2024-05-15 is a Wednesday
        let v = ts("2024-05-15 13:47:12");
        assert_eq!(TimeGrain::IsoWeek.truncate(v), ts("2024-05-13 00:00:00"));
        assert_eq!(TimeGrain::Week.truncate(v), ts("2024-05-12 00:00:00"));
    }

    #[test]
    fn test_format() {
        let v = ts("2024-03-05 10:00:00");
        assert_eq!(TimeGrain::Year.format(v), "2024");
        assert_eq!(TimeGrain::Month.format(v), "2024-03");
        assert_eq!(TimeGrain::Day.format(v), "2024-03-05");
        assert_eq!(TimeGrain::Hour.format(v), "2024-03-05T10");
        assert_eq!(TimeGrain::Quarter.format(v), "2024-Q1");
    }
}
