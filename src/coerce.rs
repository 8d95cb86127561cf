//! Coerce client-supplied JSON values into values for a specific column.
//!
//! Date and time strings are parsed and normalized to ISO 8601, a few SQL keywords are
//! passed through as server-side functions, and intervals accept a number of seconds.

use crate::config::{ColumnInfo, ColumnKind};
use crate::error::ApiError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat};
use serde_json::Value;

/// Strings that stand for the current date or time, evaluated by the database.
pub const CURRENT_TIME_MARKERS: [&str; 3] = ["CURRENT_TIMESTAMP", "CURRENT_DATE", "LOCALTIMESTAMP"];

/// A value destined for a column: a bound parameter or an SQL function call.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Param(Value),
    Function(&'static str),
}

pub fn coerce_value(column: &ColumnInfo, value: Value) -> Result<SqlValue, ApiError> {
    let kind = column.kind;
    if kind.is_temporal() {
        return coerce_temporal(column, value);
    }
    match (kind, value) {
        (ColumnKind::Interval, Value::Number(n)) => {
            let secs = n
                .as_f64()
                .ok_or_else(|| ApiError::BadRequest(format!("invalid interval for {}", column.name)))?;
            Ok(SqlValue::Param(Value::String(format!("{} seconds", secs))))
        }
        (_, v) => Ok(SqlValue::Param(v)),
    }
}

fn coerce_temporal(column: &ColumnInfo, value: Value) -> Result<SqlValue, ApiError> {
    let s = match value {
        Value::Null => return Ok(SqlValue::Param(Value::Null)),
        Value::String(s) => s,
        other => {
            return Err(ApiError::BadRequest(format!(
                "expected a date/time string for {}, got {}",
                column.name, other
            )))
        }
    };
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Ok(SqlValue::Param(Value::Null));
    }
    let upper = trimmed.to_uppercase();
    if let Some(marker) = CURRENT_TIME_MARKERS.iter().find(|m| **m == upper) {
        return Ok(SqlValue::Function(*marker));
    }
    let parsed = match column.kind {
        ColumnKind::Date => parse_date(trimmed).map(|d| d.format("%Y-%m-%d").to_string()),
        ColumnKind::Time => parse_time(trimmed).map(|t| t.format("%H:%M:%S%.f").to_string()),
        ColumnKind::DateTime => parse_naive_datetime(trimmed).map(|d| d.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        _ => DateTime::parse_from_rfc3339(trimmed)
            .map(|d| d.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            .ok()
            .or_else(|| parse_naive_datetime(trimmed).map(|d| d.and_utc().to_rfc3339_opts(SecondsFormat::AutoSi, true))),
    };
    parsed
        .map(|v| SqlValue::Param(Value::String(v)))
        .ok_or_else(|| ApiError::BadRequest(format!("invalid date/time value for {}: {}", column.name, trimmed)))
}

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0)))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_naive_datetime(s).map(|d| d.date()))
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    ["%H:%M:%S%.f", "%H:%M"]
        .iter()
        .find_map(|f| NaiveTime::parse_from_str(s, f).ok())
        .or_else(|| parse_naive_datetime(s).map(|d| d.time()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column(kind: ColumnKind) -> ColumnInfo {
        ColumnInfo {
            name: "c".into(),
            kind,
            pg_type: String::new(),
            nullable: true,
            has_default: false,
            primary_key: false,
            unique: false,
            on_update: None,
            writable: true,
        }
    }

    #[test]
    fn empty_date_strings_become_null() {
        let v = coerce_value(&column(ColumnKind::Date), json!("")).unwrap();
        assert_eq!(v, SqlValue::Param(Value::Null));
    }

    #[test]
    fn current_time_markers_become_functions() {
        let v = coerce_value(&column(ColumnKind::DateTime), json!("current_timestamp")).unwrap();
        assert_eq!(v, SqlValue::Function("CURRENT_TIMESTAMP"));
        let v = coerce_value(&column(ColumnKind::Date), json!("CURRENT_DATE")).unwrap();
        assert_eq!(v, SqlValue::Function("CURRENT_DATE"));
    }

    #[test]
    fn parses_iso_dates_and_times() {
        let v = coerce_value(&column(ColumnKind::DateTime), json!("1900-01-02T03:04:05")).unwrap();
        assert_eq!(v, SqlValue::Param(json!("1900-01-02T03:04:05")));
        let v = coerce_value(&column(ColumnKind::Date), json!("1900-01-02T03:04:05")).unwrap();
        assert_eq!(v, SqlValue::Param(json!("1900-01-02")));
        let v = coerce_value(&column(ColumnKind::Time), json!("13:30")).unwrap();
        assert_eq!(v, SqlValue::Param(json!("13:30:00")));
        let v = coerce_value(&column(ColumnKind::DateTimeTz), json!("2020-05-01T10:00:00+02:00")).unwrap();
        assert_eq!(v, SqlValue::Param(json!("2020-05-01T10:00:00+02:00")));
    }

    #[test]
    fn rejects_garbage_dates() {
        assert!(matches!(
            coerce_value(&column(ColumnKind::DateTime), json!("not a date")),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            coerce_value(&column(ColumnKind::Date), json!(12)),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn intervals_accept_seconds() {
        let v = coerce_value(&column(ColumnKind::Interval), json!(90)).unwrap();
        assert_eq!(v, SqlValue::Param(json!("90 seconds")));
    }

    #[test]
    fn other_kinds_pass_through() {
        let v = coerce_value(&column(ColumnKind::Text), json!("")).unwrap();
        assert_eq!(v, SqlValue::Param(json!("")));
    }
}
