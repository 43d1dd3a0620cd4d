//! Text rendering of DuckDB values.

use chrono::{DateTime, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, Value};

/// Days between 0001-01-01 and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Render a cell the way the engine would print it.
pub(crate) fn render(value: Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Boolean(v) => v.to_string(),
        Value::TinyInt(v) => v.to_string(),
        Value::SmallInt(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::HugeInt(v) => v.to_string(),
        Value::UTinyInt(v) => v.to_string(),
        Value::USmallInt(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::UBigInt(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Decimal(v) => v.to_string(),
        Value::Text(v) => v,
        Value::Blob(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            format!("\\x{}", hex)
        }
        Value::Timestamp(unit, raw) => render_timestamp(unit, raw),
        Value::Date32(days) => render_date(days),
        Value::Time64(unit, raw) => render_time(unit, raw),
        other => format!("{:?}", other),
    }
}

fn to_micros(unit: TimeUnit, raw: i64) -> i64 {
    match unit {
        TimeUnit::Second => raw.saturating_mul(1_000_000),
        TimeUnit::Millisecond => raw.saturating_mul(1_000),
        TimeUnit::Microsecond => raw,
        TimeUnit::Nanosecond => raw / 1_000,
    }
}

fn render_timestamp(unit: TimeUnit, raw: i64) -> String {
    let micros = to_micros(unit, raw);
    match DateTime::from_timestamp_micros(micros) {
        Some(ts) => ts.naive_utc().to_string(),
        None => micros.to_string(),
    }
}

fn render_date(days: i32) -> String {
    days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .map(|date| date.to_string())
        .unwrap_or_else(|| days.to_string())
}

fn render_time(unit: TimeUnit, raw: i64) -> String {
    let micros = to_micros(unit, raw);
    let secs = u32::try_from(micros.div_euclid(1_000_000)).ok();
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    secs.and_then(|s| NaiveTime::from_num_seconds_from_midnight_opt(s, nanos))
        .map(|time| time.to_string())
        .unwrap_or_else(|| micros.to_string())
}
