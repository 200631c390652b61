//! Conversion of DuckDB values to JSON

use chrono::{DateTime, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, Value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as JsonValue};

/// Name and DuckDB type of a result column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Days between 0001-01-01 and 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Convert one DuckDB value into its JSON representation.
///
/// Integers that JSON numbers cannot hold exactly (HUGEINT beyond i64,
/// DECIMAL) and non-finite floats become strings. Dates and times use ISO 8601.
pub fn duckdb_value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(*b),
        Value::TinyInt(i) => JsonValue::from(*i),
        Value::SmallInt(i) => JsonValue::from(*i),
        Value::Int(i) => JsonValue::from(*i),
        Value::BigInt(i) => JsonValue::from(*i),
        Value::HugeInt(i) => match i64::try_from(*i) {
            Ok(small) => JsonValue::from(small),
            Err(_) => JsonValue::String(i.to_string()),
        },
        Value::UTinyInt(i) => JsonValue::from(*i),
        Value::USmallInt(i) => JsonValue::from(*i),
        Value::UInt(i) => JsonValue::from(*i),
        Value::UBigInt(i) => JsonValue::from(*i),
        Value::Float(f) => float_to_json(f64::from(*f)),
        Value::Double(f) => float_to_json(*f),
        Value::Decimal(d) => JsonValue::String(d.to_string()),
        Value::Text(s) | Value::Enum(s) => JsonValue::String(s.clone()),
        Value::Blob(bytes) => JsonValue::String(format!("\\x{}", hex::encode(bytes))),
        Value::Date32(days) => date_to_json(*days),
        Value::Time64(unit, raw) => time_to_json(*unit, *raw),
        Value::Timestamp(unit, raw) => timestamp_to_json(*unit, *raw),
        Value::Interval {
            months,
            days,
            nanos,
        } => JsonValue::String(format!("{} months {} days {} ns", months, days, nanos)),
        Value::List(items) | Value::Array(items) => {
            JsonValue::Array(items.iter().map(duckdb_value_to_json).collect())
        }
        Value::Struct(fields) => {
            let mut object = Map::new();
            for (name, field) in fields.iter() {
                object.insert(name.clone(), duckdb_value_to_json(field));
            }
            JsonValue::Object(object)
        }
        Value::Map(entries) => JsonValue::Array(
            entries
                .iter()
                .map(|(key, value)| {
                    serde_json::json!({
                        "key": duckdb_value_to_json(key),
                        "value": duckdb_value_to_json(value),
                    })
                })
                .collect(),
        ),
        Value::Union(inner) => duckdb_value_to_json(inner),
        #[allow(unreachable_patterns)]
        other => JsonValue::String(format!("{:?}", other)),
    }
}

fn float_to_json(f: f64) -> JsonValue {
    Number::from_f64(f)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(f.to_string()))
}

fn to_micros(unit: TimeUnit, raw: i64) -> i64 {
    match unit {
        TimeUnit::Second => raw.saturating_mul(1_000_000),
        TimeUnit::Millisecond => raw.saturating_mul(1_000),
        TimeUnit::Microsecond => raw,
        TimeUnit::Nanosecond => raw / 1_000,
    }
}

fn date_to_json(days: i32) -> JsonValue {
    days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .map(|date| JsonValue::String(date.format("%Y-%m-%d").to_string()))
        .unwrap_or_else(|| JsonValue::from(days))
}

fn time_to_json(unit: TimeUnit, raw: i64) -> JsonValue {
    let micros = to_micros(unit, raw);
    let secs = u32::try_from(micros.div_euclid(1_000_000)).ok();
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;

    secs.and_then(|secs| NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos))
        .map(|time| JsonValue::String(time.format("%H:%M:%S%.f").to_string()))
        .unwrap_or_else(|| JsonValue::from(raw))
}

fn timestamp_to_json(unit: TimeUnit, raw: i64) -> JsonValue {
    DateTime::from_timestamp_micros(to_micros(unit, raw))
        .map(|ts| JsonValue::String(ts.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
        .unwrap_or_else(|| JsonValue::from(raw))
}
