//! Field-value validation and coercion against schema types.
//!
//! Validation checks shape without rewriting the value; coercion converts a
//! value into the canonical form for its declared type (for example BOOLEAN
//! integers scanned back from storage become JSON booleans).

use super::types::FieldType;
use crate::error::{ErrorKind, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Number, Value};

const TIMESTAMP_LAYOUTS: [&str; 2] = ["%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%d %H:%M:%S"];

/// Parse a timestamp in one of the accepted layouts; first match wins.
/// RFC3339 is tried first, then the two fixed layouts interpreted as UTC.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }
    for layout in TIMESTAMP_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, layout) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(ErrorKind::InvalidTimestamp.with_reason(format!("cannot parse timestamp: {input}")))
}

/// Engine-written timestamps: UTC RFC3339 with microseconds. Values in this
/// form compare lexicographically, which keeps `updated_at` strictly
/// advancing across successive writes.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Validate a value against a field type without converting it.
pub fn validate_value(value: &Value, field_type: FieldType) -> Result<()> {
    match field_type {
        FieldType::Text => match value {
            Value::String(_) => Ok(()),
            other => Err(type_error("string", other)),
        },
        FieldType::Numeric => match value {
            Value::Number(_) => Ok(()),
            other => Err(type_error("number", other)),
        },
        FieldType::Integer => match value {
            Value::Number(n) if n.as_i64().is_some() || n.as_u64().is_some() => Ok(()),
            other => Err(type_error("integer", other)),
        },
        FieldType::Boolean => match value {
            Value::Bool(_) => Ok(()),
            other => Err(type_error("boolean", other)),
        },
        FieldType::Timestamp => match value {
            Value::String(s) => parse_timestamp(s).map(|_| ()),
            _ => Err(ErrorKind::InvalidTimestamp.with_reason("not a string value")),
        },
        FieldType::Json => match value {
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(_) => Ok(()),
                Err(err) => Err(ErrorKind::InvalidJson.with_reason(err.to_string())),
            },
            Value::Object(_) | Value::Array(_) => Ok(()),
            _ => Err(ErrorKind::InvalidJson.with_reason("invalid JSON type")),
        },
    }
}

/// Convert a value to the canonical form for a field type. Unlike
/// [`validate_value`], strings parseable as numbers are accepted here.
pub fn coerce_value(value: Value, field_type: FieldType) -> Result<Value> {
    match field_type {
        FieldType::Text => Ok(match value {
            Value::String(_) => value,
            Value::Bool(b) => Value::String(b.to_string()),
            Value::Number(n) => Value::String(n.to_string()),
            other => other,
        }),
        FieldType::Numeric => match value {
            Value::Number(_) => Ok(value),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(f) => Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| type_error("number", &Value::String(s))),
                Err(_) => Err(ErrorKind::InvalidFieldType
                    .with_reason(format!("cannot convert string '{s}' to number"))),
            },
            other => Err(type_error("number", &other)),
        },
        FieldType::Integer => match value {
            Value::Number(n) if n.as_i64().is_some() => Ok(Value::Number(n)),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(Value::Number((f as i64).into())),
                _ => Err(type_error("integer", &Value::Number(n))),
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(|i| Value::Number(i.into()))
                .map_err(|_| {
                    ErrorKind::InvalidFieldType
                        .with_reason(format!("cannot convert string '{s}' to integer"))
                }),
            other => Err(type_error("integer", &other)),
        },
        FieldType::Boolean => match value {
            Value::Bool(_) => Ok(value),
            Value::Number(n) => Ok(Value::Bool(n.as_i64().unwrap_or(0) != 0)),
            Value::String(s) => match s.as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(ErrorKind::InvalidFieldType
                    .with_reason(format!("cannot convert string '{s}' to boolean"))),
            },
            other => Err(type_error("boolean", &other)),
        },
        FieldType::Timestamp => match value {
            Value::String(s) => {
                parse_timestamp(&s)?;
                Ok(Value::String(s))
            }
            other => Err(ErrorKind::InvalidTimestamp
                .with_reason(format!("cannot convert {} to timestamp", kind_of(&other)))),
        },
        FieldType::Json => match value {
            Value::String(s) => serde_json::from_str::<Value>(&s)
                .map_err(|err| ErrorKind::InvalidJson.with_reason(err.to_string())),
            Value::Object(_) | Value::Array(_) => Ok(value),
            other => Err(ErrorKind::InvalidJson
                .with_reason(format!("cannot convert {} to JSON", kind_of(&other)))),
        },
    }
}

fn type_error(expected: &str, got: &Value) -> crate::error::Error {
    ErrorKind::InvalidFieldType.with_reason(format!("expected {expected}, got {}", kind_of(got)))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
