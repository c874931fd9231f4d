// ABOUTME: Dynamic decoding of backend rows into JSON values and param binding
// ABOUTME: Maps driver-level Postgres types to their JSON wire representation
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Driver-level typing for dynamic statements.
//!
//! The gateway does not know result shapes ahead of time, so rows are decoded
//! by inspecting each column's type descriptor. Numbers, strings, booleans,
//! null, timestamps, and byte blobs round-trip through the JSON encoding;
//! arrays and json columns render as nested values. An undecodable column
//! aborts only the statement it belongs to.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row, TypeInfo, ValueRef};
use thiserror::Error;
use uuid::Uuid;

/// A row value the gateway cannot represent as JSON
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The driver failed to read or decode the value
    #[error("{0}")]
    Driver(#[from] sqlx::Error),
    /// The column's type has no JSON mapping
    #[error("unsupported column type {type_name} at index {index}")]
    Unsupported {
        /// Zero-based column index
        index: usize,
        /// Postgres type name from the descriptor
        type_name: String,
    },
}

/// Decode one row into an ordered list of JSON values, descriptor order
///
/// # Errors
///
/// Returns a column-decode error when a value cannot be represented; the
/// caller records it on the owning statement only.
pub fn row_to_values(row: &PgRow) -> Result<Vec<Value>, DecodeError> {
    let mut values = Vec::with_capacity(row.len());
    for idx in 0..row.len() {
        values.push(decode_column(row, idx)?);
    }
    Ok(values)
}

fn decode_column(row: &PgRow, idx: usize) -> Result<Value, DecodeError> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_owned();
    drop(raw);

    let value = match type_name.as_str() {
        "BOOL" => Value::from(row.try_get::<bool, _>(idx)?),
        "INT2" => Value::from(row.try_get::<i16, _>(idx)?),
        "INT4" => Value::from(row.try_get::<i32, _>(idx)?),
        "INT8" => Value::from(row.try_get::<i64, _>(idx)?),
        "OID" => Value::from(row.try_get::<Oid, _>(idx)?.0),
        "FLOAT4" => json_float(f64::from(row.try_get::<f32, _>(idx)?)),
        "FLOAT8" => json_float(row.try_get::<f64, _>(idx)?),
        // Decimal string keeps arbitrary precision intact through JSON
        "NUMERIC" => Value::from(row.try_get::<Decimal, _>(idx)?.to_string()),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Value::from(row.try_get::<String, _>(idx)?),
        "CHAR" => char_value(row.try_get::<i8, _>(idx)?),
        "UUID" => Value::from(row.try_get::<Uuid, _>(idx)?.to_string()),
        "TIMESTAMPTZ" => Value::from(row.try_get::<DateTime<Utc>, _>(idx)?.to_rfc3339()),
        "TIMESTAMP" => timestamp_value(&row.try_get::<NaiveDateTime, _>(idx)?),
        "DATE" => Value::from(row.try_get::<NaiveDate, _>(idx)?.to_string()),
        "TIME" => Value::from(row.try_get::<NaiveTime, _>(idx)?.to_string()),
        "BYTEA" => Value::from(BASE64.encode(row.try_get::<Vec<u8>, _>(idx)?)),
        "JSON" | "JSONB" => row.try_get::<Value, _>(idx)?,
        "VOID" => Value::Null,
        "BOOL[]" => Value::from(row.try_get::<Vec<bool>, _>(idx)?),
        "INT2[]" => Value::from(row.try_get::<Vec<i16>, _>(idx)?),
        "INT4[]" => Value::from(row.try_get::<Vec<i32>, _>(idx)?),
        "INT8[]" => Value::from(row.try_get::<Vec<i64>, _>(idx)?),
        "FLOAT4[]" => Value::Array(
            row.try_get::<Vec<f32>, _>(idx)?
                .into_iter()
                .map(|v| json_float(f64::from(v)))
                .collect(),
        ),
        "FLOAT8[]" => Value::Array(
            row.try_get::<Vec<f64>, _>(idx)?
                .into_iter()
                .map(json_float)
                .collect(),
        ),
        "NUMERIC[]" => Value::Array(
            row.try_get::<Vec<Decimal>, _>(idx)?
                .into_iter()
                .map(|d| Value::from(d.to_string()))
                .collect(),
        ),
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => {
            Value::from(row.try_get::<Vec<String>, _>(idx)?)
        }
        "CHAR[]" => Value::Array(
            row.try_get::<Vec<i8>, _>(idx)?
                .into_iter()
                .map(char_value)
                .collect(),
        ),
        "UUID[]" => Value::Array(
            row.try_get::<Vec<Uuid>, _>(idx)?
                .into_iter()
                .map(|u| Value::from(u.to_string()))
                .collect(),
        ),
        "TIMESTAMPTZ[]" => Value::Array(
            row.try_get::<Vec<DateTime<Utc>>, _>(idx)?
                .into_iter()
                .map(|ts| Value::from(ts.to_rfc3339()))
                .collect(),
        ),
        "TIMESTAMP[]" => Value::Array(
            row.try_get::<Vec<NaiveDateTime>, _>(idx)?
                .iter()
                .map(timestamp_value)
                .collect(),
        ),
        "DATE[]" => Value::Array(
            row.try_get::<Vec<NaiveDate>, _>(idx)?
                .into_iter()
                .map(|d| Value::from(d.to_string()))
                .collect(),
        ),
        "TIME[]" => Value::Array(
            row.try_get::<Vec<NaiveTime>, _>(idx)?
                .into_iter()
                .map(|t| Value::from(t.to_string()))
                .collect(),
        ),
        "BYTEA[]" => Value::Array(
            row.try_get::<Vec<Vec<u8>>, _>(idx)?
                .into_iter()
                .map(|blob| Value::from(BASE64.encode(blob)))
                .collect(),
        ),
        "JSON[]" | "JSONB[]" => Value::Array(row.try_get::<Vec<Value>, _>(idx)?),
        other => {
            return Err(DecodeError::Unsupported {
                index: idx,
                type_name: other.to_owned(),
            })
        }
    };
    Ok(value)
}

// from_f64 rejects NaN and infinities, which JSON cannot carry as numbers
fn json_float(value: f64) -> Value {
    serde_json::Number::from_f64(value).map_or_else(|| Value::from(value.to_string()), Value::Number)
}

// The internal one-byte "char" type is a single ASCII character on the wire
fn char_value(value: i8) -> Value {
    Value::from(char::from(u8::from_ne_bytes(value.to_ne_bytes())).to_string())
}

// Naive timestamps have no zone to encode, so RFC 3339 is off the table
fn timestamp_value(ts: &NaiveDateTime) -> Value {
    Value::from(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

/// Bind positional JSON parameters onto a query
#[must_use]
pub fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.bind(i)
                } else {
                    query.bind(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => query.bind(s.clone()),
            // Arrays and objects travel as jsonb
            nested @ (Value::Array(_) | Value::Object(_)) => query.bind(nested.clone()),
        };
    }
    query
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_json_float_finite() {
        assert_eq!(json_float(1.5), Value::from(1.5));
    }

    #[test]
    fn test_json_float_non_finite_falls_back_to_string() {
        assert_eq!(json_float(f64::NAN), Value::from("NaN"));
        assert_eq!(json_float(f64::INFINITY), Value::from("inf"));
    }

    #[test]
    fn test_char_value_is_single_character_string() {
        assert_eq!(char_value(65), Value::from("A"));
    }

    #[test]
    fn test_timestamp_value_has_no_zone_suffix() {
        let ts = NaiveDate::from_ymd_opt(2025, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(timestamp_value(&ts), Value::from("2025-01-02T03:04:05"));
    }
}
