//! Decoding PostgreSQL rows into engine rows.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Column, Row as _, TypeInfo};
use tracing::warn;
use uuid::Uuid;

use query_engine::{EngineError, EngineResult, FieldValue, Row};

/// How a PostgreSQL column is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Bytes,
    TimestampTz,
    Timestamp,
    Date,
    Time,
    Json,
    Uuid,
    Unsupported,
}

impl ColumnKind {
    pub fn from_type_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "BOOL" => ColumnKind::Bool,
            "INT2" => ColumnKind::Int2,
            "INT4" => ColumnKind::Int4,
            "INT8" => ColumnKind::Int8,
            "FLOAT4" => ColumnKind::Float4,
            "FLOAT8" => ColumnKind::Float8,
            "NUMERIC" => ColumnKind::Numeric,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => ColumnKind::Text,
            "BYTEA" => ColumnKind::Bytes,
            "TIMESTAMPTZ" => ColumnKind::TimestampTz,
            "TIMESTAMP" => ColumnKind::Timestamp,
            "DATE" => ColumnKind::Date,
            "TIME" => ColumnKind::Time,
            "JSON" | "JSONB" => ColumnKind::Json,
            "UUID" => ColumnKind::Uuid,
            _ => ColumnKind::Unsupported,
        }
    }
}

/// Convert a fetched row into column/value pairs, preserving column order.
pub fn decode_row(row: &PgRow) -> EngineResult<Row> {
    let mut decoded = Row::new();

    for column in row.columns() {
        let ordinal = column.ordinal();
        let type_name = column.type_info().name();
        let value = match ColumnKind::from_type_name(type_name) {
            ColumnKind::Bool => get::<bool>(row, ordinal)?.into(),
            ColumnKind::Int2 => get::<i16>(row, ordinal)?.map(i64::from).into(),
            ColumnKind::Int4 => get::<i32>(row, ordinal)?.map(i64::from).into(),
            ColumnKind::Int8 => get::<i64>(row, ordinal)?.into(),
            ColumnKind::Float4 => get::<f32>(row, ordinal)?.map(f64::from).into(),
            ColumnKind::Float8 => get::<f64>(row, ordinal)?.into(),
            ColumnKind::Numeric => get::<Decimal>(row, ordinal)?.map(numeric).into(),
            ColumnKind::Text => get::<String>(row, ordinal)?.into(),
            ColumnKind::Bytes => get::<Vec<u8>>(row, ordinal)?.into(),
            ColumnKind::TimestampTz => get::<DateTime<Utc>>(row, ordinal)?.into(),
            ColumnKind::Timestamp => get::<NaiveDateTime>(row, ordinal)?
                .map(|ts| ts.and_utc())
                .into(),
            ColumnKind::Date => get::<NaiveDate>(row, ordinal)?.into(),
            ColumnKind::Time => get::<NaiveTime>(row, ordinal)?
                .map(|t| t.format("%H:%M:%S%.f").to_string())
                .into(),
            ColumnKind::Json => get::<Value>(row, ordinal)?.into(),
            ColumnKind::Uuid => get::<Uuid>(row, ordinal)?
                .map(|id| id.to_string())
                .into(),
            ColumnKind::Unsupported => {
                warn!(column = column.name(), type_name, "Dropping column of unsupported type");
                FieldValue::Null
            }
        };
        decoded.set(column.name(), value);
    }

    Ok(decoded)
}

/// Numbers whose shortest `f64` form reads back as the same decimal are
/// written as JSON numbers; wider ones keep their exact decimal text.
fn numeric(value: Decimal) -> FieldValue {
    let exact = value.normalize().to_string();
    match value.to_f64() {
        Some(f) if f.is_finite() && f.to_string() == exact => FieldValue::Float(f),
        _ => FieldValue::Text(exact),
    }
}

fn get<'r, T>(row: &'r PgRow, ordinal: usize) -> EngineResult<Option<T>>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<Option<T>, _>(ordinal)
        .map_err(|e| EngineError::CorruptRow(format!("column {}: {}", ordinal, e)))
}
