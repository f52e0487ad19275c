//! Collection metadata and row types.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Surrogate row id column.
pub const ID_COLUMN: &str = "__Id";
/// Geometry column.
pub const GEOMETRY_COLUMN: &str = "MDR_Geometry";
/// Version in which a row was added.
pub const CREATED_VERSION_COLUMN: &str = "CreatedVersion";
/// Version in which a row was retired.
pub const DELETED_VERSION_COLUMN: &str = "DeletedVersion";

/// Columns that never appear as feature properties.
pub const RESERVED_COLUMNS: [&str; 4] = [
    ID_COLUMN,
    GEOMETRY_COLUMN,
    CREATED_VERSION_COLUMN,
    DELETED_VERSION_COLUMN,
];

pub fn is_reserved(column: &str) -> bool {
    RESERVED_COLUMNS.contains(&column)
}

/// A published dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: i32,
    pub name: String,
    /// Physical table name; derived from the location prefix when absent.
    pub table_name: Option<String>,
    pub location_id: i32,
    /// Column used for datetime filtering.
    pub date_column: Option<String>,
    pub published: bool,
}

/// A field of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub column_name: String,
    pub field_type: String,
    /// Whether the field type is returned in data queries.
    pub include_in_data: bool,
}

/// Where a collection's table lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: i32,
    pub schema: String,
    pub table_name_prefix: String,
    /// Table lives in the catalogue database itself.
    pub is_this_database: bool,
    /// Connection details for external databases.
    pub details: Option<Value>,
}

impl Location {
    /// Physical table of a collection stored at this location.
    pub fn table_name_for(&self, collection: &Collection) -> TableName {
        let table = match collection.table_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{}{}", self.table_name_prefix, collection.id),
        };
        TableName::new(self.schema.clone(), table)
    }
}

/// A named place (gauge station, airport, grid square) that collection rows
/// are cached against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedLocation {
    pub id: i32,
    pub name: String,
}

/// Schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    pub schema: String,
    pub table: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Quoted form for SQL (`"schema"."table"`).
    pub fn quoted(&self) -> String {
        if self.schema.is_empty() {
            quote_ident(&self.table)
        } else {
            format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.schema.is_empty() {
            write!(f, "{}", self.table)
        } else {
            write!(f, "{}.{}", self.schema, self.table)
        }
    }
}

/// Quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A typed column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Json(Value),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Instant used for datetime comparisons. Dates are taken at midnight UTC.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(ts) => Some(*ts),
            FieldValue::Date(d) => d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()),
            _ => None,
        }
    }

    /// JSON representation for a feature property.
    ///
    /// Returns `None` for nulls and for non-finite numbers, neither of which
    /// are written as properties.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            FieldValue::Null => None,
            FieldValue::Bool(b) => Some(Value::Bool(*b)),
            FieldValue::Int(i) => Some(Value::from(*i)),
            // from_f64 rejects NaN and infinities
            FieldValue::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number),
            FieldValue::Text(s) => Some(Value::String(s.clone())),
            FieldValue::Bytes(b) => Some(Value::String(hex(b))),
            FieldValue::Timestamp(ts) => Some(Value::String(ts.to_rfc3339())),
            FieldValue::Date(d) => Some(Value::String(d.format("%Y-%m-%d").to_string())),
            FieldValue::Json(v) => Some(v.clone()),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(v)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(v: NaiveDate) -> Self {
        FieldValue::Date(v)
    }
}

impl From<Value> for FieldValue {
    fn from(v: Value) -> Self {
        FieldValue::Json(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// A row returned by storage: ordered column/value pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, FieldValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column append.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(column, value);
        self
    }

    /// Set a column, replacing any previous value.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<FieldValue>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Surrogate id.
    pub fn id(&self) -> Option<i64> {
        self.get(ID_COLUMN).and_then(FieldValue::as_i64)
    }

    /// Geometry as well-known binary.
    pub fn geometry_wkb(&self) -> Option<&[u8]> {
        self.get(GEOMETRY_COLUMN).and_then(FieldValue::as_bytes)
    }

    pub fn created_version(&self) -> Option<i64> {
        self.get(CREATED_VERSION_COLUMN).and_then(FieldValue::as_i64)
    }

    pub fn deleted_version(&self) -> Option<i64> {
        self.get(DELETED_VERSION_COLUMN).and_then(FieldValue::as_i64)
    }

    /// Attributes that become feature properties.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.iter().filter(|(name, _)| !is_reserved(name))
    }
}

impl FromIterator<(String, FieldValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.set(column, value);
        }
        row
    }
}
