//! Value types for column data.
//!
//! Values are the atomic data moved between entities, filters and SQLite.
//! The untagged serde representation lets JSON filter payloads deserialize
//! straight into values; column types decide how they are coerced and decoded.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::schema::SqlType;
use crate::{Error, Result};

/// A value that can be stored in a column or used as a filter operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    /// Operand list for set-membership filters; never stored.
    List(Vec<Value>),
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

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::List(_) => "list",
        }
    }

    /// Convert a scalar operand to the representation of a column type.
    ///
    /// Integers widen to reals and text parses into timestamps; every other
    /// mismatch is rejected.
    pub fn coerce(self, sql_type: SqlType) -> Result<Value> {
        match (sql_type, self) {
            (_, Value::Null) => Ok(Value::Null),
            (_, Value::List(_)) => Err(Error::InvalidArgument(
                "list operand is only valid for the 'in' operator".to_string(),
            )),
            (SqlType::Integer, v @ Value::Integer(_)) => Ok(v),
            (SqlType::Real, Value::Integer(i)) => Ok(Value::Real(i as f64)),
            (SqlType::Real, v @ Value::Real(_)) => Ok(v),
            (SqlType::Text, v @ Value::Text(_)) => Ok(v),
            (SqlType::Timestamp, v @ Value::Timestamp(_)) => Ok(v),
            (SqlType::Timestamp, Value::Text(s)) => parse_timestamp(&s).map(Value::Timestamp),
            (ty, other) => Err(Error::InvalidArgument(format!(
                "expected {} value, got {}",
                ty.as_str(),
                other.type_name()
            ))),
        }
    }

    /// Decode a raw SQLite value according to the declared column type
    pub fn decode(sql_type: SqlType, raw: ValueRef<'_>) -> FromSqlResult<Value> {
        if let ValueRef::Null = raw {
            return Ok(Value::Null);
        }
        match sql_type {
            SqlType::Integer => i64::column_result(raw).map(Value::Integer),
            SqlType::Real => f64::column_result(raw).map(Value::Real),
            SqlType::Text => String::column_result(raw).map(Value::Text),
            SqlType::Timestamp => DateTime::<Utc>::column_result(raw).map(Value::Timestamp),
        }
    }

    /// Decode a column with no declared type, by its storage class
    pub fn decode_any(raw: ValueRef<'_>) -> FromSqlResult<Value> {
        match raw {
            ValueRef::Null => Ok(Value::Null),
            ValueRef::Integer(i) => Ok(Value::Integer(i)),
            ValueRef::Real(f) => Ok(Value::Real(f)),
            ValueRef::Text(_) => String::column_result(raw).map(Value::Text),
            ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (taken as UTC) and bare dates.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Some(naive) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(naive.and_utc());
    }
    Err(Error::InvalidArgument(format!("invalid timestamp: {}", s)))
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Null => Ok(ToSqlOutput::Owned(rusqlite::types::Value::Null)),
            Value::Integer(i) => Ok(ToSqlOutput::from(*i)),
            Value::Real(f) => Ok(ToSqlOutput::from(*f)),
            Value::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
            Value::Timestamp(ts) => ts.to_sql(),
            Value::List(_) => Err(rusqlite::Error::ToSqlConversionFailure(
                "list values cannot be bound as a single parameter".into(),
            )),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{}", s),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

/// Column-name to value map for one row.
///
/// This is the currency of the dynamic, table-name driven API; typed
/// entities convert to and from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    values: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    /// Builder-style insert
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Typed access; a missing column reads as null
    pub fn get_as<T: crate::schema::Field>(&self, column: &str) -> Result<T> {
        let value = self.values.get(column).cloned().unwrap_or(Value::Null);
        T::from_value(value).map_err(|e| Error::Decode(format!("column '{}': {}", column, e)))
    }

    pub fn id(&self) -> Option<i64> {
        self.get("id").and_then(Value::as_i64)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

pub(crate) fn decode_error(idx: usize, raw: ValueRef<'_>, err: FromSqlError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, raw.data_type(), Box::new(err))
}
