//! Column descriptors and the typed field mapping

use chrono::{DateTime, Utc};

use crate::value::{parse_timestamp, Value};
use crate::{Error, Result};

/// Storage class of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Integer,
    Real,
    Text,
    Timestamp,
}

impl SqlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlType::Integer => "integer",
            SqlType::Real => "real",
            SqlType::Text => "text",
            SqlType::Timestamp => "timestamp",
        }
    }

    /// Declared SQLite type; timestamps are stored as ISO text
    pub fn ddl(&self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Text => "TEXT",
            SqlType::Timestamp => "TEXT",
        }
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static description of one column.
///
/// Built with `const fn` modifiers so entity declarations stay in `static`
/// data: `ColumnDef::of::<String>("username").unique()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    /// Referenced table; the referenced column is always `id`
    pub references: Option<&'static str>,
    /// Filled with the current time on create when left empty
    pub default_now: bool,
    /// Allowed values, enforced with a CHECK constraint
    pub domain: Option<&'static [&'static str]>,
}

impl ColumnDef {
    pub const fn of<T: Field>(name: &'static str) -> Self {
        Self {
            name,
            sql_type: T::SQL_TYPE,
            nullable: T::NULLABLE,
            primary_key: false,
            unique: false,
            references: None,
            default_now: false,
            domain: T::DOMAIN,
        }
    }

    pub const fn primary_key(name: &'static str) -> Self {
        Self {
            primary_key: true,
            ..Self::of::<i64>(name)
        }
    }

    pub const fn unique(self) -> Self {
        Self { unique: true, ..self }
    }

    pub const fn references(self, table: &'static str) -> Self {
        Self {
            references: Some(table),
            ..self
        }
    }

    /// Server-side default; the column is NOT NULL once stored
    pub const fn default_now(self) -> Self {
        Self {
            default_now: true,
            nullable: false,
            ..self
        }
    }
}

/// Rust field types that map onto a column
pub trait Field: Sized {
    const SQL_TYPE: SqlType;
    const NULLABLE: bool = false;
    const DOMAIN: Option<&'static [&'static str]> = None;

    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch<T>(expected: SqlType, got: &Value) -> Result<T> {
    Err(Error::Decode(format!(
        "expected {}, got {}",
        expected,
        got.type_name()
    )))
}

impl Field for i64 {
    const SQL_TYPE: SqlType = SqlType::Integer;

    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Integer(i) => Ok(i),
            other => mismatch(Self::SQL_TYPE, &other),
        }
    }
}

impl Field for f64 {
    const SQL_TYPE: SqlType = SqlType::Real;

    fn to_value(&self) -> Value {
        Value::Real(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Real(r) => Ok(r),
            Value::Integer(i) => Ok(i as f64),
            other => mismatch(Self::SQL_TYPE, &other),
        }
    }
}

impl Field for String {
    const SQL_TYPE: SqlType = SqlType::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => mismatch(Self::SQL_TYPE, &other),
        }
    }
}

impl Field for DateTime<Utc> {
    const SQL_TYPE: SqlType = SqlType::Timestamp;

    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Timestamp(ts) => Ok(ts),
            Value::Text(s) => parse_timestamp(&s),
            other => mismatch(Self::SQL_TYPE, &other),
        }
    }
}

impl<T: Field> Field for Option<T> {
    const SQL_TYPE: SqlType = T::SQL_TYPE;
    const NULLABLE: bool = true;
    const DOMAIN: Option<&'static [&'static str]> = T::DOMAIN;

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
