//! # Connector - relational core of the feedback-analytics platform
//!
//! Persistence and query layer for projects, users, feedback, conversational
//! messages, issues, topics, rules, datasets and reports.
//!
//! Connector provides:
//! - A typed schema model with immutable descriptors built once at startup
//! - Transaction-scoped units of work over a bounded SQLite connection pool
//! - A CRUD engine with eager loading of related rows
//! - A filter compiler mapping field constraints onto parameterised predicates
//! - Idempotent edge insertion and bulk edge remapping for entity merges
//! - Dataset export and read-only access to customer tables with mapped columns

pub mod value;
pub mod schema;
pub mod filter;
pub mod storage;
pub mod collaborators;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use value::{Record, Value};
pub use schema::{AssociationTable, Entity, EntityDef, MappedTable, Schema};
pub use schema::entities::*;
pub use schema::enums::{MessageRole, ReportStatus};
pub use filter::{Condition, FilterCompiler, Filters, Operator, Predicate, UnknownOperatorPolicy};
pub use storage::{
    DatasetExport, ExportedMessage, Loaded, Outcome, RemapOutcome, Store, StoreOptions, UnitOfWork, UnitState,
};

use rusqlite::ErrorCode;

/// Result type alias for connector operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for connector operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Uniqueness, foreign-key, NOT NULL or CHECK breach reported by the engine
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A field or relation name that the entity does not declare
    #[error("{entity} has no attribute '{name}'")]
    UnknownAttribute { entity: String, name: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Pool exhaustion, acquire timeout or a transport failure
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Storage error: {0}")]
    Storage(rusqlite::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unit of work is already {0}")]
    Finalized(UnitState),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Error::ConstraintViolation(err.to_string()),
            Some(ErrorCode::CannotOpen) | Some(ErrorCode::NotADatabase) => {
                Error::Connection(err.to_string())
            }
            _ => Error::Storage(err),
        }
    }
}

impl From<r2d2::Error> for Error {
    fn from(err: r2d2::Error) -> Self {
        Error::Connection(err.to_string())
    }
}

impl Error {
    pub(crate) fn unknown_attribute(entity: &str, name: &str) -> Self {
        Error::UnknownAttribute {
            entity: entity.to_string(),
            name: name.to_string(),
        }
    }

    /// True for the constraint-breach class of failures
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::ConstraintViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_errors_are_classified() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT NOT NULL UNIQUE)").unwrap();
        conn.execute("INSERT INTO t (name) VALUES ('a')", []).unwrap();
        let err: Error = conn
            .execute("INSERT INTO t (name) VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn test_other_sqlite_errors_stay_storage() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err: Error = conn.execute("SELECT * FROM missing", []).unwrap_err().into();
        assert!(matches!(err, Error::Storage(_)));
    }
}
