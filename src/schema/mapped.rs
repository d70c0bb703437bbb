//! Read-only view of a customer-owned conversation table
//!
//! The table is not part of the managed schema. Its layout is fixed at the
//! logical level ([`MAPPED_FIELDS`]) while the physical column names come
//! from configuration, so the same reads work against whatever naming the
//! customer's database uses.

use rusqlite::Row;

use super::ddl::quote;
use crate::value::{decode_error, Record, Value};
use crate::{Error, Result};

/// Logical fields of a mapped table, primary key first
pub const MAPPED_FIELDS: [&str; 7] = ["id", "customer_id", "user_id", "query", "context", "prompt", "response"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedTable {
    table: String,
    /// Physical column for each entry of `MAPPED_FIELDS`, same order
    columns: Vec<String>,
}

impl MappedTable {
    /// Build a view of `table` from a logical field → physical column mapping.
    ///
    /// Every logical field must be mapped exactly once.
    pub fn new<I, K, V>(table: impl Into<String>, mapping: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let table = table.into();
        if table.trim().is_empty() {
            return Err(Error::InvalidArgument("a mapped table needs a name".to_string()));
        }

        let mut slots: Vec<Option<String>> = vec![None; MAPPED_FIELDS.len()];
        for (field, column) in mapping {
            let field = field.as_ref();
            let idx = MAPPED_FIELDS
                .iter()
                .position(|f| *f == field)
                .ok_or_else(|| Error::unknown_attribute(&table, field))?;
            let column = column.into();
            if column.trim().is_empty() {
                return Err(Error::InvalidArgument(format!("no column given for '{}'", field)));
            }
            if slots[idx].replace(column).is_some() {
                return Err(Error::InvalidArgument(format!("'{}' mapped twice", field)));
            }
        }

        let columns = MAPPED_FIELDS
            .iter()
            .zip(slots)
            .map(|(field, slot)| {
                slot.ok_or_else(|| Error::InvalidArgument(format!("mapping for {} is missing '{}'", table, field)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { table, columns })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Physical column behind a logical field
    pub fn column(&self, field: &str) -> Result<&str> {
        MAPPED_FIELDS
            .iter()
            .position(|f| *f == field)
            .map(|idx| self.columns[idx].as_str())
            .ok_or_else(|| Error::unknown_attribute(&self.table, field))
    }

    pub fn id_column(&self) -> &str {
        &self.columns[0]
    }

    /// `"physical" AS "logical", ...`
    pub fn select_list(&self) -> String {
        MAPPED_FIELDS
            .iter()
            .zip(&self.columns)
            .map(|(field, column)| format!("{} AS {}", quote(column), quote(field)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Decode one row into logical field names; column types are not declared
    pub fn decode_row(&self, row: &Row) -> rusqlite::Result<Record> {
        let mut record = Record::new();
        for (idx, field) in MAPPED_FIELDS.iter().enumerate() {
            let raw = row.get_ref(idx)?;
            let value = Value::decode_any(raw).map_err(|e| decode_error(idx, raw, e))?;
            record.insert(*field, value);
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> Vec<(&'static str, &'static str)> {
        vec![
            ("id", "msg_id"),
            ("customer_id", "tenant"),
            ("user_id", "author"),
            ("query", "question_text"),
            ("context", "ctx"),
            ("prompt", "full_prompt"),
            ("response", "bot_reply"),
        ]
    }

    #[test]
    fn test_resolves_logical_fields() {
        let table = MappedTable::new("chat_log", mapping()).unwrap();
        assert_eq!(table.table(), "chat_log");
        assert_eq!(table.id_column(), "msg_id");
        assert_eq!(table.column("query").unwrap(), "question_text");
        assert!(matches!(table.column("answer"), Err(Error::UnknownAttribute { .. })));
        assert!(table.select_list().starts_with("\"msg_id\" AS \"id\", \"tenant\" AS \"customer_id\""));
    }

    #[test]
    fn test_incomplete_mapping_is_rejected() {
        let partial: Vec<_> = mapping().into_iter().filter(|(f, _)| *f != "prompt").collect();
        assert!(matches!(MappedTable::new("chat_log", partial), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_unknown_and_duplicate_fields_are_rejected() {
        let mut extra = mapping();
        extra.push(("sentiment", "score"));
        assert!(matches!(MappedTable::new("chat_log", extra), Err(Error::UnknownAttribute { .. })));

        let mut twice = mapping();
        twice.push(("query", "q2"));
        assert!(matches!(MappedTable::new("chat_log", twice), Err(Error::InvalidArgument(_))));

        assert!(MappedTable::new("  ", mapping()).is_err());
    }
}
