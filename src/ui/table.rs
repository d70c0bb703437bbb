use tabled::builder::Builder;
use tabled::{settings::Style, Table, Tabled};

use crate::value::{Record, Value};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Table")]
    pub label: String,
    #[tabled(rename = "Rows")]
    pub value: String,
}

pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            label: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }

        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

/// Two-column table of per-table row counts
pub fn stats_table(counts: &[(&str, usize)]) -> String {
    let mut builder = TableBuilder::new();
    for (table, rows) in counts {
        builder.add_row(table, &rows.to_string());
    }
    builder.build()
}

/// One row per record, columns in the order of the first record
pub fn records_table(records: &[Record]) -> String {
    let Some(first) = records.first() else {
        return String::new();
    };
    let columns: Vec<&str> = first.iter().map(|(name, _)| name).collect();

    let mut builder = Builder::default();
    builder.push_record(columns.iter().map(|c| c.to_string()));
    for record in records {
        builder.push_record(columns.iter().map(|c| match record.get(c) {
            None | Some(Value::Null) => String::new(),
            Some(value) => value.to_string(),
        }));
    }
    builder.build().with(Style::rounded()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_table_lists_every_table() {
        let rendered = stats_table(&[("user", 2), ("projects", 0)]);
        assert!(rendered.contains("user"));
        assert!(rendered.contains("projects"));
        assert!(rendered.contains("Rows"));
    }

    #[test]
    fn test_records_table_blanks_nulls() {
        let records = vec![
            Record::new().with("id", 1).with("name", "Acme"),
            Record::new().with("id", 2).with("name", Value::Null),
        ];
        let rendered = records_table(&records);
        assert!(rendered.contains("Acme"));
        assert!(!rendered.contains("null"));
        assert!(records_table(&[]).is_empty());
    }
}
