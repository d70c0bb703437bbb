//! Database schema definitions generated from the entity descriptors

use super::{AssociationTable, ColumnDef, EdgeTableDef, EntityDef, Schema};

/// Quote an identifier; table names such as `user` or `userMessages` need it
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn column_sql(column: &ColumnDef) -> String {
    let mut sql = format!("{} {}", quote(column.name), column.sql_type.ddl());
    if column.primary_key {
        sql.push_str(" PRIMARY KEY AUTOINCREMENT");
        return sql;
    }
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if column.unique {
        sql.push_str(" UNIQUE");
    }
    if let Some(table) = column.references {
        sql.push_str(&format!(" REFERENCES {}({})", quote(table), quote("id")));
    }
    if let Some(domain) = column.domain {
        let allowed = domain
            .iter()
            .map(|v| format!("'{}'", v.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" CHECK ({} IN ({}))", quote(column.name), allowed));
    }
    sql
}

/// SQL to create an entity table
pub fn create_entity_table(def: &EntityDef) -> String {
    let columns = def
        .columns
        .iter()
        .map(column_sql)
        .collect::<Vec<_>>()
        .join(",\n    ");
    format!("CREATE TABLE IF NOT EXISTS {} (\n    {}\n)", quote(def.table), columns)
}

/// SQL to create an association table
pub fn create_edge_table(def: &EdgeTableDef) -> String {
    let mut columns = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote("id"))];
    for side in def.columns() {
        columns.push(format!(
            "{} INTEGER NOT NULL REFERENCES {}({})",
            quote(side.name),
            quote(side.references),
            quote("id")
        ));
    }
    if def.unique_pair {
        columns.push(format!("UNIQUE({}, {})", quote(def.left.name), quote(def.right.name)));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote(def.table),
        columns.join(",\n    ")
    )
}

/// Indexes on every foreign-key column
pub fn create_indexes(schema: &Schema) -> Vec<String> {
    let mut stmts = Vec::new();
    for def in schema.entities() {
        for column in def.data_columns().filter(|c| c.references.is_some()) {
            stmts.push(index_sql(def.table, column.name));
        }
    }
    for table in AssociationTable::all() {
        let def = table.def();
        for side in def.columns() {
            stmts.push(index_sql(def.table, side.name));
        }
    }
    stmts
}

fn index_sql(table: &str, column: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {}({})",
        quote(&format!("idx_{}_{}", table, column)),
        quote(table),
        quote(column)
    )
}

/// All schema creation statements
pub fn all_schema_statements(schema: &Schema) -> Vec<String> {
    let mut stmts: Vec<String> = schema.entities().map(create_entity_table).collect();
    stmts.extend(schema.associations().iter().map(|t| create_edge_table(t.def())));
    stmts.extend(create_indexes(schema));
    stmts
}
