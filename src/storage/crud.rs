//! CRUD Engine - create, read, update and delete on any registered entity

use chrono::Utc;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};

use super::eager::{self, Loaded};
use super::session::UnitOfWork;
use crate::filter::{Filters, Predicate};
use crate::schema::ddl::quote;
use crate::schema::{ColumnDef, Entity, EntityDef, MappedTable};
use crate::value::{Record, Value};
use crate::{AssociationTable, Error, Result};

/// A table that rows can be selected from
trait RowSource {
    fn table_name(&self) -> &str;

    fn id_column(&self) -> &str;

    fn column_list(&self) -> String;

    fn decode(&self, row: &Row) -> rusqlite::Result<Record>;
}

impl RowSource for EntityDef {
    fn table_name(&self) -> &str {
        self.table
    }

    fn id_column(&self) -> &str {
        "id"
    }

    fn column_list(&self) -> String {
        EntityDef::column_list(self)
    }

    fn decode(&self, row: &Row) -> rusqlite::Result<Record> {
        self.decode_row(row, 0)
    }
}

impl RowSource for MappedTable {
    fn table_name(&self) -> &str {
        self.table()
    }

    fn id_column(&self) -> &str {
        MappedTable::id_column(self)
    }

    fn column_list(&self) -> String {
        self.select_list()
    }

    fn decode(&self, row: &Row) -> rusqlite::Result<Record> {
        self.decode_row(row)
    }
}

// ========== Row Helpers ==========

fn insert_row(conn: &Connection, def: &EntityDef, record: &Record) -> Result<Record> {
    for (key, _) in record.iter() {
        def.column(key)?;
    }

    let mut columns = Vec::new();
    let mut params = Vec::new();
    if let Some(id) = record.id() {
        columns.push(quote("id"));
        params.push(Value::Integer(id));
    }
    for column in def.data_columns() {
        let value = record.get(column.name).cloned().unwrap_or(Value::Null);
        let value = if value.is_null() && column.default_now {
            Value::Timestamp(Utc::now())
        } else {
            value.coerce(column.sql_type)?
        };
        columns.push(quote(column.name));
        params.push(value);
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        quote(def.table),
        columns.join(", "),
        vec!["?"; params.len()].join(", "),
        def.column_list()
    );
    let row = conn.query_row(&sql, params_from_iter(params.iter()), |row| def.decode_row(row, 0))?;
    Ok(row)
}

fn select_by_id<S: RowSource + ?Sized>(conn: &Connection, source: &S, id: i64) -> Result<Option<Record>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        source.column_list(),
        quote(source.table_name()),
        quote(source.id_column())
    );
    let row = conn.query_row(&sql, [id], |row| source.decode(row)).optional()?;
    Ok(row)
}

fn select_where<S: RowSource + ?Sized>(conn: &Connection, source: &S, predicate: &Predicate) -> Result<Vec<Record>> {
    let (clause, params) = predicate.to_sql(None);
    let sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {}",
        source.column_list(),
        quote(source.table_name()),
        clause,
        quote(source.id_column())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| source.decode(row))?;
    let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

/// Overwrite `fields` on row `id` and return the stored row
fn update_row(
    conn: &Connection,
    def: &EntityDef,
    id: i64,
    fields: Vec<(&'static ColumnDef, Value)>,
) -> Result<Record> {
    let not_found = || Error::NotFound { entity: def.name, id };
    if fields.is_empty() {
        return select_by_id(conn, def, id)?.ok_or_else(not_found);
    }

    let assignments = fields
        .iter()
        .map(|(column, _)| format!("{} = ?", quote(column.name)))
        .collect::<Vec<_>>()
        .join(", ");
    let mut params: Vec<Value> = fields.into_iter().map(|(_, value)| value).collect();
    params.push(Value::Integer(id));

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ? RETURNING {}",
        quote(def.table),
        assignments,
        quote("id"),
        def.column_list()
    );
    conn.query_row(&sql, params_from_iter(params.iter()), |row| def.decode_row(row, 0))
        .optional()?
        .ok_or_else(not_found)
}

fn delete_row(conn: &Connection, def: &EntityDef, id: i64) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE {} = ?1", quote(def.table), quote("id"));
    let deleted = conn.execute(&sql, [id])?;
    Ok(deleted > 0)
}

fn count_rows(conn: &Connection, table: &str) -> Result<usize> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote(table));
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count as usize)
}

fn ensure_mutable(def: &EntityDef) -> Result<()> {
    if def.immutable {
        return Err(Error::InvalidArgument(format!("{} rows are immutable", def.name)));
    }
    Ok(())
}

fn decode_all<E: Entity>(records: Vec<Record>) -> Result<Vec<E>> {
    records.iter().map(E::from_record).collect()
}

impl UnitOfWork {
    // ========== Create Operations ==========

    /// Insert `entity` and return it with its assigned id.
    ///
    /// Unset `default_now` timestamps are filled with the current time.
    pub fn create<E: Entity>(&mut self, entity: &E) -> Result<E> {
        let def = E::def();
        let record = entity.to_record();
        let created = self.run("create", |conn, _| insert_row(conn, def, &record))?;
        tracing::debug!("Created {} {:?}", def.name, created.id());
        E::from_record(&created)
    }

    /// Insert a row into `table` by column name
    pub fn create_record(&mut self, table: &str, record: &Record) -> Result<Record> {
        self.run("create", |conn, schema| {
            let def = schema.entity(table)?;
            insert_row(conn, def, record)
        })
    }

    // ========== Read Operations ==========

    pub fn read_by_id<E: Entity>(&mut self, id: i64) -> Result<Option<E>> {
        let def = E::def();
        let record = self.run("read", |conn, _| select_by_id(conn, def, id))?;
        record.as_ref().map(E::from_record).transpose()
    }

    /// Read one row with the named relations populated
    pub fn read_by_id_with<E: Entity>(&mut self, id: i64, relations: &[&str]) -> Result<Option<Loaded<E>>> {
        let predicate = Predicate::id_eq(id);
        let mut loaded = self.load::<E>(&predicate, relations)?;
        Ok(loaded.pop())
    }

    pub fn read_record(&mut self, table: &str, id: i64) -> Result<Option<Record>> {
        self.run("read", |conn, schema| select_by_id(conn, schema.entity(table)?, id))
    }

    /// Every row of the entity, ordered by id
    pub fn read_all<E: Entity>(&mut self) -> Result<Vec<E>> {
        let def = E::def();
        let records = self.run("read", |conn, _| select_where(conn, def, &Predicate::all()))?;
        decode_all(records)
    }

    /// Every row with the named relations populated
    pub fn read_all_with<E: Entity>(&mut self, relations: &[&str]) -> Result<Vec<Loaded<E>>> {
        self.load::<E>(&Predicate::all(), relations)
    }

    /// Rows matching `filters` (AND-combined)
    pub fn find<E: Entity>(&mut self, filters: &Filters) -> Result<Vec<E>> {
        let def = E::def();
        let compiler = self.compiler();
        let records = self.run("find", |conn, _| {
            let predicate = compiler.compile(def, filters)?;
            select_where(conn, def, &predicate)
        })?;
        decode_all(records)
    }

    pub fn find_with<E: Entity>(&mut self, filters: &Filters, relations: &[&str]) -> Result<Vec<Loaded<E>>> {
        let def = E::def();
        let compiler = self.compiler();
        let predicate = self.run("find", |_, _| compiler.compile(def, filters))?;
        self.load::<E>(&predicate, relations)
    }

    /// Filtered read against a table named at runtime
    pub fn find_records(&mut self, table: &str, filters: &Filters) -> Result<Vec<Record>> {
        let compiler = self.compiler();
        self.run("find", |conn, schema| {
            let def = schema.entity(table)?;
            let predicate = compiler.compile(def, filters)?;
            select_where(conn, def, &predicate)
        })
    }

    fn load<E: Entity>(&mut self, predicate: &Predicate, relations: &[&str]) -> Result<Vec<Loaded<E>>> {
        let def = E::def();
        let rows = self.run("load", |conn, schema| eager::load(conn, schema, def, predicate, relations))?;
        rows.into_iter().map(Loaded::from_row).collect()
    }

    // ========== Update Operations ==========

    /// Write every field of `entity` over its stored row.
    ///
    /// Unset `default_now` timestamps keep their stored value.
    pub fn update<E: Entity>(&mut self, entity: &E) -> Result<E> {
        let def = E::def();
        let id = entity
            .id()
            .ok_or_else(|| Error::InvalidArgument(format!("cannot update an unsaved {}", def.name)))?;
        let record = entity.to_record();
        let updated = self.run("update", |conn, _| {
            ensure_mutable(def)?;
            let mut fields = Vec::new();
            for column in def.data_columns() {
                let value = record.get(column.name).cloned().unwrap_or(Value::Null);
                if value.is_null() && column.default_now {
                    continue;
                }
                fields.push((column, value.coerce(column.sql_type)?));
            }
            update_row(conn, def, id, fields)
        })?;
        E::from_record(&updated)
    }

    /// Overwrite only the named fields of row `id`
    pub fn update_fields<E: Entity>(&mut self, id: i64, changes: &Record) -> Result<E> {
        let def = E::def();
        let updated = self.run("update", |conn, _| {
            ensure_mutable(def)?;
            let mut fields = Vec::new();
            for (name, value) in changes.iter() {
                let column = def.column(name)?;
                if column.primary_key {
                    return Err(Error::InvalidArgument("the primary key cannot be changed".to_string()));
                }
                fields.push((column, value.clone().coerce(column.sql_type)?));
            }
            update_row(conn, def, id, fields)
        })?;
        E::from_record(&updated)
    }

    // ========== Delete Operations ==========

    /// Delete the stored row of `entity`; `false` when it was already gone
    pub fn delete<E: Entity>(&mut self, entity: &E) -> Result<bool> {
        let def = E::def();
        let id = entity
            .id()
            .ok_or_else(|| Error::InvalidArgument(format!("cannot delete an unsaved {}", def.name)))?;
        self.delete_by_id::<E>(id)
    }

    pub fn delete_by_id<E: Entity>(&mut self, id: i64) -> Result<bool> {
        let def = E::def();
        let deleted = self.run("delete", |conn, _| delete_row(conn, def, id))?;
        if deleted {
            tracing::debug!("Deleted {} {}", def.name, id);
        }
        Ok(deleted)
    }

    // ========== Mapped Table Operations ==========

    /// Every row of a customer table, keyed by logical field name.
    ///
    /// Mapped tables are read-only: nothing in the connector writes to them.
    pub fn read_all_mapped(&mut self, table: &MappedTable) -> Result<Vec<Record>> {
        self.run("read mapped", |conn, _| select_where(conn, table, &Predicate::all()))
    }

    pub fn read_mapped_by_id(&mut self, table: &MappedTable, id: i64) -> Result<Option<Record>> {
        self.run("read mapped", |conn, _| select_by_id(conn, table, id))
    }

    // ========== Count Operations ==========

    pub fn count<E: Entity>(&mut self) -> Result<usize> {
        let table = E::def().table;
        self.run("count", |conn, _| count_rows(conn, table))
    }

    /// Row count of every entity and association table
    pub fn table_counts(&mut self) -> Result<Vec<(&'static str, usize)>> {
        self.run("count", |conn, schema| {
            let tables = schema
                .entities()
                .map(|def| def.table)
                .chain(AssociationTable::all().iter().map(|t| t.def().table));
            let mut counts = Vec::new();
            for table in tables {
                counts.push((table, count_rows(conn, table)?));
            }
            Ok(counts)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Condition, Operator};
    use crate::schema::entities::*;
    use crate::storage::Store;
    use crate::ReportStatus;

    fn user(name: &str) -> User {
        User {
            username: name.to_string(),
            password: "pw".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_assigns_id_and_defaults() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();
        let bob = uow.create(&user("bob")).unwrap();
        assert!(bob.id.is_some());
        assert!(bob.created_at.is_some());

        let stored = uow.read_by_id::<User>(bob.id.unwrap()).unwrap().unwrap();
        assert_eq!(stored, bob);
    }

    #[test]
    fn test_duplicate_unique_is_constraint_violation() {
        let store = Store::open_in_memory().unwrap();
        store.transaction(|uow| uow.create(&user("bob"))).unwrap();
        let err = store.transaction(|uow| uow.create(&user("bob"))).unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn test_missing_reference_is_constraint_violation() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .transaction(|uow| {
                uow.create(&UserMessage {
                    answer_id: 999,
                    ..Default::default()
                })
            })
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn test_report_status_outside_domain_fails() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();
        let p = uow
            .create(&Project {
                name: "Acme".to_string(),
                ..Default::default()
            })
            .unwrap();
        let report = uow
            .create(&Report {
                project_id: p.id.unwrap(),
                name: "weekly".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(report.status, ReportStatus::Processing);

        let err = uow
            .create_record(
                "reports",
                &Record::new()
                    .with("project_id", p.id.unwrap())
                    .with("name", "bad")
                    .with("status", "exploded"),
            )
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn test_read_missing_is_none() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();
        assert!(uow.read_by_id::<User>(42).unwrap().is_none());
        assert!(uow.read_all::<User>().unwrap().is_empty());
    }

    #[test]
    fn test_update_round_trips_and_keeps_created_at() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();
        let bob = uow.create(&user("bob")).unwrap();

        let mut changed = bob.clone();
        changed.email = Some("bob@example.com".to_string());
        changed.created_at = None;
        let updated = uow.update(&changed).unwrap();

        assert_eq!(updated.email.as_deref(), Some("bob@example.com"));
        assert_eq!(updated.created_at, bob.created_at);
        assert_eq!(uow.read_by_id::<User>(bob.id.unwrap()).unwrap().unwrap(), updated);
    }

    #[test]
    fn test_update_leaves_links_in_place() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();
        let bob = uow.create(&user("bob")).unwrap();
        let acme = uow
            .create(&Project {
                name: "Acme".to_string(),
                ..Default::default()
            })
            .unwrap();
        uow.link(AssociationTable::UsersProjects, bob.id.unwrap(), acme.id.unwrap())
            .unwrap();

        let mut renamed = acme.clone();
        renamed.name = "Acme Corp".to_string();
        uow.update(&renamed).unwrap();

        let loaded = uow.read_all_with::<Project>(&["users"]).unwrap();
        assert_eq!(loaded[0].name, "Acme Corp");
        assert_eq!(loaded[0].related_as::<User>("users").unwrap(), vec![bob]);
    }

    #[test]
    fn test_update_missing_row_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();
        let mut ghost = user("ghost");
        ghost.id = Some(77);
        assert!(matches!(uow.update(&ghost), Err(Error::NotFound { entity: "User", id: 77 })));
    }

    #[test]
    fn test_update_fields() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();
        let bob = uow.create(&user("bob")).unwrap();
        let id = bob.id.unwrap();

        let updated: User = uow
            .update_fields(id, &Record::new().with("email", "b@example.com"))
            .unwrap();
        assert_eq!(updated.email.as_deref(), Some("b@example.com"));
        assert_eq!(updated.username, "bob");

        assert!(matches!(
            uow.update_fields::<User>(id, &Record::new().with("nickname", "b")),
            Err(Error::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_immutable_rows_reject_update() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();
        let original = uow
            .create(&ContextOriginal {
                text: "raw".to_string(),
                ..Default::default()
            })
            .unwrap();
        let mut edited = original.clone();
        edited.text = "edited".to_string();
        assert!(matches!(uow.update(&edited), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();
        let bob = uow.create(&user("bob")).unwrap();
        assert!(uow.delete(&bob).unwrap());
        assert!(!uow.delete(&bob).unwrap());
        assert!(uow.read_by_id::<User>(bob.id.unwrap()).unwrap().is_none());
    }

    #[test]
    fn test_find_with_operators() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();
        for name in ["alice", "bob", "carol"] {
            uow.create(&user(name)).unwrap();
        }

        let found = uow
            .find::<User>(&Filters::new().with("username", Condition::new(Operator::Like, "%o%")))
            .unwrap();
        let names: Vec<_> = found.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["bob", "carol"]);

        let none = uow
            .find::<User>(&Filters::new().with("username", Condition::is_in(Vec::<String>::new())))
            .unwrap();
        assert!(none.is_empty());

        let err = uow
            .find::<User>(&Filters::new().with("nickname", Condition::eq("bob")))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownAttribute { .. }));
    }

    fn chat_log_store(dir: &tempfile::TempDir) -> Store {
        let path = dir.path().join("connector.db");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE chat_log (msg_id INTEGER PRIMARY KEY, tenant INTEGER, author TEXT,
                 question_text TEXT, ctx TEXT, full_prompt TEXT, bot_reply TEXT);
             INSERT INTO chat_log VALUES (2, 10, 'u-1', 'Where is my order?', NULL, 'p', 'On its way');
             INSERT INTO chat_log VALUES (1, 10, 'u-2', 'Hi', NULL, NULL, 'Hello');",
        )
        .unwrap();
        drop(conn);
        Store::open(&path).unwrap()
    }

    fn chat_log() -> MappedTable {
        MappedTable::new(
            "chat_log",
            [
                ("id", "msg_id"),
                ("customer_id", "tenant"),
                ("user_id", "author"),
                ("query", "question_text"),
                ("context", "ctx"),
                ("prompt", "full_prompt"),
                ("response", "bot_reply"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_mapped_table_reads_by_logical_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = chat_log_store(&dir);
        let table = chat_log();
        let mut uow = store.acquire().unwrap();

        let rows = uow.read_all_mapped(&table).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id(), Some(1));
        assert_eq!(rows[1].get("query"), Some(&Value::from("Where is my order?")));
        assert_eq!(rows[1].get("customer_id"), Some(&Value::Integer(10)));
        assert_eq!(rows[1].get("context"), Some(&Value::Null));
        assert!(!rows[0].contains("bot_reply"));

        let one = uow.read_mapped_by_id(&table, 2).unwrap().unwrap();
        assert_eq!(one.get("response"), Some(&Value::from("On its way")));
        assert!(uow.read_mapped_by_id(&table, 9).unwrap().is_none());
    }

    #[test]
    fn test_mapped_table_is_not_writable() {
        let dir = tempfile::tempdir().unwrap();
        let store = chat_log_store(&dir);
        let table = chat_log();

        let err = store
            .transaction(|uow| uow.create_record(table.table(), &Record::new().with("msg_id", 3)))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let rows = store.read(|uow| uow.read_all_mapped(&table)).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_table_counts() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();
        uow.create(&user("bob")).unwrap();
        let counts = uow.table_counts().unwrap();
        assert!(counts.contains(&("user", 1)));
        assert!(counts.contains(&("users_projects", 0)));
    }
}
