//! Session Manager - pooled connections and units of work

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, TransactionBehavior};

use crate::filter::{FilterCompiler, UnknownOperatorPolicy};
use crate::schema::Schema;
use crate::{Error, Result};

/// Tuning knobs for a [`Store`]
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Upper bound on concurrently open connections
    pub max_connections: u32,
    /// How long `acquire` blocks on an exhausted pool before failing
    pub acquire_timeout: Duration,
    /// How long a statement waits on a locked database
    pub busy_timeout: Duration,
    pub unknown_operator: UnknownOperatorPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_millis(5000),
            unknown_operator: UnknownOperatorPolicy::Reject,
        }
    }
}

/// Connection pool plus the schema registry.
///
/// Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
    schema: Arc<Schema>,
    compiler: FilterCompiler,
}

fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

impl Store {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    pub fn open_with(path: &Path, options: StoreOptions) -> Result<Self> {
        let busy_timeout = options.busy_timeout;
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            configure_connection(conn, busy_timeout)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
            Ok(())
        });
        let pool = Pool::builder()
            .max_size(options.max_connections)
            .connection_timeout(options.acquire_timeout)
            .build(manager)?;
        tracing::debug!("Opened pool of {} connection(s) on {}", options.max_connections, path.display());
        Self::initialize(pool, &options)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with(StoreOptions::default())
    }

    /// Every in-memory connection is a separate database, so the pool holds
    /// exactly one connection and never recycles it.
    pub fn open_in_memory_with(options: StoreOptions) -> Result<Self> {
        let busy_timeout = options.busy_timeout;
        let manager = SqliteConnectionManager::memory()
            .with_init(move |conn| configure_connection(conn, busy_timeout));
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(options.acquire_timeout)
            .build(manager)?;
        Self::initialize(pool, &options)
    }

    /// Create every table idempotently in one transaction
    fn initialize(pool: Pool<SqliteConnectionManager>, options: &StoreOptions) -> Result<Self> {
        let schema = Schema::build()?;
        {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            for stmt in schema.statements() {
                tx.execute(&stmt, [])?;
            }
            tx.commit()?;
        }
        tracing::debug!("Schema ready ({} tables)", schema.entities().count() + schema.associations().len());

        Ok(Self {
            pool,
            schema: Arc::new(schema),
            compiler: FilterCompiler::new(options.unknown_operator),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Open a unit of work with a deferred transaction.
    ///
    /// Blocks while every pooled connection is in use.
    pub fn acquire(&self) -> Result<UnitOfWork> {
        self.acquire_with(TransactionBehavior::Deferred)
    }

    pub fn acquire_with(&self, behavior: TransactionBehavior) -> Result<UnitOfWork> {
        let conn = self.pool.get()?;
        UnitOfWork::begin(conn, Arc::clone(&self.schema), self.compiler, behavior)
    }

    /// Run `f` in a unit of work: commit on `Ok`, roll back on `Err`.
    ///
    /// Takes the write lock up front so concurrent writers queue on the busy
    /// timeout instead of failing when a read upgrades to a write.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut UnitOfWork) -> Result<T>,
    {
        self.transaction_with(TransactionBehavior::Immediate, f)
    }

    /// Like [`transaction`](Self::transaction) but without taking the write
    /// lock up front; for read-only work.
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut UnitOfWork) -> Result<T>,
    {
        self.transaction_with(TransactionBehavior::Deferred, f)
    }

    pub fn transaction_with<T, F>(&self, behavior: TransactionBehavior, f: F) -> Result<T>
    where
        F: FnOnce(&mut UnitOfWork) -> Result<T>,
    {
        let mut uow = self.acquire_with(behavior)?;
        match f(&mut uow) {
            Ok(value) => {
                uow.commit()?;
                Ok(value)
            }
            Err(err) => {
                // Dropping an open unit rolls it back
                drop(uow);
                Err(err)
            }
        }
    }

    /// Row counts per table plus pool occupancy
    pub fn stats(&self) -> Result<StoreStats> {
        let tables = self.read(|uow| uow.table_counts())?;
        let state = self.pool.state();
        Ok(StoreStats {
            tables,
            connections: state.connections,
            idle_connections: state.idle_connections,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub tables: Vec<(&'static str, usize)>,
    pub connections: u32,
    pub idle_connections: u32,
}

impl StoreStats {
    pub fn rows(&self, table: &str) -> Option<usize> {
        self.tables.iter().find(|(t, _)| *t == table).map(|(_, n)| *n)
    }
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Database Statistics:")?;
        for (table, rows) in &self.tables {
            writeln!(f, "  {}: {}", table, rows)?;
        }
        write!(f, "  Connections: {} ({} idle)", self.connections, self.idle_connections)
    }
}

/// Lifecycle of a unit of work: `Open → Committed | RolledBack`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Open,
    Committed,
    RolledBack,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitState::Open => "open",
            UnitState::Committed => "committed",
            UnitState::RolledBack => "rolled back",
        };
        write!(f, "{}", s)
    }
}

/// How to finalize a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Commit,
    Rollback,
}

/// A transactional scope bound to one pooled connection.
///
/// Changes are invisible to other units until committed. A failing
/// operation rolls the unit back before its error is returned; dropping an
/// open unit rolls it back and releases the connection.
pub struct UnitOfWork {
    conn: PooledConnection<SqliteConnectionManager>,
    schema: Arc<Schema>,
    compiler: FilterCompiler,
    state: UnitState,
}

impl UnitOfWork {
    fn begin(
        conn: PooledConnection<SqliteConnectionManager>,
        schema: Arc<Schema>,
        compiler: FilterCompiler,
        behavior: TransactionBehavior,
    ) -> Result<Self> {
        let begin = match behavior {
            TransactionBehavior::Immediate => "BEGIN IMMEDIATE",
            TransactionBehavior::Exclusive => "BEGIN EXCLUSIVE",
            _ => "BEGIN DEFERRED",
        };
        conn.execute_batch(begin)?;
        tracing::debug!("Unit of work opened ({})", begin);
        Ok(Self {
            conn,
            schema,
            compiler,
            state: UnitState::Open,
        })
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == UnitState::Open
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn compiler(&self) -> FilterCompiler {
        self.compiler
    }

    /// Run one operation against the open transaction.
    ///
    /// On failure the unit is rolled back before the error is returned.
    pub(crate) fn run<T, F>(&mut self, op: &str, f: F) -> Result<T>
    where
        F: FnOnce(&Connection, &Schema) -> Result<T>,
    {
        if self.state != UnitState::Open {
            return Err(Error::Finalized(self.state));
        }
        match f(&*self.conn, &*self.schema) {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::warn!("{} failed, rolling back unit of work: {}", op, err);
                self.abort();
                Err(err)
            }
        }
    }

    /// Persist (`Commit`) or discard (`Rollback`) every pending change
    pub fn finalize(mut self, outcome: Outcome) -> Result<()> {
        if self.state != UnitState::Open {
            return Err(Error::Finalized(self.state));
        }
        match outcome {
            Outcome::Commit => match self.conn.execute_batch("COMMIT") {
                Ok(()) => {
                    self.state = UnitState::Committed;
                    tracing::debug!("Unit of work committed");
                    Ok(())
                }
                Err(err) => {
                    tracing::warn!("Commit failed, rolling back: {}", err);
                    self.abort();
                    Err(err.into())
                }
            },
            Outcome::Rollback => {
                self.state = UnitState::RolledBack;
                self.conn.execute_batch("ROLLBACK")?;
                tracing::debug!("Unit of work rolled back");
                Ok(())
            }
        }
    }

    pub fn commit(self) -> Result<()> {
        self.finalize(Outcome::Commit)
    }

    pub fn rollback(self) -> Result<()> {
        self.finalize(Outcome::Rollback)
    }

    fn abort(&mut self) {
        self.state = UnitState::RolledBack;
        // SQLite already ended the transaction on some failures
        if self.conn.is_autocommit() {
            return;
        }
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            tracing::error!("Rollback failed: {}", err);
        }
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.state == UnitState::Open {
            tracing::debug!("Unit of work dropped while open, rolling back");
            self.abort();
        }
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork").field("state", &self.state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::entities::User;

    fn user(name: &str) -> User {
        User {
            username: name.to_string(),
            password: "pw".to_string(),
            ..Default::default()
        }
    }

    fn file_store(dir: &tempfile::TempDir) -> Store {
        Store::open(&dir.path().join("connector.db")).unwrap()
    }

    #[test]
    fn test_commit_persists() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();
        let bob = uow.create(&user("bob")).unwrap();
        uow.commit().unwrap();

        let mut uow = store.acquire().unwrap();
        assert!(uow.read_by_id::<User>(bob.id.unwrap()).unwrap().is_some());
    }

    #[test]
    fn test_rollback_discards() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();
        let bob = uow.create(&user("bob")).unwrap();
        uow.finalize(Outcome::Rollback).unwrap();

        let mut uow = store.acquire().unwrap();
        assert!(uow.read_by_id::<User>(bob.id.unwrap()).unwrap().is_none());
    }

    #[test]
    fn test_drop_rolls_back_and_releases() {
        let store = Store::open_in_memory().unwrap();
        {
            let mut uow = store.acquire().unwrap();
            uow.create(&user("bob")).unwrap();
        }
        // The single in-memory connection is back in the pool
        let mut uow = store.acquire().unwrap();
        assert_eq!(uow.count::<User>().unwrap(), 0);
    }

    #[test]
    fn test_failure_rolls_back_before_reporting() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();
        uow.create(&user("bob")).unwrap();

        let err = uow.create(&user("bob")).unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(uow.state(), UnitState::RolledBack);

        // Nothing from the failed unit survives and it accepts no more work
        assert!(matches!(uow.count::<User>(), Err(Error::Finalized(UnitState::RolledBack))));
        assert!(matches!(uow.commit(), Err(Error::Finalized(UnitState::RolledBack))));

        let mut uow = store.acquire().unwrap();
        assert_eq!(uow.count::<User>().unwrap(), 0);
    }

    #[test]
    fn test_transaction_helper() {
        let store = Store::open_in_memory().unwrap();
        let bob = store.transaction(|uow| uow.create(&user("bob"))).unwrap();
        assert!(bob.id.is_some());

        let result: Result<()> = store.transaction(|uow| {
            uow.create(&user("alice"))?;
            Err(Error::InvalidArgument("abort".into()))
        });
        assert!(result.is_err());

        let names: Vec<String> = store
            .transaction(|uow| uow.read_all::<User>())
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["bob".to_string()]);
    }

    #[test]
    fn test_uncommitted_changes_are_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir);

        let mut writer = store.acquire().unwrap();
        let bob = writer.create(&user("bob")).unwrap();
        let id = bob.id.unwrap();

        let mut reader = store.acquire().unwrap();
        assert!(reader.read_by_id::<User>(id).unwrap().is_none());
        reader.rollback().unwrap();

        writer.commit().unwrap();
        let mut reader = store.acquire().unwrap();
        assert!(reader.read_by_id::<User>(id).unwrap().is_some());
    }

    #[test]
    fn test_exhausted_pool_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let options = StoreOptions {
            max_connections: 1,
            acquire_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let store = Store::open_with(&dir.path().join("connector.db"), options).unwrap();

        let held = store.acquire().unwrap();
        assert!(matches!(store.acquire(), Err(Error::Connection(_))));
        drop(held);
        assert!(store.acquire().is_ok());
    }

    #[test]
    fn test_concurrent_writers() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.transaction(|uow| uow.create(&user(&format!("user{}", i)))).unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = store.stats().unwrap();
        assert_eq!(stats.rows("user"), Some(4));
    }
}
