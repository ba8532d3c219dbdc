//! In-memory engine for tests and ephemeral databases.

use crate::engine::{Connection, Engine, OpenEvent, Transaction, TxnMode, UpgradeTransaction};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

type Table = BTreeMap<String, Vec<u8>>;

/// Kinds of transient failures that can be injected into a [`MemoryEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The next transaction fails as if the connection were closing.
    ConnectionClosing,
    /// The next transaction fails as if its first table were missing.
    TableMissing,
}

#[derive(Default)]
struct DatabaseState {
    version: u64,
    tables: BTreeMap<String, Table>,
}

#[derive(Default)]
struct EngineState {
    databases: HashMap<String, DatabaseState>,
    /// Closed flags of live connections, per database. Higher-version opens
    /// and database deletion flip them, which is the churn siblings observe.
    live: HashMap<String, Vec<Weak<AtomicBool>>>,
    txn_faults: VecDeque<FaultKind>,
    open_faults: u32,
    transactions_started: u64,
}

impl EngineState {
    fn force_close(&mut self, database: &str) {
        for flag in self.live.remove(database).unwrap_or_default() {
            if let Some(flag) = flag.upgrade() {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }

    fn register_connection(
        &mut self,
        shared: &Arc<Mutex<EngineState>>,
        database: &str,
        version: u64,
    ) -> Arc<dyn Connection> {
        let closed = Arc::new(AtomicBool::new(false));
        self.live
            .entry(database.to_string())
            .or_default()
            .push(Arc::downgrade(&closed));
        Arc::new(MemoryConnection {
            shared: Arc::clone(shared),
            database: database.to_string(),
            version,
            closed,
        })
    }
}

/// An in-memory [`Engine`].
///
/// Implements the open/upgrade contract of a versioned embedded database:
/// a fresh database is on-disk version 0, so the first open delivers an
/// upgrade event targeting version 1; opening at a higher version
/// force-closes connections opened at lower versions.
///
/// Suitable for:
/// - Unit and integration tests
/// - Ephemeral databases that don't need persistence
///
/// Failure paths can be scripted with [`fail_transactions`] and
/// [`fail_opens`], and [`transaction_count`] exposes how many transactions
/// were actually begun.
///
/// Reads inside a transaction observe the committed state; staged writes
/// become visible only after commit. ShelfDB handle operations never mix
/// reads and writes in one transaction, so this is not observable through
/// the public surface.
///
/// [`fail_transactions`]: MemoryEngine::fail_transactions
/// [`fail_opens`]: MemoryEngine::fail_opens
/// [`transaction_count`]: MemoryEngine::transaction_count
#[derive(Default)]
pub struct MemoryEngine {
    shared: Arc<Mutex<EngineState>>,
}

impl MemoryEngine {
    /// Creates a new engine with no databases.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` transactions fail with the given fault.
    pub fn fail_transactions(&self, kind: FaultKind, count: u32) {
        let mut state = self.shared.lock();
        for _ in 0..count {
            state.txn_faults.push_back(kind);
        }
    }

    /// Makes the next `count` open requests fail with a backend error.
    pub fn fail_opens(&self, count: u32) {
        self.shared.lock().open_faults += count;
    }

    /// Returns how many transactions have been begun so far.
    #[must_use]
    pub fn transaction_count(&self) -> u64 {
        self.shared.lock().transactions_started
    }

    /// Returns the on-disk version of a database, if it exists.
    #[must_use]
    pub fn version_of(&self, database: &str) -> Option<u64> {
        self.shared.lock().databases.get(database).map(|d| d.version)
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn open(&self, name: &str, version: Option<u64>) -> EngineResult<OpenEvent> {
        let mut state = self.shared.lock();

        if state.open_faults > 0 {
            state.open_faults -= 1;
            return Err(EngineError::backend("injected open failure"));
        }

        let existing = state.databases.get(name).map(|d| d.version).unwrap_or(0);
        let requested = version.unwrap_or_else(|| existing.max(1));

        if requested < existing {
            return Err(EngineError::VersionConflict {
                requested,
                existing,
            });
        }

        if requested > existing {
            state.force_close(name);
            Ok(OpenEvent::UpgradeNeeded(Box::new(MemoryUpgrade {
                shared: Arc::clone(&self.shared),
                database: name.to_string(),
                version: requested,
                created: Vec::new(),
            })))
        } else {
            let conn = state.register_connection(&self.shared, name, requested);
            Ok(OpenEvent::Opened(conn))
        }
    }

    async fn delete_database(&self, name: &str) -> EngineResult<()> {
        let mut state = self.shared.lock();
        state.force_close(name);
        state.databases.remove(name);
        Ok(())
    }

    async fn database_names(&self) -> EngineResult<Vec<String>> {
        let state = self.shared.lock();
        let mut names: Vec<String> = state.databases.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

struct MemoryUpgrade {
    shared: Arc<Mutex<EngineState>>,
    database: String,
    version: u64,
    created: Vec<String>,
}

#[async_trait]
impl UpgradeTransaction for MemoryUpgrade {
    fn version(&self) -> u64 {
        self.version
    }

    fn contains_table(&self, table: &str) -> bool {
        if self.created.iter().any(|t| t == table) {
            return true;
        }
        let state = self.shared.lock();
        state
            .databases
            .get(&self.database)
            .map(|d| d.tables.contains_key(table))
            .unwrap_or(false)
    }

    fn table_names(&self) -> Vec<String> {
        let state = self.shared.lock();
        let mut names: Vec<String> = state
            .databases
            .get(&self.database)
            .map(|d| d.tables.keys().cloned().collect())
            .unwrap_or_default();
        names.extend(self.created.iter().cloned());
        names.sort();
        names.dedup();
        names
    }

    fn create_table(&mut self, table: &str) -> EngineResult<()> {
        if self.contains_table(table) {
            return Err(EngineError::backend(format!(
                "table already exists: {table}"
            )));
        }
        self.created.push(table.to_string());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> EngineResult<Arc<dyn Connection>> {
        let mut state = self.shared.lock();
        let db = state.databases.entry(self.database.clone()).or_default();
        db.version = self.version;
        for table in &self.created {
            db.tables.insert(table.clone(), Table::new());
        }
        Ok(state.register_connection(&self.shared, &self.database, self.version))
    }
}

struct MemoryConnection {
    shared: Arc<Mutex<EngineState>>,
    database: String,
    version: u64,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn version(&self) -> u64 {
        self.version
    }

    fn contains_table(&self, table: &str) -> bool {
        let state = self.shared.lock();
        state
            .databases
            .get(&self.database)
            .map(|d| d.tables.contains_key(table))
            .unwrap_or(false)
    }

    fn table_names(&self) -> Vec<String> {
        let state = self.shared.lock();
        state
            .databases
            .get(&self.database)
            .map(|d| d.tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn transaction(
        &self,
        tables: &[&str],
        mode: TxnMode,
    ) -> EngineResult<Box<dyn Transaction>> {
        let mut state = self.shared.lock();

        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::ConnectionClosing);
        }

        if let Some(fault) = state.txn_faults.pop_front() {
            return Err(match fault {
                FaultKind::ConnectionClosing => EngineError::ConnectionClosing,
                FaultKind::TableMissing => EngineError::NoSuchTable(
                    tables.first().map(|t| t.to_string()).unwrap_or_default(),
                ),
            });
        }

        let db = state
            .databases
            .get(&self.database)
            .ok_or(EngineError::ConnectionClosing)?;
        if db.version != self.version {
            return Err(EngineError::ConnectionClosing);
        }
        for table in tables {
            if !db.tables.contains_key(*table) {
                return Err(EngineError::NoSuchTable(table.to_string()));
            }
        }

        state.transactions_started += 1;
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            database: self.database.clone(),
            version: self.version,
            tables: tables.iter().map(|t| t.to_string()).collect(),
            mode,
            staged: Vec::new(),
            closed: Arc::clone(&self.closed),
        }))
    }
}

enum StagedWrite {
    Put(String, String, Vec<u8>),
    Delete(String, String),
    Clear(String),
}

struct MemoryTransaction {
    shared: Arc<Mutex<EngineState>>,
    database: String,
    version: u64,
    tables: Vec<String>,
    mode: TxnMode,
    staged: Vec<StagedWrite>,
    closed: Arc<AtomicBool>,
}

impl MemoryTransaction {
    fn check_scope(&self, table: &str) -> EngineResult<()> {
        if self.tables.iter().any(|t| t == table) {
            Ok(())
        } else {
            Err(EngineError::NoSuchTable(table.to_string()))
        }
    }

    fn check_writable(&self, table: &str) -> EngineResult<()> {
        self.check_scope(table)?;
        if self.mode == TxnMode::ReadOnly {
            return Err(EngineError::ReadOnly);
        }
        Ok(())
    }

    fn read_table<R>(&self, table: &str, f: impl FnOnce(&Table) -> R) -> EngineResult<R> {
        self.check_scope(table)?;
        let state = self.shared.lock();
        let db = state
            .databases
            .get(&self.database)
            .ok_or(EngineError::ConnectionClosing)?;
        let table = db
            .tables
            .get(table)
            .ok_or_else(|| EngineError::NoSuchTable(table.to_string()))?;
        Ok(f(table))
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, table: &str, key: &str) -> EngineResult<Option<Vec<u8>>> {
        self.read_table(table, |t| t.get(key).cloned())
    }

    async fn get_all(&mut self, table: &str) -> EngineResult<Vec<Vec<u8>>> {
        self.read_table(table, |t| t.values().cloned().collect())
    }

    async fn get_all_keys(&mut self, table: &str) -> EngineResult<Vec<String>> {
        self.read_table(table, |t| t.keys().cloned().collect())
    }

    async fn put(&mut self, table: &str, key: &str, value: Vec<u8>) -> EngineResult<()> {
        self.check_writable(table)?;
        self.staged
            .push(StagedWrite::Put(table.to_string(), key.to_string(), value));
        Ok(())
    }

    async fn delete(&mut self, table: &str, key: &str) -> EngineResult<()> {
        self.check_writable(table)?;
        self.staged
            .push(StagedWrite::Delete(table.to_string(), key.to_string()));
        Ok(())
    }

    async fn clear(&mut self, table: &str) -> EngineResult<()> {
        self.check_writable(table)?;
        self.staged.push(StagedWrite::Clear(table.to_string()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> EngineResult<()> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let mut state = self.shared.lock();

        // A close or higher-version open between staging and commit aborts
        // the whole transaction; nothing is applied.
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::ConnectionClosing);
        }
        let db = state
            .databases
            .get_mut(&self.database)
            .ok_or(EngineError::ConnectionClosing)?;
        if db.version != self.version {
            return Err(EngineError::ConnectionClosing);
        }
        for table in &self.tables {
            if !db.tables.contains_key(table) {
                return Err(EngineError::NoSuchTable(table.clone()));
            }
        }

        for write in self.staged {
            match write {
                StagedWrite::Put(table, key, value) => {
                    if let Some(t) = db.tables.get_mut(&table) {
                        t.insert(key, value);
                    }
                }
                StagedWrite::Delete(table, key) => {
                    if let Some(t) = db.tables.get_mut(&table) {
                        t.remove(&key);
                    }
                }
                StagedWrite::Clear(table) => {
                    if let Some(t) = db.tables.get_mut(&table) {
                        t.clear();
                    }
                }
            }
        }
        Ok(())
    }
}
