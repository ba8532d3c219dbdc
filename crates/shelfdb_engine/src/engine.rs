//! Engine trait definitions.

use crate::error::EngineResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Access mode for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    /// Reads only.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

/// The outcome of an open request.
///
/// Opening a database at a version above the one on disk (or opening a
/// database that does not exist yet, which is on-disk version 0) yields
/// [`OpenEvent::UpgradeNeeded`] first: schema changes are only permitted on
/// the upgrade transaction, before it commits. An open at the current version
/// yields [`OpenEvent::Opened`] directly.
pub enum OpenEvent {
    /// The on-disk version was below the requested one. The upgrade
    /// transaction is live; committing it yields the connection.
    UpgradeNeeded(Box<dyn UpgradeTransaction>),
    /// The database opened at its current version.
    Opened(Arc<dyn Connection>),
}

/// A versioned, table-holding key-value engine.
///
/// ShelfDB treats the engine as an external collaborator: it never interprets
/// on-disk formats and only relies on the contracts below.
///
/// # Invariants
///
/// - A database that has never been created reports on-disk version 0, so an
///   open without an explicit version upgrades it to version 1.
/// - Opening at a higher version invalidates connections opened at lower
///   versions; their subsequent transactions fail with
///   [`EngineError::ConnectionClosing`](crate::EngineError::ConnectionClosing).
/// - Opening at a lower version than on disk is a
///   [`EngineError::VersionConflict`](crate::EngineError::VersionConflict).
#[async_trait]
pub trait Engine: Send + Sync {
    /// Opens the named database.
    ///
    /// Without an explicit version the database opens at its current on-disk
    /// version (or version 1 for a fresh database, via an upgrade event).
    ///
    /// # Errors
    ///
    /// Returns an error if the open fails or the requested version is below
    /// the existing one.
    async fn open(&self, name: &str, version: Option<u64>) -> EngineResult<OpenEvent>;

    /// Deletes the named database and all of its tables.
    ///
    /// Deleting a database that does not exist is not an error.
    async fn delete_database(&self, name: &str) -> EngineResult<()>;

    /// Returns the names of all existing databases.
    async fn database_names(&self) -> EngineResult<Vec<String>>;
}

/// The transaction in which schema changes are allowed.
///
/// Delivered once per upgrade open; auto-commits at the `commit` call
/// boundary. Table creations become visible to connections only after commit.
#[async_trait]
pub trait UpgradeTransaction: Send {
    /// The version this upgrade is targeting.
    fn version(&self) -> u64;

    /// Returns true if the schema (including staged creations) contains the
    /// table.
    fn contains_table(&self, table: &str) -> bool;

    /// Names of all tables in the schema, including staged creations.
    fn table_names(&self) -> Vec<String>;

    /// Stages creation of an empty table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table already exists.
    fn create_table(&mut self, table: &str) -> EngineResult<()>;

    /// Commits the upgrade and yields the opened connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; no schema change is applied in
    /// that case.
    async fn commit(self: Box<Self>) -> EngineResult<Arc<dyn Connection>>;
}

/// A live connection to one database at one schema version.
#[async_trait]
pub trait Connection: Send + Sync {
    /// The schema version this connection was opened at.
    fn version(&self) -> u64;

    /// Returns true if the database currently contains the table.
    fn contains_table(&self, table: &str) -> bool;

    /// Names of all tables currently in the database.
    fn table_names(&self) -> Vec<String>;

    /// Closes the connection. Subsequent transactions fail with
    /// `ConnectionClosing`. Idempotent.
    fn close(&self);

    /// Returns true if the connection has been closed.
    fn is_closed(&self) -> bool;

    /// Begins a transaction scoped to the given tables.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosing` if the connection is closed or was
    /// superseded by a higher-version open, and `NoSuchTable` if any scoped
    /// table is missing.
    async fn transaction(&self, tables: &[&str], mode: TxnMode)
        -> EngineResult<Box<dyn Transaction>>;
}

/// A transaction over one or more tables.
///
/// Writes are staged and applied atomically on [`commit`](Self::commit):
/// either every staged write persists or none does.
#[async_trait]
pub trait Transaction: Send {
    /// Reads the value stored under `key`, if any.
    async fn get(&mut self, table: &str, key: &str) -> EngineResult<Option<Vec<u8>>>;

    /// Reads all values in the table, in engine-defined order.
    async fn get_all(&mut self, table: &str) -> EngineResult<Vec<Vec<u8>>>;

    /// Reads all keys in the table, in engine-defined order.
    async fn get_all_keys(&mut self, table: &str) -> EngineResult<Vec<String>>;

    /// Stages a write of `value` under `key`.
    async fn put(&mut self, table: &str, key: &str, value: Vec<u8>) -> EngineResult<()>;

    /// Stages deletion of `key`.
    async fn delete(&mut self, table: &str, key: &str) -> EngineResult<()>;

    /// Stages removal of every entry in the table.
    async fn clear(&mut self, table: &str) -> EngineResult<()>;

    /// Applies all staged writes atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection was closed or superseded in the
    /// meantime; no staged write is applied in that case.
    async fn commit(self: Box<Self>) -> EngineResult<()>;
}
