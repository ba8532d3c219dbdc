//! The public shelf handle.

use crate::config::ShelfConfig;
use crate::error::ShelfResult;
use crate::queue::OperationQueue;
use crate::registry::{Record, Status};
use crate::retry::RetryPolicy;
use crate::session::Session;
use shelfdb_engine::{Engine, TxnMode};
use std::sync::Arc;

/// A key-value shelf bound to one `(database, table)` pair.
///
/// Shelves are created through [`Registry::shelf`](crate::Registry::shelf).
/// All shelves for one database share one underlying connection; each shelf
/// independently guarantees that its own table exists, creating it through a
/// serialized version upgrade if needed.
///
/// Operations submitted before the connection and table are ready are queued
/// and run in submission order once readiness clears. Failures caused by a
/// sibling shelf concurrently reopening the shared connection are retried up
/// to the configured ceiling. Every operation resolves to exactly one `Ok`
/// or one `Err`; operations are not cancellable once submitted, though the
/// caller may drop the future's result.
///
/// # Example
///
/// ```rust,ignore
/// use shelfdb_core::Registry;
/// use shelfdb_engine::MemoryEngine;
/// use std::sync::Arc;
///
/// let registry = Registry::new(Arc::new(MemoryEngine::new()));
/// let shelf = registry.shelf("app", "settings");
///
/// shelf.set("theme", b"dark".to_vec()).await?;
/// let theme = shelf.get("theme").await?;
/// ```
pub struct Shelf {
    session: Session,
    queue: OperationQueue,
    policy: RetryPolicy,
}

impl Shelf {
    pub(crate) fn new(
        engine: Arc<dyn Engine>,
        record: Arc<Record>,
        table: &str,
        config: ShelfConfig,
    ) -> Self {
        Self {
            session: Session::new(engine, record, table),
            queue: OperationQueue::new(),
            policy: RetryPolicy::new(config.retry),
        }
    }

    /// The database this shelf is bound to.
    pub fn database(&self) -> &str {
        self.session.database()
    }

    /// The table this shelf is bound to.
    pub fn table(&self) -> &str {
        self.session.table()
    }

    /// Current readiness of the shared connection record.
    pub fn status(&self) -> Status {
        self.session.status()
    }

    /// Drives the open/table-exists pipeline to completion without running
    /// an engine operation.
    ///
    /// Operations never require this (the first awaited operation drives the
    /// same pipeline), but it is useful to surface connection problems early.
    ///
    /// # Errors
    ///
    /// Returns an error if the open pipeline fails.
    pub async fn ready(&self) -> ShelfResult<()> {
        self.queue
            .submit(&self.session, &self.policy, |_conn| async { Ok(()) })
            .await
    }

    /// Reads the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails or retries are exhausted.
    pub async fn get(&self, key: &str) -> ShelfResult<Option<Vec<u8>>> {
        let table = self.session.table();
        self.queue
            .submit(&self.session, &self.policy, |conn| async move {
                let mut txn = conn.transaction(&[table], TxnMode::ReadOnly).await?;
                let value = txn.get(table, key).await?;
                txn.commit().await?;
                Ok(value)
            })
            .await
    }

    /// Reads all values in the table, in engine-defined order.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails or retries are exhausted.
    pub async fn get_all(&self) -> ShelfResult<Vec<Vec<u8>>> {
        let table = self.session.table();
        self.queue
            .submit(&self.session, &self.policy, |conn| async move {
                let mut txn = conn.transaction(&[table], TxnMode::ReadOnly).await?;
                let values = txn.get_all(table).await?;
                txn.commit().await?;
                Ok(values)
            })
            .await
    }

    /// Reads all keys in the table, in engine-defined order.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails or retries are exhausted.
    pub async fn get_all_keys(&self) -> ShelfResult<Vec<String>> {
        let table = self.session.table();
        self.queue
            .submit(&self.session, &self.policy, |conn| async move {
                let mut txn = conn.transaction(&[table], TxnMode::ReadOnly).await?;
                let keys = txn.get_all_keys(table).await?;
                txn.commit().await?;
                Ok(keys)
            })
            .await
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails or retries are exhausted.
    pub async fn set(&self, key: &str, value: Vec<u8>) -> ShelfResult<()> {
        let table = self.session.table();
        self.queue
            .submit(&self.session, &self.policy, |conn| {
                let value = value.clone();
                async move {
                    let mut txn = conn.transaction(&[table], TxnMode::ReadWrite).await?;
                    txn.put(table, key, value).await?;
                    txn.commit().await
                }
            })
            .await
    }

    /// Stores every `(key, value)` pair in one all-or-nothing transaction.
    ///
    /// Either every pair persists or none does; a failure surfaces as a
    /// single error and is never retried per item. An empty input resolves
    /// successfully without touching the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails or retries are exhausted.
    pub async fn set_multiple(&self, items: Vec<(String, Vec<u8>)>) -> ShelfResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let table = self.session.table();
        self.queue
            .submit(&self.session, &self.policy, |conn| {
                let items = items.clone();
                async move {
                    let mut txn = conn.transaction(&[table], TxnMode::ReadWrite).await?;
                    for (key, value) in items {
                        txn.put(table, &key, value).await?;
                    }
                    txn.commit().await
                }
            })
            .await
    }

    /// Deletes the value stored under `key`. Deleting a missing key is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails or retries are exhausted.
    pub async fn delete(&self, key: &str) -> ShelfResult<()> {
        let table = self.session.table();
        self.queue
            .submit(&self.session, &self.policy, |conn| async move {
                let mut txn = conn.transaction(&[table], TxnMode::ReadWrite).await?;
                txn.delete(table, key).await?;
                txn.commit().await
            })
            .await
    }

    /// Removes every entry in this shelf's table. The table itself remains.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails or retries are exhausted.
    pub async fn clear(&self) -> ShelfResult<()> {
        let table = self.session.table();
        self.queue
            .submit(&self.session, &self.policy, |conn| async move {
                let mut txn = conn.transaction(&[table], TxnMode::ReadWrite).await?;
                txn.clear(table).await?;
                txn.commit().await
            })
            .await
    }

    /// Drops the whole database this shelf is bound to.
    ///
    /// Bypasses the operation queue: while a version upgrade (or any open) is
    /// in flight the call rejects immediately with
    /// [`ShelfError::SchemaConflict`](crate::ShelfError::SchemaConflict) and
    /// performs no close or delete. Otherwise the shared connection is
    /// closed, the database deleted, and the shared record reset so a later
    /// shelf for the same name starts a fresh cycle. Resolves only after
    /// engine confirmation.
    ///
    /// # Errors
    ///
    /// Returns a schema conflict mid-upgrade, or the engine's deletion error.
    pub async fn drop_database(&self) -> ShelfResult<()> {
        self.session.drop_database().await
    }
}
