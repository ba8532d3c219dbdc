//! Registry of shared per-database connection records.
//!
//! The registry is an injected service (not a process global): every shelf
//! created from one registry shares its records, and a record is the sole
//! serialization point for one database's connection lifecycle. All record
//! mutation goes through the narrow method surface on [`Record`].

use crate::config::ShelfConfig;
use crate::error::{ShelfError, ShelfResult};
use crate::handle::Shelf;
use parking_lot::Mutex;
use shelfdb_engine::{Connection, Engine};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// Readiness of one database's shared connection.
///
/// Monotonic within a session: `Uninitialized → Opening → Ready`, then
/// `Ready ⇄ Upgrading` any number of times. A failed open or an invalidated
/// connection starts a fresh session at `Uninitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No connection and no open in flight.
    Uninitialized,
    /// The initial open is in flight.
    Opening,
    /// A connection is live and usable.
    Ready,
    /// The connection was closed and a higher-version open is in flight.
    Upgrading,
}

struct RecordState {
    status: Status,
    connection: Option<Arc<dyn Connection>>,
    /// Tables whose creation is deferred to the next upgrade transaction.
    /// An entry is cleared only by the upgrade event that services it, so a
    /// failed open leaves sibling creation attempts registered.
    deferred_tables: HashSet<String>,
    open_in_flight: bool,
    generation: u64,
}

/// What a handle should do next to attach to the shared connection.
pub(crate) enum AttachPlan {
    /// The connection is ready and contains the handle's table.
    Use(Arc<dyn Connection>),
    /// Someone else's open is in flight; wait past this generation and
    /// re-validate.
    Wait(u64),
    /// This handle became the opener. `close` is the superseded connection,
    /// to be closed before the open is issued.
    Open {
        version: Option<u64>,
        close: Option<Arc<dyn Connection>>,
    },
}

/// The shared connection record for one database name.
///
/// Lives for the registry's lifetime; `drop_database` resets it to
/// `Uninitialized` rather than removing it, so a later shelf for the same
/// name starts a fresh cycle on the same record.
pub(crate) struct Record {
    database: String,
    state: Mutex<RecordState>,
    changed: Notify,
}

impl Record {
    fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            state: Mutex::new(RecordState {
                status: Status::Uninitialized,
                connection: None,
                deferred_tables: HashSet::new(),
                open_in_flight: false,
                generation: 0,
            }),
            changed: Notify::new(),
        }
    }

    pub(crate) fn database(&self) -> &str {
        &self.database
    }

    pub(crate) fn status(&self) -> Status {
        self.state.lock().status
    }

    /// Decides, atomically, how a handle for `table` attaches to this record.
    ///
    /// May transition `Uninitialized → Opening` or `Ready → Upgrading`
    /// (registering the deferred creation of `table`); in both cases the
    /// caller owns the resulting open request. At most one open is ever in
    /// flight per record.
    pub(crate) fn plan_attach(&self, table: &str) -> AttachPlan {
        let mut st = self.state.lock();
        match st.status {
            Status::Uninitialized => {
                st.status = Status::Opening;
                st.open_in_flight = true;
                st.generation += 1;
                AttachPlan::Open {
                    version: None,
                    close: None,
                }
            }
            Status::Opening | Status::Upgrading => AttachPlan::Wait(st.generation),
            Status::Ready => match st.connection.take() {
                Some(conn) if conn.contains_table(table) => {
                    st.connection = Some(Arc::clone(&conn));
                    AttachPlan::Use(conn)
                }
                Some(conn) => {
                    debug!(
                        database = %self.database,
                        table,
                        from_version = conn.version(),
                        "table missing, bumping version"
                    );
                    st.deferred_tables.insert(table.to_string());
                    st.status = Status::Upgrading;
                    st.open_in_flight = true;
                    st.generation += 1;
                    AttachPlan::Open {
                        version: Some(conn.version() + 1),
                        close: Some(conn),
                    }
                }
                // Ready without a connection cannot be produced by the
                // setters below; recover by reopening.
                None => {
                    st.status = Status::Opening;
                    st.open_in_flight = true;
                    st.generation += 1;
                    AttachPlan::Open {
                        version: None,
                        close: None,
                    }
                }
            },
        }
    }

    /// Stores the freshly opened connection and marks the record Ready.
    pub(crate) fn complete_open(&self, conn: Arc<dyn Connection>) {
        {
            let mut st = self.state.lock();
            debug!(
                database = %self.database,
                version = conn.version(),
                "connection ready"
            );
            st.connection = Some(conn);
            st.status = Status::Ready;
            st.open_in_flight = false;
            st.generation += 1;
        }
        self.changed.notify_waiters();
    }

    /// Resets the record after a failed open so sibling attach attempts are
    /// retried. Deferred creations are kept.
    pub(crate) fn fail_open(&self) {
        {
            let mut st = self.state.lock();
            debug!(database = %self.database, "open failed, resetting record");
            st.connection = None;
            st.status = Status::Uninitialized;
            st.open_in_flight = false;
            st.generation += 1;
        }
        self.changed.notify_waiters();
    }

    /// Snapshot of the registered deferred creations. The opener services
    /// them inside the next upgrade transaction.
    pub(crate) fn deferred_snapshot(&self) -> Vec<String> {
        self.state.lock().deferred_tables.iter().cloned().collect()
    }

    /// Clears the deferred-creation entry for `table`. Called from inside the
    /// upgrade event that services it, before the transaction auto-commits.
    pub(crate) fn clear_deferred(&self, table: &str) {
        self.state.lock().deferred_tables.remove(table);
    }

    /// Drops the stored connection if it is still `conn`, starting a fresh
    /// session. A record that already moved on (sibling reopened, or an open
    /// is in flight) is left untouched.
    pub(crate) fn invalidate_if_current(&self, conn: &Arc<dyn Connection>) {
        let stale = {
            let mut st = self.state.lock();
            let current = st.status == Status::Ready
                && st
                    .connection
                    .as_ref()
                    .is_some_and(|stored| Arc::ptr_eq(stored, conn));
            if current {
                st.connection = None;
                st.status = Status::Uninitialized;
                st.generation += 1;
            }
            current
        };
        if stale {
            debug!(database = %self.database, "connection invalidated");
            self.changed.notify_waiters();
        }
    }

    /// Takes the connection and resets the record ahead of a database drop.
    ///
    /// # Errors
    ///
    /// Returns [`ShelfError::SchemaConflict`] if an open or upgrade is in
    /// flight; the drop must not race it.
    pub(crate) fn begin_drop(&self) -> ShelfResult<Option<Arc<dyn Connection>>> {
        let conn = {
            let mut st = self.state.lock();
            if st.open_in_flight {
                return Err(ShelfError::schema_conflict(&self.database));
            }
            st.status = Status::Uninitialized;
            st.deferred_tables.clear();
            st.generation += 1;
            st.connection.take()
        };
        self.changed.notify_waiters();
        Ok(conn)
    }

    /// Waits until the record's generation moves past `seen`.
    ///
    /// The notified future is enabled before the generation re-check, so a
    /// wakeup between the check and the await is never lost. Callers must
    /// re-validate status after this returns.
    pub(crate) async fn wait_past(&self, seen: u64) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state.lock().generation != seen {
                return;
            }
            notified.await;
        }
    }
}

/// Maps database names to their shared connection records and creates
/// [`Shelf`] handles.
///
/// One registry per engine; shelves created from different registries do not
/// share connections. The registry owns its records for its whole lifetime.
pub struct Registry {
    engine: Arc<dyn Engine>,
    config: ShelfConfig,
    records: Mutex<HashMap<String, Arc<Record>>>,
}

impl Registry {
    /// Creates a registry over the given engine with default configuration.
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self::with_config(engine, ShelfConfig::default())
    }

    /// Creates a registry with explicit configuration.
    pub fn with_config(engine: Arc<dyn Engine>, config: ShelfConfig) -> Self {
        Self {
            engine,
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a shelf bound to `(database, table)`.
    ///
    /// Ensures the database's record exists; the open/table-exists pipeline
    /// is driven by the first awaited operation (or [`Shelf::ready`]).
    pub fn shelf(&self, database: &str, table: &str) -> Shelf {
        Shelf::new(
            Arc::clone(&self.engine),
            self.record(database),
            table,
            self.config.clone(),
        )
    }

    /// Returns the shared record for `database`, creating it if absent.
    pub(crate) fn record(&self, database: &str) -> Arc<Record> {
        let mut records = self.records.lock();
        Arc::clone(
            records
                .entry(database.to_string())
                .or_insert_with(|| Arc::new(Record::new(database))),
        )
    }

    /// The configuration shelves are created with.
    pub fn config(&self) -> &ShelfConfig {
        &self.config
    }

    /// Names of all databases that currently exist in the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine enumeration fails.
    pub async fn databases(&self) -> ShelfResult<Vec<String>> {
        Ok(self.engine.database_names().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelfdb_engine::{MemoryEngine, OpenEvent};

    async fn ready_connection(table: &str) -> Arc<dyn Connection> {
        let engine = MemoryEngine::new();
        match engine.open("db", None).await.unwrap() {
            OpenEvent::UpgradeNeeded(mut upgrade) => {
                upgrade.create_table(table).unwrap();
                upgrade.commit().await.unwrap()
            }
            OpenEvent::Opened(conn) => conn,
        }
    }

    #[tokio::test]
    async fn fresh_record_elects_an_opener() {
        let record = Record::new("db");
        assert_eq!(record.status(), Status::Uninitialized);

        match record.plan_attach("t") {
            AttachPlan::Open {
                version: None,
                close: None,
            } => {}
            _ => panic!("first attach must open"),
        }
        assert_eq!(record.status(), Status::Opening);

        // A second attach while the open is in flight waits.
        assert!(matches!(record.plan_attach("t"), AttachPlan::Wait(_)));
    }

    #[tokio::test]
    async fn ready_record_with_table_short_circuits() {
        let record = Record::new("db");
        let _ = record.plan_attach("t");
        record.complete_open(ready_connection("t").await);

        assert_eq!(record.status(), Status::Ready);
        assert!(matches!(record.plan_attach("t"), AttachPlan::Use(_)));
    }

    #[tokio::test]
    async fn missing_table_plans_a_version_bump() {
        let record = Record::new("db");
        let _ = record.plan_attach("t");
        record.complete_open(ready_connection("t").await);

        match record.plan_attach("other") {
            AttachPlan::Open {
                version: Some(2),
                close: Some(_),
            } => {}
            _ => panic!("missing table must bump the version"),
        }
        assert_eq!(record.status(), Status::Upgrading);
    }

    #[tokio::test]
    async fn failed_open_resets_and_wakes() {
        let record = Arc::new(Record::new("db"));
        let seen = match record.plan_attach("t") {
            AttachPlan::Open { .. } => 1,
            _ => panic!(),
        };

        let waiter = {
            let record = Arc::clone(&record);
            tokio::spawn(async move { record.wait_past(seen).await })
        };
        record.fail_open();
        waiter.await.unwrap();

        assert_eq!(record.status(), Status::Uninitialized);
        // The next attach becomes the new opener.
        assert!(matches!(record.plan_attach("t"), AttachPlan::Open { .. }));
    }

    #[tokio::test]
    async fn begin_drop_conflicts_with_inflight_open() {
        let record = Record::new("db");
        let _ = record.plan_attach("t");

        let Err(err) = record.begin_drop() else {
            panic!("drop must conflict with the in-flight open");
        };
        assert!(err.is_schema_conflict());
        // The in-flight open is untouched.
        assert_eq!(record.status(), Status::Opening);
    }

    #[tokio::test]
    async fn begin_drop_when_ready_resets_the_record() {
        let record = Record::new("db");
        let _ = record.plan_attach("t");
        record.complete_open(ready_connection("t").await);

        let conn = record.begin_drop().unwrap();
        assert!(conn.is_some());
        assert_eq!(record.status(), Status::Uninitialized);
    }

    #[tokio::test]
    async fn invalidate_only_applies_to_the_current_connection() {
        let record = Record::new("db");
        let _ = record.plan_attach("t");
        let old = ready_connection("t").await;
        record.complete_open(Arc::clone(&old));

        // A sibling already replaced the connection.
        let new = ready_connection("t").await;
        record.complete_open(Arc::clone(&new));

        record.invalidate_if_current(&old);
        assert_eq!(record.status(), Status::Ready);

        record.invalidate_if_current(&new);
        assert_eq!(record.status(), Status::Uninitialized);
    }

    #[tokio::test]
    async fn registry_shares_records_per_database() {
        let registry = Registry::new(Arc::new(MemoryEngine::new()));
        let a = registry.record("app");
        let b = registry.record("app");
        let c = registry.record("other");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
