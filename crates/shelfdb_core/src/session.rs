//! Per-handle session coordination: readiness, version bumps, recovery.

use crate::error::ShelfResult;
use crate::opener::ConnectionOpener;
use crate::registry::{AttachPlan, Record, Status};
use shelfdb_engine::{Connection, Engine, EngineError};
use std::sync::Arc;
use tracing::debug;

/// One handle's view of the shared connection record.
///
/// `ensure_table` realizes the `Ready ⇄ Upgrading` state machine: a handle
/// that finds its table missing registers a deferred creation, closes the
/// shared connection, and reopens at version + 1; handles that lose the race
/// wait for a generation change and re-validate. Each delivered upgrade event
/// creates exactly one table, so N distinct missing tables resolve through N
/// strictly serialized bumps.
pub(crate) struct Session {
    engine: Arc<dyn Engine>,
    record: Arc<Record>,
    opener: ConnectionOpener,
    table: String,
}

impl Session {
    pub(crate) fn new(engine: Arc<dyn Engine>, record: Arc<Record>, table: &str) -> Self {
        let opener = ConnectionOpener::new(Arc::clone(&engine), Arc::clone(&record));
        Self {
            engine,
            record,
            opener,
            table: table.to_string(),
        }
    }

    pub(crate) fn table(&self) -> &str {
        &self.table
    }

    pub(crate) fn database(&self) -> &str {
        self.record.database()
    }

    pub(crate) fn status(&self) -> Status {
        self.record.status()
    }

    /// Resolves to a Ready connection whose schema contains this session's
    /// table, opening or upgrading as needed.
    ///
    /// Every await is followed by a fresh `plan_attach`: status may have been
    /// changed by a sibling while this session was suspended.
    pub(crate) async fn ensure_table(&self) -> ShelfResult<Arc<dyn Connection>> {
        loop {
            match self.record.plan_attach(&self.table) {
                AttachPlan::Use(conn) => return Ok(conn),
                AttachPlan::Wait(seen) => self.record.wait_past(seen).await,
                AttachPlan::Open { version, close } => {
                    // The previous connection always closes before the
                    // higher-version open is issued.
                    if let Some(conn) = close {
                        conn.close();
                    }
                    self.opener.open(version, &self.table).await?;
                }
            }
        }
    }

    /// Reacts to a transient failure observed on `conn` so the next
    /// `ensure_table` makes progress.
    ///
    /// Connection churn invalidates the record only if it still holds that
    /// exact connection; a record a sibling already moved on is left alone.
    /// A momentarily missing table needs no action here: re-validation
    /// re-checks the schema and bumps if the table is genuinely absent.
    pub(crate) fn recover(&self, err: &EngineError, conn: &Arc<dyn Connection>) {
        if matches!(err, EngineError::ConnectionClosing) {
            conn.close();
            self.record.invalidate_if_current(conn);
        }
    }

    /// Drops the whole database.
    ///
    /// Bypasses the operation queue: rejects immediately with a schema
    /// conflict while an open or upgrade is in flight. Otherwise closes the
    /// connection, deletes the database through the engine, and resolves only
    /// after engine confirmation; the record is left `Uninitialized` so a
    /// later handle for the same name starts a fresh cycle.
    pub(crate) async fn drop_database(&self) -> ShelfResult<()> {
        let conn = self.record.begin_drop()?;
        if let Some(conn) = conn {
            conn.close();
        }
        debug!(database = %self.record.database(), "dropping database");
        self.engine.delete_database(self.record.database()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use shelfdb_engine::MemoryEngine;

    fn session(engine: &Arc<MemoryEngine>, registry: &Registry, table: &str) -> Session {
        let engine: Arc<dyn Engine> = Arc::clone(engine) as Arc<dyn Engine>;
        Session::new(engine, registry.record("app"), table)
    }

    #[tokio::test]
    async fn ensure_table_creates_schema_on_first_open() {
        let engine = Arc::new(MemoryEngine::new());
        let registry = Registry::new(Arc::clone(&engine) as Arc<dyn Engine>);
        let s = session(&engine, &registry, "settings");

        let conn = s.ensure_table().await.unwrap();
        assert_eq!(conn.version(), 1);
        assert!(conn.contains_table("settings"));
        assert_eq!(s.status(), Status::Ready);
    }

    #[tokio::test]
    async fn second_table_cascades_a_version_bump() {
        let engine = Arc::new(MemoryEngine::new());
        let registry = Registry::new(Arc::clone(&engine) as Arc<dyn Engine>);

        let s1 = session(&engine, &registry, "t1");
        let first = s1.ensure_table().await.unwrap();
        assert_eq!(first.version(), 1);

        let s2 = session(&engine, &registry, "t2");
        let second = s2.ensure_table().await.unwrap();
        assert_eq!(second.version(), 2);
        // Schema is the union; the bump never clobbers the sibling's table.
        assert!(second.contains_table("t1"));
        assert!(second.contains_table("t2"));
        assert!(first.is_closed());

        // The first session re-validates onto the new connection.
        let again = s1.ensure_table().await.unwrap();
        assert_eq!(again.version(), 2);
    }

    #[tokio::test]
    async fn deferred_creation_survives_a_failed_open() {
        let engine = Arc::new(MemoryEngine::new());
        let registry = Registry::new(Arc::clone(&engine) as Arc<dyn Engine>);

        let s1 = session(&engine, &registry, "t1");
        s1.ensure_table().await.unwrap();
        assert_eq!(engine.version_of("app"), Some(1));

        // t2's version bump fails at the engine; its creation stays
        // registered on the record.
        engine.fail_opens(1);
        let s2 = session(&engine, &registry, "t2");
        assert!(s2.ensure_table().await.is_err());

        // The next upgrade (instigated by t3) services t2's entry too:
        // one bump creates both tables.
        let s3 = session(&engine, &registry, "t3");
        let conn = s3.ensure_table().await.unwrap();
        assert_eq!(engine.version_of("app"), Some(2));
        assert!(conn.contains_table("t2"));
        assert!(conn.contains_table("t3"));

        // t2 now attaches without another bump.
        let conn = s2.ensure_table().await.unwrap();
        assert_eq!(conn.version(), 2);
    }

    #[tokio::test]
    async fn recover_invalidates_only_the_current_connection() {
        let engine = Arc::new(MemoryEngine::new());
        let registry = Registry::new(Arc::clone(&engine) as Arc<dyn Engine>);
        let s = session(&engine, &registry, "t");

        let conn = s.ensure_table().await.unwrap();
        s.recover(&EngineError::ConnectionClosing, &conn);
        assert_eq!(s.status(), Status::Uninitialized);
        assert!(conn.is_closed());

        // A fresh ensure reopens at the same version.
        let conn = s.ensure_table().await.unwrap();
        assert_eq!(conn.version(), 1);

        // Table-missing failures leave the record alone.
        s.recover(&EngineError::NoSuchTable("t".into()), &conn);
        assert_eq!(s.status(), Status::Ready);
    }

    #[tokio::test]
    async fn drop_database_waits_for_engine_confirmation() {
        let engine = Arc::new(MemoryEngine::new());
        let registry = Registry::new(Arc::clone(&engine) as Arc<dyn Engine>);
        let s = session(&engine, &registry, "t");
        s.ensure_table().await.unwrap();

        s.drop_database().await.unwrap();
        assert_eq!(engine.version_of("app"), None);
        assert_eq!(s.status(), Status::Uninitialized);

        // A fresh cycle starts from scratch.
        let conn = s.ensure_table().await.unwrap();
        assert_eq!(conn.version(), 1);
    }
}
