//! Issues open requests and routes their outcomes.

use crate::error::ShelfResult;
use crate::registry::Record;
use shelfdb_engine::{Engine, OpenEvent};
use std::sync::Arc;
use tracing::debug;

/// Opens (or reopens) the shared connection for one record.
///
/// The caller must have won the open through
/// [`Record::plan_attach`](crate::registry::Record) (the record is in
/// `Opening` or `Upgrading` with the open flag set) and must have closed the
/// superseded connection. Exactly one of the three outcomes is applied to the
/// record: upgrade-then-success, success, or error.
pub(crate) struct ConnectionOpener {
    engine: Arc<dyn Engine>,
    record: Arc<Record>,
}

impl ConnectionOpener {
    pub(crate) fn new(engine: Arc<dyn Engine>, record: Arc<Record>) -> Self {
        Self { engine, record }
    }

    /// Issues the open and settles the record.
    ///
    /// On an upgrade event, creates `table` plus any registered deferred
    /// creations inside the upgrade transaction, clearing each serviced
    /// entry before the transaction auto-commits. A table arriving while the
    /// record is already Ready re-attaches and bumps on its own, so under
    /// normal churn one upgrade event services exactly one table; entries
    /// left behind by a failed open ride along with the next upgrade.
    ///
    /// # Errors
    ///
    /// Propagates engine failures to the instigating handle after resetting
    /// the record, which wakes siblings so their creation attempts retry.
    pub(crate) async fn open(&self, version: Option<u64>, table: &str) -> ShelfResult<()> {
        let database = self.record.database();
        debug!(database, ?version, "opening database");

        let event = match self.engine.open(database, version).await {
            Ok(event) => event,
            Err(err) => {
                self.record.fail_open();
                return Err(err.into());
            }
        };

        match event {
            OpenEvent::UpgradeNeeded(mut upgrade) => {
                debug!(database, version = upgrade.version(), table, "upgrade event");
                let mut pending = self.record.deferred_snapshot();
                if !pending.iter().any(|t| t == table) {
                    pending.push(table.to_string());
                }
                for table in &pending {
                    if !upgrade.contains_table(table) {
                        if let Err(err) = upgrade.create_table(table) {
                            self.record.fail_open();
                            return Err(err.into());
                        }
                    }
                    self.record.clear_deferred(table);
                }
                match upgrade.commit().await {
                    Ok(conn) => {
                        self.record.complete_open(conn);
                        Ok(())
                    }
                    Err(err) => {
                        self.record.fail_open();
                        Err(err.into())
                    }
                }
            }
            OpenEvent::Opened(conn) => {
                self.record.complete_open(conn);
                Ok(())
            }
        }
    }
}
