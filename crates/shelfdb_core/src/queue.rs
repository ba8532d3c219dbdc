//! FIFO admission of operations and the retry loop around each attempt.

use crate::error::{ShelfError, ShelfResult};
use crate::retry::RetryPolicy;
use crate::session::Session;
use shelfdb_engine::{Connection, EngineResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

/// Per-handle FIFO admission of operations.
///
/// Operations submitted before the connection or table is ready do not run
/// immediately: they hold a queue slot and execute, in submission order, once
/// readiness clears. The slot is a fair async mutex, granted by tokio
/// strictly in request order, so a burst of operations submitted while the
/// record is opening drains exhaustively, first-submitted-first-run, and
/// operations submitted during the drain simply queue behind it. A queued
/// operation is never dropped: it runs, retries, or fails visibly.
pub(crate) struct OperationQueue {
    slot: Mutex<()>,
}

impl OperationQueue {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(()),
        }
    }

    /// Runs `op` once the session is ready, retrying transient failures up to
    /// the policy ceiling.
    ///
    /// `op` builds one execution attempt against the supplied connection;
    /// it is invoked afresh for every attempt. Transient failures during the
    /// readiness phase and during execution count against the same ceiling.
    pub(crate) async fn submit<T, F, Fut>(
        &self,
        session: &Session,
        policy: &RetryPolicy,
        mut op: F,
    ) -> ShelfResult<T>
    where
        F: FnMut(Arc<dyn Connection>) -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let _slot = self.slot.lock().await;
        let mut attempts: u32 = 0;

        loop {
            let conn = match session.ensure_table().await {
                Ok(conn) => conn,
                Err(ShelfError::Engine(err)) if policy.is_transient(&err) => {
                    attempts += 1;
                    if attempts >= policy.max_attempts() {
                        return Err(policy.exhausted(attempts, err));
                    }
                    continue;
                }
                Err(other) => return Err(other),
            };

            match op(Arc::clone(&conn)).await {
                Ok(value) => return Ok(value),
                Err(err) if policy.is_transient(&err) => {
                    attempts += 1;
                    trace!(
                        database = session.database(),
                        table = session.table(),
                        attempts,
                        %err,
                        "transient failure, retrying"
                    );
                    if attempts >= policy.max_attempts() {
                        return Err(policy.exhausted(attempts, err));
                    }
                    session.recover(&err, &conn);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
