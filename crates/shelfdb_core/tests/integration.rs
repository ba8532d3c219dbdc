//! End-to-end scenarios for the connection lifecycle coordinator.

use async_trait::async_trait;
use shelfdb_core::{Registry, ShelfError, Status};
use shelfdb_engine::{Engine, EngineResult, FaultKind, MemoryEngine, OpenEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// An engine wrapper whose open requests can be held at a gate, to pin the
/// coordinator in its Opening/Upgrading states from a test.
struct GatedEngine {
    inner: Arc<MemoryEngine>,
    held: AtomicBool,
    gate: Notify,
}

impl GatedEngine {
    fn new(inner: Arc<MemoryEngine>) -> Self {
        Self {
            inner,
            held: AtomicBool::new(false),
            gate: Notify::new(),
        }
    }

    fn hold_opens(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    fn release_opens(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.gate.notify_waiters();
    }

    async fn wait_released(&self) {
        loop {
            let notified = self.gate.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.held.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Engine for GatedEngine {
    async fn open(&self, name: &str, version: Option<u64>) -> EngineResult<OpenEvent> {
        self.wait_released().await;
        self.inner.open(name, version).await
    }

    async fn delete_database(&self, name: &str) -> EngineResult<()> {
        self.inner.delete_database(name).await
    }

    async fn database_names(&self) -> EngineResult<Vec<String>> {
        self.inner.database_names().await
    }
}

fn fresh_registry() -> (Arc<MemoryEngine>, Registry) {
    let engine = Arc::new(MemoryEngine::new());
    let registry = Registry::new(Arc::clone(&engine) as Arc<dyn Engine>);
    (engine, registry)
}

#[tokio::test]
async fn operations_queued_before_readiness_run_in_submission_order() {
    let engine = Arc::new(MemoryEngine::new());
    let gated = Arc::new(GatedEngine::new(Arc::clone(&engine)));
    let registry = Registry::new(Arc::clone(&gated) as Arc<dyn Engine>);
    let shelf = registry.shelf("app", "kv");

    // Everything below is submitted while the open is held at the gate.
    gated.hold_opens();
    let release = async {
        tokio::task::yield_now().await;
        assert_eq!(shelf.status(), Status::Opening);
        gated.release_opens();
    };

    let (first, second, read, ()) = tokio::join!(
        shelf.set("k", b"1".to_vec()),
        shelf.set("k", b"2".to_vec()),
        shelf.get("k"),
        release,
    );

    first.unwrap();
    second.unwrap();
    // Submission order: the second write lands after the first, and the read
    // runs after both.
    assert_eq!(read.unwrap(), Some(b"2".to_vec()));
}

#[tokio::test]
async fn write_then_read_queued_before_connection_returns_written_value() {
    let (_, registry) = fresh_registry();
    let shelf = registry.shelf("app", "kv");

    // Both submitted before the connection exists.
    let (write, read) = tokio::join!(shelf.set("key", b"value".to_vec()), shelf.get("key"));
    write.unwrap();
    assert_eq!(read.unwrap(), Some(b"value".to_vec()));
}

#[tokio::test]
async fn two_handles_on_one_database_get_both_tables() {
    let (engine, registry) = fresh_registry();
    let t1 = registry.shelf("app", "t1");
    let t2 = registry.shelf("app", "t2");

    let (a, b) = tokio::join!(t1.set("k", b"one".to_vec()), t2.set("k", b"two".to_vec()));
    a.unwrap();
    b.unwrap();

    assert_eq!(t1.status(), Status::Ready);
    assert_eq!(t2.status(), Status::Ready);

    // The schema is the union: one serialized bump per distinct table.
    assert_eq!(engine.version_of("app"), Some(2));

    // Neither table reads or writes the other's data.
    assert_eq!(t1.get("k").await.unwrap(), Some(b"one".to_vec()));
    assert_eq!(t2.get("k").await.unwrap(), Some(b"two".to_vec()));
    t1.clear().await.unwrap();
    assert_eq!(t2.get("k").await.unwrap(), Some(b"two".to_vec()));
}

#[tokio::test]
async fn sibling_churn_is_absorbed_by_retries() {
    let (engine, registry) = fresh_registry();
    let shelf = registry.shelf("app", "kv");
    shelf.ready().await.unwrap();

    // Two consecutive closing failures, as if siblings reopened twice.
    engine.fail_transactions(FaultKind::ConnectionClosing, 2);
    shelf.set("k", b"v".to_vec()).await.unwrap();
    assert_eq!(shelf.get("k").await.unwrap(), Some(b"v".to_vec()));
}

#[tokio::test]
async fn persistent_churn_exhausts_the_retry_ceiling() {
    let (engine, registry) = fresh_registry();
    let shelf = registry.shelf("app", "kv");
    shelf.ready().await.unwrap();

    engine.fail_transactions(FaultKind::ConnectionClosing, 10);
    let err = shelf.set("k", b"v".to_vec()).await.unwrap_err();
    match err {
        ShelfError::RetryExhausted { attempts, .. } => assert_eq!(attempts, 5),
        other => panic!("expected retry exhaustion, got {other}"),
    }
}

#[tokio::test]
async fn drop_database_during_upgrade_is_a_schema_conflict() {
    let engine = Arc::new(MemoryEngine::new());
    let gated = Arc::new(GatedEngine::new(Arc::clone(&engine)));
    let registry = Registry::new(Arc::clone(&gated) as Arc<dyn Engine>);

    let t1 = registry.shelf("app", "t1");
    t1.ready().await.unwrap();
    assert_eq!(engine.version_of("app"), Some(1));

    // Pin the t2 version bump at the gate.
    gated.hold_opens();
    let t2 = registry.shelf("app", "t2");
    let bump = tokio::spawn(async move {
        t2.ready().await.map(|()| t2)
    });
    while t1.status() != Status::Upgrading {
        tokio::task::yield_now().await;
    }

    // The drop rejects immediately and deletes nothing.
    let err = t1.drop_database().await.unwrap_err();
    assert!(err.is_schema_conflict());
    assert_eq!(engine.version_of("app"), Some(1));

    // The upgrade itself is untouched and completes once released.
    gated.release_opens();
    let t2 = bump.await.unwrap().unwrap();
    assert_eq!(engine.version_of("app"), Some(2));
    t2.set("k", b"v".to_vec()).await.unwrap();
    t1.set("k", b"v".to_vec()).await.unwrap();
}

#[tokio::test]
async fn drop_database_when_ready_starts_a_fresh_cycle() {
    let (engine, registry) = fresh_registry();
    let shelf = registry.shelf("app", "kv");
    shelf.set("k", b"v".to_vec()).await.unwrap();

    shelf.drop_database().await.unwrap();
    assert_eq!(engine.version_of("app"), None);
    assert_eq!(registry.databases().await.unwrap(), Vec::<String>::new());

    // A later handle for the same name starts over from Uninitialized.
    let again = registry.shelf("app", "kv");
    assert_eq!(again.status(), Status::Uninitialized);
    assert_eq!(again.get("k").await.unwrap(), None);
    assert_eq!(engine.version_of("app"), Some(1));
}

#[tokio::test]
async fn failed_open_propagates_and_the_next_attempt_retries() {
    let (engine, registry) = fresh_registry();
    engine.fail_opens(1);

    let shelf = registry.shelf("app", "kv");
    let err = shelf.ready().await.unwrap_err();
    assert!(matches!(err, ShelfError::Engine(_)));

    // The record was reset, so a sibling's attempt succeeds.
    let sibling = registry.shelf("app", "kv");
    sibling.ready().await.unwrap();
    shelf.set("k", b"v".to_vec()).await.unwrap();
}

#[tokio::test]
async fn shelves_from_one_registry_share_the_connection_record() {
    let (engine, registry) = fresh_registry();
    let a = registry.shelf("app", "kv");
    let b = registry.shelf("app", "kv");

    a.ready().await.unwrap();
    // b attaches to the already-open connection without another open.
    b.ready().await.unwrap();
    assert_eq!(engine.version_of("app"), Some(1));

    a.set("k", b"v".to_vec()).await.unwrap();
    assert_eq!(b.get("k").await.unwrap(), Some(b"v".to_vec()));
}
