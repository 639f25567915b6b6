//! Integration tests for the sync orchestrator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use studyhub_client::error::Result;
use studyhub_client::{
    ChannelSink, LocalStore, MemoryBackend, MemoryDocumentStore, Notification, PutOptions, RemoteDocumentStore,
    Severity, SkipReason, StaticSession, SyncError, SyncOrchestrator, SyncOutcome, SyncState,
};
use studyhub_engine::{AggregateSnapshot, Dataset, SyncTimestamp, LAST_CLOUD_SYNC_KEY};
use tokio::sync::{mpsc, Notify};

const USER: &str = "user-1";

struct Harness {
    orchestrator: SyncOrchestrator,
    store: LocalStore,
    session: Arc<StaticSession>,
    remote: Arc<MemoryDocumentStore>,
    notifications: mpsc::UnboundedReceiver<Notification>,
}

fn harness() -> Harness {
    harness_with(LocalStore::in_memory())
}

/// Orchestrator over a pre-seeded store; it reads `last_cloud_sync` on creation.
fn harness_with(store: LocalStore) -> Harness {
    let session = Arc::new(StaticSession::signed_in(USER));
    let remote = Arc::new(MemoryDocumentStore::new());
    let (sink, notifications) = ChannelSink::new();
    let orchestrator = SyncOrchestrator::new(
        store.clone(),
        session.clone(),
        remote.clone(),
        Arc::new(sink),
        "1.0.0",
    );
    Harness {
        orchestrator,
        store,
        session,
        remote,
        notifications,
    }
}

fn seeded_store(last_sync: &str) -> LocalStore {
    let store = LocalStore::in_memory();
    store.set(LAST_CLOUD_SYNC_KEY, last_sync);
    store
}

/// A second client signed in as the same user against a shared remote.
fn device(remote: &Arc<MemoryDocumentStore>) -> (SyncOrchestrator, LocalStore) {
    let store = LocalStore::in_memory();
    let (sink, _rx) = ChannelSink::new();
    let orchestrator = SyncOrchestrator::new(
        store.clone(),
        Arc::new(StaticSession::signed_in(USER)),
        remote.clone(),
        Arc::new(sink),
        "1.0.0",
    );
    (orchestrator, store)
}

fn remote_snapshot(ts: &str) -> AggregateSnapshot {
    AggregateSnapshot::new(SyncTimestamp::new(ts), "0.9.0")
}

/// Blocks inside `put_document` until released.
struct GatedRemote {
    inner: MemoryDocumentStore,
    entered: Notify,
    release: Notify,
    puts: AtomicUsize,
}

impl GatedRemote {
    fn new() -> Self {
        Self {
            inner: MemoryDocumentStore::new(),
            entered: Notify::new(),
            release: Notify::new(),
            puts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RemoteDocumentStore for GatedRemote {
    async fn get_document(&self, user_id: &str) -> Result<Option<AggregateSnapshot>> {
        self.inner.get_document(user_id).await
    }

    async fn put_document(
        &self,
        user_id: &str,
        snapshot: &AggregateSnapshot,
        options: PutOptions,
    ) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.put_document(user_id, snapshot, options).await
    }

    async fn update_fields(&self, user_id: &str, fields: Map<String, Value>) -> Result<bool> {
        self.inner.update_fields(user_id, fields).await
    }
}

// ============================================================================
// Sync Cycle
// ============================================================================

#[tokio::test]
async fn sync_uploads_collected_snapshot() {
    let h = harness();
    h.store.set("subjects", &json!(["math"]));

    let outcome = h.orchestrator.sync_data().await;
    let SyncOutcome::Completed { timestamp, merged } = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert!(!merged);

    let document = h.remote.document(USER).unwrap();
    assert_eq!(document["subjects"], json!(["math"]));
    assert_eq!(document["flashcards"], json!({}));
    assert_eq!(document["appVersion"], json!("1.0.0"));
    assert_eq!(document["lastSync"], json!(timestamp.as_str()));

    assert_eq!(h.orchestrator.last_sync_time(), Some(timestamp.clone()));
    assert_eq!(
        h.store.get_value(LAST_CLOUD_SYNC_KEY),
        Some(json!(timestamp.as_str()))
    );
    assert_eq!(h.orchestrator.state(), SyncState::Idle);
}

#[tokio::test]
async fn sync_does_not_double_count_own_upload() {
    let h = harness();
    h.store.set("statistics", &json!({"quizzesTaken": 3}));
    h.store
        .set("qcm_results", &json!({"q1": {"attempts": 2, "bestScore": 80}}));

    assert!(h.orchestrator.sync_data().await.is_completed());
    assert!(h.orchestrator.sync_data().await.is_completed());

    assert_eq!(h.store.get_value("statistics"), Some(json!({"quizzesTaken": 3})));
    assert_eq!(
        h.store.get_value("qcm_results"),
        Some(json!({"q1": {"attempts": 2, "bestScore": 80}}))
    );
}

#[tokio::test]
async fn sync_merges_writes_from_another_device() {
    let remote = Arc::new(MemoryDocumentStore::new());
    let (laptop, laptop_store) = device(&remote);
    let (phone, phone_store) = device(&remote);

    laptop_store.set("subjects", &json!(["from-a"]));
    assert!(laptop.sync_data().await.is_completed());
    tokio::time::sleep(Duration::from_millis(5)).await;

    phone_store.set("subjects", &json!(["from-b"]));
    phone_store.set("flashcards", &json!({"deckB": {"cards": 3}}));
    assert!(phone.sync_data().await.is_completed());
    tokio::time::sleep(Duration::from_millis(5)).await;

    let outcome = laptop.sync_data().await;
    let SyncOutcome::Completed { merged, .. } = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert!(merged);
    assert_eq!(
        laptop_store.get_value("flashcards"),
        Some(json!({"deckB": {"cards": 3}}))
    );
    assert_eq!(laptop_store.get_value("subjects"), Some(json!(["from-a", "from-b"])));

    let document = remote.document(USER).unwrap();
    assert_eq!(document["subjects"], json!(["from-a", "from-b"]));
    assert_eq!(document["flashcards"], json!({"deckB": {"cards": 3}}));
}

#[tokio::test]
async fn local_write_failure_keeps_timestamp() {
    let store = LocalStore::new(MemoryBackend::with_quota(120));
    assert!(store.set(LAST_CLOUD_SYNC_KEY, "2024-01-01T00:00:00.000Z"));
    let mut h = harness_with(store);
    h.remote
        .insert(
            USER,
            &remote_snapshot("2024-06-01T00:00:00.000Z")
                .with_dataset("resumes", json!({"r1": "x".repeat(500)})),
        )
        .unwrap();

    for _ in 0..2 {
        let result = h.orchestrator.download_from_cloud().await;
        assert!(
            matches!(&result, Err(SyncError::LocalWrite(key)) if key == "resumes"),
            "unexpected result: {result:?}"
        );
        assert_eq!(
            h.orchestrator.last_sync_time(),
            Some(SyncTimestamp::new("2024-01-01T00:00:00.000Z"))
        );
        assert_eq!(
            h.store.get_value(LAST_CLOUD_SYNC_KEY),
            Some(json!("2024-01-01T00:00:00.000Z"))
        );
    }

    let outcome = h.orchestrator.sync_data().await;
    assert!(matches!(outcome, SyncOutcome::Failed(_)));
    assert_eq!(h.remote.put_calls(), 0);
    assert_eq!(h.notifications.try_recv().unwrap().severity, Severity::Error);
    assert_eq!(
        h.orchestrator.last_sync_time(),
        Some(SyncTimestamp::new("2024-01-01T00:00:00.000Z"))
    );
}

#[tokio::test]
async fn concurrent_syncs_upload_once() {
    let remote = Arc::new(GatedRemote::new());
    let (sink, _rx) = ChannelSink::new();
    let orchestrator = SyncOrchestrator::new(
        LocalStore::in_memory(),
        Arc::new(StaticSession::signed_in(USER)),
        remote.clone(),
        Arc::new(sink),
        "1.0.0",
    );

    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.sync_data().await }
    });

    // First cycle is now parked inside its upload
    remote.entered.notified().await;
    assert!(orchestrator.is_sync_in_progress());
    assert_eq!(orchestrator.state(), SyncState::Syncing);

    let second = orchestrator.sync_data().await;
    assert_eq!(second, SyncOutcome::Skipped(SkipReason::InProgress));

    remote.release.notify_one();
    let first = first.await.unwrap();
    assert!(first.is_completed());
    assert_eq!(remote.puts.load(Ordering::SeqCst), 1);
    assert!(!orchestrator.is_sync_in_progress());
}

#[tokio::test]
async fn failed_upload_keeps_timestamp_and_notifies() {
    let mut h = harness_with(seeded_store("2024-01-01T00:00:00.000Z"));
    h.remote.set_unavailable(true);

    let outcome = h.orchestrator.sync_data().await;

    assert!(matches!(outcome, SyncOutcome::Failed(_)));
    assert_eq!(
        h.orchestrator.last_sync_time(),
        Some(SyncTimestamp::new("2024-01-01T00:00:00.000Z"))
    );
    assert_eq!(
        h.store.get_value(LAST_CLOUD_SYNC_KEY),
        Some(json!("2024-01-01T00:00:00.000Z"))
    );
    assert!(!h.orchestrator.is_sync_in_progress());

    let notification = h.notifications.try_recv().unwrap();
    assert_eq!(notification.severity, Severity::Error);

    // The next cycle retries and advances
    h.remote.set_unavailable(false);
    let outcome = h.orchestrator.sync_data().await;
    let SyncOutcome::Completed { timestamp, .. } = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert!(timestamp > SyncTimestamp::new("2024-01-01T00:00:00.000Z"));
}

#[tokio::test]
async fn signed_out_session_disables_sync() {
    let h = harness();
    h.session.sign_out();

    assert_eq!(h.orchestrator.state(), SyncState::Disabled);
    assert_eq!(
        h.orchestrator.sync_data().await,
        SyncOutcome::Skipped(SkipReason::NotAuthenticated)
    );
    assert_eq!(h.remote.put_calls(), 0);
    assert!(matches!(
        h.orchestrator.download_from_cloud().await,
        Err(SyncError::NotAuthenticated)
    ));

    h.session.sign_in(USER);
    assert_eq!(h.orchestrator.state(), SyncState::Idle);
    assert!(h.orchestrator.sync_data().await.is_completed());
}

#[tokio::test]
async fn force_sync_reports_outcome() {
    let mut h = harness();

    assert!(h.orchestrator.force_sync().await.is_completed());
    assert_eq!(h.notifications.try_recv().unwrap().severity, Severity::Success);

    h.session.sign_out();
    h.orchestrator.force_sync().await;
    assert_eq!(h.notifications.try_recv().unwrap().severity, Severity::Warning);
}

// ============================================================================
// Download
// ============================================================================

#[tokio::test]
async fn download_skips_when_remote_not_newer() {
    let h = harness_with(seeded_store("2024-03-01T00:00:00.000Z"));
    h.store.set("subjects", &json!(["local"]));

    for ts in ["2024-02-01T00:00:00.000Z", "2024-03-01T00:00:00.000Z"] {
        h.remote
            .insert(USER, &remote_snapshot(ts).with_dataset("subjects", json!(["remote"])))
            .unwrap();
        assert!(!h.orchestrator.download_from_cloud().await.unwrap());
    }

    assert_eq!(h.store.get_value("subjects"), Some(json!(["local"])));
    assert_eq!(h.store.get_value("flashcards"), None);
    assert_eq!(
        h.orchestrator.last_sync_time(),
        Some(SyncTimestamp::new("2024-03-01T00:00:00.000Z"))
    );
}

#[tokio::test]
async fn download_merges_newer_remote() {
    let h = harness_with(seeded_store("2024-01-01T00:00:00.000Z"));
    h.store.set(
        "imported_files",
        &json!([{"id": "a", "uploadedAt": "2024-01-01"}]),
    );
    h.store.set("subjects", &json!(["math"]));

    let remote = remote_snapshot("2024-03-01T00:00:00.000Z")
        .with_dataset(
            "imported_files",
            json!([
                {"id": "a", "uploadedAt": "2024-03-01"},
                {"id": "b", "uploadedAt": "2024-02-01"}
            ]),
        )
        .with_dataset("subjects", json!(["history"]))
        .with_dataset("chat_history", json!({"c1": ["hello"]}));
    h.remote.insert(USER, &remote).unwrap();

    assert!(h.orchestrator.download_from_cloud().await.unwrap());

    assert_eq!(
        h.store.get_value("imported_files"),
        Some(json!([
            {"id": "a", "uploadedAt": "2024-03-01"},
            {"id": "b", "uploadedAt": "2024-02-01"}
        ]))
    );
    assert_eq!(h.store.get_value("subjects"), Some(json!(["math", "history"])));
    // Missing locally: written as-is
    assert_eq!(h.store.get_value("chat_history"), Some(json!({"c1": ["hello"]})));
    // Metadata fields never land in the store
    assert_eq!(h.store.get_value("lastSync"), None);
    assert_eq!(h.store.get_value("appVersion"), None);

    assert_eq!(
        h.orchestrator.last_sync_time(),
        Some(SyncTimestamp::new("2024-03-01T00:00:00.000Z"))
    );
    assert_eq!(
        h.store.get_value(LAST_CLOUD_SYNC_KEY),
        Some(json!("2024-03-01T00:00:00.000Z"))
    );
}

#[tokio::test]
async fn download_without_recorded_timestamp_always_merges() {
    let h = harness();
    h.remote
        .insert(
            USER,
            &remote_snapshot("2020-01-01T00:00:00.000Z").with_dataset("resumes", json!({"r1": "text"})),
        )
        .unwrap();

    assert!(h.orchestrator.download_from_cloud().await.unwrap());
    assert_eq!(h.store.get_value("resumes"), Some(json!({"r1": "text"})));
}

#[tokio::test]
async fn download_with_no_document() {
    let h = harness();
    assert!(!h.orchestrator.download_from_cloud().await.unwrap());
}

#[tokio::test]
async fn reset_sync_pulls_remote_before_upload() {
    let h = harness_with(seeded_store("2030-01-01T00:00:00.000Z"));
    h.store.set("subjects", &json!(["math"]));
    h.remote
        .insert(
            USER,
            &remote_snapshot("2024-01-01T00:00:00.000Z").with_dataset("subjects", json!(["history"])),
        )
        .unwrap();

    let outcome = h.orchestrator.reset_sync().await;
    let SyncOutcome::Completed { merged, .. } = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert!(merged);
    assert_eq!(h.store.get_value("subjects"), Some(json!(["math", "history"])));
    assert_eq!(
        h.remote.document(USER).unwrap()["subjects"],
        json!(["math", "history"])
    );
}

// ============================================================================
// Single Datasets
// ============================================================================

#[tokio::test]
async fn save_and_fetch_dataset() {
    let h = harness();

    // No document yet: created on first save
    assert!(h
        .orchestrator
        .save_dataset(Dataset::Flashcards, json!({"deck": {"front": "a"}}))
        .await
        .unwrap());
    assert_eq!(
        h.orchestrator.fetch_dataset(Dataset::Flashcards).await,
        Some(json!({"deck": {"front": "a"}}))
    );

    assert!(h
        .orchestrator
        .save_dataset(Dataset::Subjects, json!(["math"]))
        .await
        .unwrap());
    let document = h.remote.document(USER).unwrap();
    assert_eq!(document["subjects"], json!(["math"]));
    assert_eq!(document["flashcards"], json!({"deck": {"front": "a"}}));
    assert!(document["lastSync"].is_string());

    assert_eq!(h.orchestrator.fetch_dataset(Dataset::Statistics).await, None);
}

#[tokio::test]
async fn single_dataset_calls_when_signed_out() {
    let h = harness();
    h.session.sign_out();

    assert!(!h
        .orchestrator
        .save_dataset(Dataset::Subjects, json!(["math"]))
        .await
        .unwrap());
    assert_eq!(h.orchestrator.fetch_dataset(Dataset::Subjects).await, None);
    assert!(h.remote.document(USER).is_none());
}

#[tokio::test]
async fn fetch_dataset_swallows_remote_errors() {
    let h = harness();
    h.remote.set_unavailable(true);
    assert_eq!(h.orchestrator.fetch_dataset(Dataset::Subjects).await, None);
}

// ============================================================================
// Timer
// ============================================================================

#[tokio::test]
async fn auto_sync_ticks_until_stopped() {
    let h = harness();

    h.orchestrator.start_auto_sync(Duration::from_millis(20));
    assert!(h.orchestrator.is_auto_sync_running());
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(h.remote.put_calls() >= 1);

    h.orchestrator.stop_auto_sync();
    h.orchestrator.stop_auto_sync();
    assert!(!h.orchestrator.is_auto_sync_running());

    // Let any cycle spawned before the stop finish
    tokio::time::sleep(Duration::from_millis(50)).await;
    let calls = h.remote.put_calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.remote.put_calls(), calls);
}

#[tokio::test]
async fn restarting_auto_sync_replaces_timer() {
    let h = harness();
    h.orchestrator.start_auto_sync(Duration::from_secs(3600));
    h.orchestrator.start_auto_sync(Duration::from_secs(3600));
    assert!(h.orchestrator.is_auto_sync_running());

    let outcome = h.orchestrator.before_unload().await;
    assert!(outcome.is_completed());
    assert!(!h.orchestrator.is_auto_sync_running());
    assert_eq!(h.remote.put_calls(), 1);
}
