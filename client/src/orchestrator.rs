//! Sync orchestrator.
//!
//! Drives sync cycles: download the remote aggregate and merge it into the
//! local store when it is newer than the recorded sync timestamp, collect
//! every tracked dataset, upload the aggregate with `merge: true`, then
//! advance the recorded timestamp to the upload time.
//!
//! Pulling before the upload means writes from other devices are folded in
//! before our lists replace theirs on the server. Our own upload is never
//! merged back, since the next cycle sees its `lastSync` as already
//! recorded. The timestamp moves only once every step, local writes
//! included, has succeeded.
//!
//! At most one cycle runs at a time. The in-flight flag is claimed before
//! the first await, so a second request (timer tick, manual sync, unload)
//! arriving mid-cycle is dropped rather than queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use studyhub_engine::{
    AggregateSnapshot, Dataset, MergeEngine, SyncTimestamp, LAST_CLOUD_SYNC_KEY, LAST_SYNC_FIELD,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::collector::DataCollector;
use crate::error::{Result, SyncError};
use crate::notify::{NotificationSink, Severity};
use crate::remote::{PutOptions, RemoteDocumentStore};
use crate::session::SessionProvider;
use crate::storage::LocalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
    /// No authenticated session
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InProgress,
    NotAuthenticated,
}

/// Result of one sync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed {
        /// Recorded sync timestamp after the cycle
        timestamp: SyncTimestamp,
        /// Whether remote data was merged into the local store
        merged: bool,
    },
    Skipped(SkipReason),
    Failed(String),
}

impl SyncOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed { .. })
    }
}

struct Inner {
    store: LocalStore,
    collector: DataCollector,
    engine: MergeEngine,
    session: Arc<dyn SessionProvider>,
    remote: Arc<dyn RemoteDocumentStore>,
    notifier: Arc<dyn NotificationSink>,
    in_progress: AtomicBool,
    last_sync: RwLock<Option<SyncTimestamp>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Clears the in-flight flag on every exit path.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to a sync orchestrator. Clones share state.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    pub fn new(
        store: LocalStore,
        session: Arc<dyn SessionProvider>,
        remote: Arc<dyn RemoteDocumentStore>,
        notifier: Arc<dyn NotificationSink>,
        app_version: impl Into<String>,
    ) -> Self {
        Self::with_engine(store, session, remote, notifier, app_version, MergeEngine::new())
    }

    /// Like [`SyncOrchestrator::new`] with a custom strategy table.
    pub fn with_engine(
        store: LocalStore,
        session: Arc<dyn SessionProvider>,
        remote: Arc<dyn RemoteDocumentStore>,
        notifier: Arc<dyn NotificationSink>,
        app_version: impl Into<String>,
        engine: MergeEngine,
    ) -> Self {
        let last_sync = store
            .get::<Option<String>>(LAST_CLOUD_SYNC_KEY, None)
            .map(SyncTimestamp::from);

        Self {
            inner: Arc::new(Inner {
                collector: DataCollector::new(store.clone(), app_version),
                store,
                engine,
                session,
                remote,
                notifier,
                in_progress: AtomicBool::new(false),
                last_sync: RwLock::new(last_sync),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn last_sync_time(&self) -> Option<SyncTimestamp> {
        self.inner
            .last_sync
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_sync_in_progress(&self) -> bool {
        self.inner.in_progress.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SyncState {
        if self.is_sync_in_progress() {
            SyncState::Syncing
        } else if !self.inner.session.is_authenticated() {
            SyncState::Disabled
        } else {
            SyncState::Idle
        }
    }

    pub fn is_auto_sync_running(&self) -> bool {
        self.timer_slot()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Run a sync cycle every `period`, replacing any previous timer.
    ///
    /// Must be called from within a tokio runtime. Each tick spawns its
    /// cycle, so stopping the timer never cancels an upload in flight.
    pub fn start_auto_sync(&self, period: Duration) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let orchestrator = SyncOrchestrator { inner };
                tokio::spawn(async move {
                    orchestrator.sync_data().await;
                });
            }
        });

        if let Some(previous) = self.timer_slot().replace(handle) {
            previous.abort();
        }
        tracing::info!(period_secs = period.as_secs_f64(), "auto sync started");
    }

    /// Cancel the timer. Idempotent.
    pub fn stop_auto_sync(&self) {
        if let Some(handle) = self.timer_slot().take() {
            handle.abort();
            tracing::info!("auto sync stopped");
        }
    }

    /// One full cycle: merge the remote if it is newer, collect, upload,
    /// advance the recorded timestamp.
    pub async fn sync_data(&self) -> SyncOutcome {
        let Some(user_id) = self.inner.session.current_user_id() else {
            tracing::debug!("sync skipped: no authenticated session");
            return SyncOutcome::Skipped(SkipReason::NotAuthenticated);
        };
        let Some(_in_flight) = InFlight::acquire(&self.inner.in_progress) else {
            tracing::debug!("sync skipped: cycle already in progress");
            return SyncOutcome::Skipped(SkipReason::InProgress);
        };

        match self.run_cycle(&user_id).await {
            Ok((timestamp, merged)) => {
                tracing::info!(user_id = %user_id, timestamp = %timestamp, merged, "sync completed");
                SyncOutcome::Completed { timestamp, merged }
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "sync failed");
                self.inner
                    .notifier
                    .notify(&format!("Cloud sync failed: {e}"), Severity::Error);
                SyncOutcome::Failed(e.to_string())
            }
        }
    }

    /// A user-requested [`SyncOrchestrator::sync_data`] that reports its outcome.
    pub async fn force_sync(&self) -> SyncOutcome {
        let outcome = self.sync_data().await;
        match &outcome {
            SyncOutcome::Completed { .. } => {
                self.inner.notifier.notify("Data synchronized", Severity::Success)
            }
            SyncOutcome::Skipped(SkipReason::InProgress) => self
                .inner
                .notifier
                .notify("Sync already in progress", Severity::Info),
            SyncOutcome::Skipped(SkipReason::NotAuthenticated) => self
                .inner
                .notifier
                .notify("Sign in to sync your data", Severity::Warning),
            SyncOutcome::Failed(_) => {}
        }
        outcome
    }

    /// Stop the timer and run one final cycle.
    pub async fn before_unload(&self) -> SyncOutcome {
        self.stop_auto_sync();
        self.sync_data().await
    }

    /// Forget the recorded timestamp and run a cycle, so whatever the remote
    /// holds is merged before the upload.
    pub async fn reset_sync(&self) -> SyncOutcome {
        *self
            .inner
            .last_sync
            .write()
            .unwrap_or_else(|e| e.into_inner()) = None;
        self.inner.store.remove(LAST_CLOUD_SYNC_KEY);
        tracing::info!("sync timestamp reset");
        self.sync_data().await
    }

    /// Merge the remote document into the local store if it is newer than
    /// the recorded timestamp. Returns whether a merge happened.
    pub async fn download_from_cloud(&self) -> Result<bool> {
        let user_id = self
            .inner
            .session
            .current_user_id()
            .ok_or(SyncError::NotAuthenticated)?;
        match self.merge_remote(&user_id).await? {
            Some(remote_ts) => {
                self.record_timestamp(remote_ts)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Push one dataset to the cloud document with a fresh `lastSync`.
    ///
    /// Returns `false` without a request when no one is signed in.
    pub async fn save_dataset(&self, dataset: Dataset, value: Value) -> Result<bool> {
        let Some(user_id) = self.inner.session.current_user_id() else {
            return Ok(false);
        };
        let timestamp = SyncTimestamp::from_datetime(Utc::now());

        let mut fields = Map::new();
        fields.insert(dataset.key().to_string(), value.clone());
        fields.insert(LAST_SYNC_FIELD.to_string(), Value::String(timestamp.to_string()));

        if !self.inner.remote.update_fields(&user_id, fields).await? {
            // No document yet; create it with just this dataset
            let snapshot = AggregateSnapshot::new(timestamp, self.inner.collector.app_version())
                .with_dataset(dataset.key(), value);
            self.inner
                .remote
                .put_document(&user_id, &snapshot, PutOptions::merge())
                .await?;
        }
        tracing::debug!(user_id = %user_id, dataset = %dataset, "dataset saved to cloud");
        Ok(true)
    }

    /// Read one dataset from the cloud document.
    pub async fn fetch_dataset(&self, dataset: Dataset) -> Option<Value> {
        let user_id = self.inner.session.current_user_id()?;
        match self.inner.remote.get_document(&user_id).await {
            Ok(document) => document?.get(dataset.key()).cloned(),
            Err(e) => {
                tracing::error!(user_id = %user_id, dataset = %dataset, error = %e, "failed to fetch dataset");
                None
            }
        }
    }

    async fn run_cycle(&self, user_id: &str) -> Result<(SyncTimestamp, bool)> {
        let pulled = self.merge_remote(user_id).await?;

        let now = Utc::now();
        let uploaded = SyncTimestamp::from_datetime(now);
        let snapshot = self.inner.collector.collect_at(now);
        self.inner
            .remote
            .put_document(user_id, &snapshot, PutOptions::merge())
            .await?;

        let merged = pulled.is_some();
        if let Some(remote_ts) = pulled {
            self.record_timestamp(remote_ts)?;
        }
        self.record_timestamp(uploaded.clone())?;
        Ok((self.last_sync_time().unwrap_or(uploaded), merged))
    }

    /// Merge the remote document into the local store if its `lastSync` is
    /// newer than the recorded timestamp.
    ///
    /// Returns the merged document's `lastSync`; the caller records it. Any
    /// dataset that cannot be persisted fails the whole merge.
    async fn merge_remote(&self, user_id: &str) -> Result<Option<SyncTimestamp>> {
        let Some(remote) = self.inner.remote.get_document(user_id).await? else {
            tracing::debug!(user_id, "no remote document");
            return Ok(None);
        };
        let Some(remote_ts) = remote.last_sync.clone() else {
            return Ok(None);
        };
        if !remote_ts.is_newer_than(self.last_sync_time().as_ref()) {
            tracing::debug!(remote = %remote_ts, "remote not newer, skipping merge");
            return Ok(None);
        }

        for (key, remote_value) in remote.datasets() {
            if key == LAST_CLOUD_SYNC_KEY {
                continue;
            }
            let merged = match self.inner.store.get_value(key) {
                Some(local) => self.inner.engine.merge_values(local, remote_value.clone(), key),
                None => remote_value.clone(),
            };
            if !self.inner.store.set(key, &merged) {
                return Err(SyncError::LocalWrite(key.to_string()));
            }
        }

        for (dataset, actual) in remote.shape_mismatches() {
            tracing::warn!(dataset = %dataset, ?actual, "remote dataset has unexpected shape");
        }
        Ok(Some(remote_ts))
    }

    /// Advance the recorded timestamp; older values are ignored.
    ///
    /// The in-memory value only moves once the new one is persisted.
    fn record_timestamp(&self, timestamp: SyncTimestamp) -> Result<()> {
        let mut current = self
            .inner
            .last_sync
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if timestamp.is_newer_than(current.as_ref()) {
            if !self.inner.store.set(LAST_CLOUD_SYNC_KEY, timestamp.as_str()) {
                return Err(SyncError::LocalWrite(LAST_CLOUD_SYNC_KEY.to_string()));
            }
            *current = Some(timestamp);
        }
        Ok(())
    }

    fn timer_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner.timer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("state", &self.state())
            .field("last_sync", &self.last_sync_time())
            .finish()
    }
}
