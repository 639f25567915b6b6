//! Snapshot every tracked dataset into one aggregate record.

use chrono::{DateTime, Utc};
use serde_json::Value;
use studyhub_engine::{AggregateSnapshot, Dataset, SyncTimestamp};

use crate::storage::LocalStore;

/// Reads the tracked datasets out of a [`LocalStore`].
#[derive(Debug, Clone)]
pub struct DataCollector {
    store: LocalStore,
    app_version: String,
}

impl DataCollector {
    pub fn new(store: LocalStore, app_version: impl Into<String>) -> Self {
        Self {
            store,
            app_version: app_version.into(),
        }
    }

    pub fn app_version(&self) -> &str {
        &self.app_version
    }

    /// Collect a snapshot stamped with the current time.
    pub fn collect(&self) -> AggregateSnapshot {
        self.collect_at(Utc::now())
    }

    /// Collect a snapshot stamped with `now`.
    ///
    /// Absent or null datasets are filled with their declared empty value.
    pub fn collect_at(&self, now: DateTime<Utc>) -> AggregateSnapshot {
        let mut snapshot =
            AggregateSnapshot::new(SyncTimestamp::from_datetime(now), self.app_version.clone());

        for dataset in Dataset::ALL {
            let value = match self.store.get_value(dataset.key()) {
                Some(Value::Null) | None => dataset.shape().empty_value(),
                Some(value) => value,
            };
            snapshot = snapshot.with_dataset(dataset.key(), value);
        }

        tracing::debug!(
            datasets = snapshot.dataset_count(),
            entries = snapshot.entry_count(),
            "collected local snapshot"
        );
        snapshot
    }
}
