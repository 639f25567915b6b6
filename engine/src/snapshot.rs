//! The aggregate snapshot exchanged with the cloud document store.
//!
//! A snapshot is one JSON document holding every synchronized dataset as a
//! top-level field, plus the `lastSync` marker and the `appVersion` of the
//! client that produced it. Datasets are kept in a BTreeMap so serialization
//! order is deterministic.

use crate::{error::Result, Dataset, DatasetKey, Error, Record, Shape, SyncTimestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Document field holding the sync marker.
pub const LAST_SYNC_FIELD: &str = "lastSync";

/// Document field holding the producing client's version.
pub const APP_VERSION_FIELD: &str = "appVersion";

/// All of a user's synchronized datasets at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSnapshot {
    /// When the snapshot was taken; absent on documents never written by a sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<SyncTimestamp>,
    /// Build identifier of the client that produced the snapshot
    #[serde(default)]
    pub app_version: String,
    /// Dataset fields by key
    #[serde(flatten)]
    pub datasets: BTreeMap<DatasetKey, Value>,
}

impl AggregateSnapshot {
    /// Create an empty snapshot stamped with a timestamp and version.
    pub fn new(last_sync: SyncTimestamp, app_version: impl Into<String>) -> Self {
        Self {
            last_sync: Some(last_sync),
            app_version: app_version.into(),
            datasets: BTreeMap::new(),
        }
    }

    /// Set a dataset field.
    pub fn insert(&mut self, dataset_key: impl Into<DatasetKey>, record: Record) {
        self.datasets.insert(dataset_key.into(), record.into_value());
    }

    /// Builder-style [`AggregateSnapshot::insert`].
    pub fn with_dataset(mut self, dataset_key: impl Into<DatasetKey>, value: Value) -> Self {
        self.datasets.insert(dataset_key.into(), value);
        self
    }

    /// Raw value of a dataset field.
    pub fn get(&self, dataset_key: &str) -> Option<&Value> {
        self.datasets.get(dataset_key)
    }

    /// Dataset field as a [`Record`].
    pub fn record(&self, dataset_key: &str) -> Option<Record> {
        self.get(dataset_key).cloned().map(Record::from_value)
    }

    /// Iterate over dataset fields (never the metadata fields).
    pub fn datasets(&self) -> impl Iterator<Item = (&DatasetKey, &Value)> {
        self.datasets.iter()
    }

    pub fn dataset_count(&self) -> usize {
        self.datasets.len()
    }

    /// Total entries across all datasets.
    pub fn entry_count(&self) -> usize {
        self.datasets
            .values()
            .map(|v| Record::from_value(v.clone()).len())
            .sum()
    }

    /// Known datasets whose value does not have the declared shape.
    ///
    /// A mismatch is not fatal; the merge rules still produce a value.
    pub fn shape_mismatches(&self) -> Vec<(Dataset, Option<Shape>)> {
        self.datasets
            .iter()
            .filter_map(|(key, value)| {
                let dataset = Dataset::from_key(key)?;
                let actual = match value {
                    Value::Array(_) => Some(Shape::List),
                    Value::Object(_) => Some(Shape::Map),
                    _ => None,
                };
                (actual != Some(dataset.shape())).then_some((dataset, actual))
            })
            .collect()
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Convert from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::InvalidSnapshot(format!(
                "expected a JSON object, got {}",
                json_type_name(&value)
            )));
        }
        serde_json::from_value(value).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Convert into a JSON object value.
    pub fn into_value(self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Merge `patch` into a stored document.
///
/// Nested objects present on both sides are merged recursively; every other
/// value in `patch` (lists included) replaces the stored one.
pub fn deep_merge(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, incoming) in patch {
        match (target.get_mut(&key), incoming) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            (Some(slot), incoming) => *slot = incoming,
            (None, incoming) => {
                target.insert(key, incoming);
            }
        }
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub last_sync: Option<SyncTimestamp>,
    pub app_version: String,
    pub dataset_count: usize,
    pub entry_count: usize,
}

impl From<&AggregateSnapshot> for SnapshotMetadata {
    fn from(snapshot: &AggregateSnapshot) -> Self {
        Self {
            last_sync: snapshot.last_sync.clone(),
            app_version: snapshot.app_version.clone(),
            dataset_count: snapshot.dataset_count(),
            entry_count: snapshot.entry_count(),
        }
    }
}
