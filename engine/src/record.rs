//! Record types for synchronized datasets.
//!
//! A [`Record`] is the value stored under one dataset key. The sync layer
//! only cares about its outer shape; entry types are typed only where a
//! merge strategy needs to read specific fields.

use crate::{error::Result, DatasetKey, Error, Shape, SyncTimestamp};
use chrono::DateTime;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

/// The value of one dataset, classified by shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Record {
    /// Ordered sequence of entries
    List(Vec<Value>),
    /// Mapping from identifier to entry
    Map(Map<String, Value>),
    /// Anything else (string, number, bool, null)
    Scalar(Value),
}

impl Record {
    /// Classify a raw JSON value.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => Record::List(items),
            Value::Object(map) => Record::Map(map),
            other => Record::Scalar(other),
        }
    }

    /// The empty record for a declared shape.
    pub fn empty(shape: Shape) -> Self {
        match shape {
            Shape::List => Record::List(Vec::new()),
            Shape::Map => Record::Map(Map::new()),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Record::List(items) => Value::Array(items),
            Record::Map(map) => Value::Object(map),
            Record::Scalar(value) => value,
        }
    }

    /// The shape of this record, or `None` for scalars.
    pub fn shape(&self) -> Option<Shape> {
        match self {
            Record::List(_) => Some(Shape::List),
            Record::Map(_) => Some(Shape::Map),
            Record::Scalar(_) => None,
        }
    }

    /// Whether the record holds JSON `null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Record::Scalar(Value::Null))
    }

    /// Number of entries; scalars count as one unless null.
    pub fn len(&self) -> usize {
        match self {
            Record::List(items) => items.len(),
            Record::Map(map) => map.len(),
            Record::Scalar(Value::Null) => 0,
            Record::Scalar(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Value> for Record {
    fn from(value: Value) -> Self {
        Record::from_value(value)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        record.into_value()
    }
}

/// Identity of a list entry: its `id` field, if it is a string or number.
pub fn entry_id(entry: &Value) -> Option<String> {
    match entry.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Aggregated results for one quiz, as stored under `qcm_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    /// Number of completed attempts
    #[serde(default)]
    pub attempts: u64,
    /// Best score reached, in whatever unit the quiz uses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_score: Option<Number>,
    /// Date of the most recent attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<String>,
    /// Fields the sync layer does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QuizResult {
    /// Read a quiz entry from a `qcm_results` mapping.
    pub fn from_entry(dataset: &str, id: &str, entry: &Value) -> Result<Self> {
        QuizResult::deserialize(entry).map_err(|e| Error::InvalidEntry {
            dataset: DatasetKey::from(dataset),
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn into_entry(self) -> Value {
        // A struct of JSON-native fields always serializes
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A file entry stored under `imported_files`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedFile {
    /// File identifier
    pub id: FileId,
    /// When the file was imported
    #[serde(default, deserialize_with = "upload_date")]
    pub uploaded_at: Option<String>,
}

/// Read `uploadedAt` as a date string.
///
/// Epoch milliseconds are rendered in the sync timestamp format. Any other
/// type reads as "no date" so the entry still dedupes by id.
fn upload_date<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    let date = match Value::deserialize(deserializer)? {
        Value::String(date) => Some(date),
        Value::Number(millis) => millis
            .as_i64()
            .or_else(|| millis.as_f64().map(|m| m as i64))
            .and_then(DateTime::from_timestamp_millis)
            .map(|instant| SyncTimestamp::from_datetime(instant).into_inner()),
        _ => None,
    };
    Ok(date)
}

/// File identifiers are strings in practice but numbers are tolerated.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FileId {
    Text(String),
    Number(Number),
}

impl FileId {
    pub fn as_key(&self) -> String {
        match self {
            FileId::Text(id) => id.clone(),
            FileId::Number(id) => id.to_string(),
        }
    }
}

impl ImportedFile {
    /// Read a file entry, or `None` if it lacks a usable identifier.
    pub fn from_entry(entry: &Value) -> Option<Self> {
        ImportedFile::deserialize(entry).ok()
    }
}
