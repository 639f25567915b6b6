//! Tests for the document wire format shared with sync clients.
//!
//! These run without a database.

use serde_json::{json, Map, Value};
use studyhub_engine::{deep_merge, AggregateSnapshot, Dataset, Record, SyncTimestamp};

/// Test helper to create an upload like the ones clients send.
fn client_upload(ts: &str) -> AggregateSnapshot {
    let mut snapshot = AggregateSnapshot::new(SyncTimestamp::new(ts), "1.0.0");
    for dataset in Dataset::ALL {
        snapshot.insert(dataset.key(), Record::empty(dataset.shape()));
    }
    snapshot
}

fn as_object(snapshot: &AggregateSnapshot) -> Map<String, Value> {
    match snapshot.clone().into_value().unwrap() {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

#[cfg(test)]
mod document_format_tests {
    use super::*;

    #[test]
    fn upload_layout() {
        let upload = client_upload("2024-03-01T10:00:00.000Z")
            .with_dataset("subjects", json!(["math"]));
        let body = Value::Object(as_object(&upload));

        assert_eq!(body["lastSync"], json!("2024-03-01T10:00:00.000Z"));
        assert_eq!(body["appVersion"], json!("1.0.0"));
        assert_eq!(body["subjects"], json!(["math"]));
        assert_eq!(body["qcm_results"], json!({}));
        assert_eq!(body.as_object().unwrap().len(), Dataset::ALL.len() + 2);
    }

    #[test]
    fn stored_document_reads_back_as_snapshot() {
        let stored = json!({
            "lastSync": "2024-03-01T10:00:00.000Z",
            "appVersion": "0.9.0",
            "imported_files": [{"id": "a", "uploadedAt": "2024-03-01"}],
            "legacyField": true,
        });

        let snapshot = AggregateSnapshot::from_value(stored).unwrap();
        assert_eq!(snapshot.last_sync, Some(SyncTimestamp::new("2024-03-01T10:00:00.000Z")));
        assert_eq!(snapshot.get("legacyField"), Some(&json!(true)));
        assert!(snapshot.shape_mismatches().is_empty());
    }

    #[test]
    fn merge_upload_keeps_other_device_entries() {
        let mut stored = as_object(
            &client_upload("2024-01-01T00:00:00.000Z")
                .with_dataset("flashcards", json!({"deck-a": {"front": "1"}}))
                .with_dataset("statistics", json!({"quizzesTaken": 4})),
        );
        let upload = client_upload("2024-02-01T00:00:00.000Z")
            .with_dataset("flashcards", json!({"deck-b": {"front": "2"}}));

        deep_merge(&mut stored, as_object(&upload));
        let stored = Value::Object(stored);

        assert_eq!(stored["lastSync"], json!("2024-02-01T00:00:00.000Z"));
        assert_eq!(
            stored["flashcards"],
            json!({"deck-a": {"front": "1"}, "deck-b": {"front": "2"}})
        );
        assert_eq!(stored["statistics"], json!({"quizzesTaken": 4}));
    }

    #[test]
    fn merge_upload_replaces_lists() {
        let mut stored = as_object(
            &client_upload("2024-01-01T00:00:00.000Z").with_dataset("subjects", json!(["a", "b"])),
        );
        let upload = client_upload("2024-02-01T00:00:00.000Z").with_dataset("subjects", json!(["c"]));

        deep_merge(&mut stored, as_object(&upload));
        assert_eq!(stored["subjects"], json!(["c"]));
    }

    #[test]
    fn malformed_metadata_is_rejected() {
        assert!(AggregateSnapshot::from_value(json!({"lastSync": 42})).is_err());
        assert!(AggregateSnapshot::from_value(json!("document")).is_err());
    }
}
