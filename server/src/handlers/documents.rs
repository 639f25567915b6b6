//! Document handlers - one JSON document per user.
//!
//! `PUT` with `merge=true` deep-merges the body into the stored document:
//! nested objects merge key by key, everything else (lists included) is
//! replaced. `PATCH` replaces top-level fields of an existing document.

use serde::Deserialize;
use serde_json::{Map, Value};
use sqlx::PgPool;
use studyhub_engine::{deep_merge, AggregateSnapshot};

use crate::db;
use crate::error::{AppError, Result};

/// Longest accepted user id.
const MAX_USER_ID_LEN: usize = 128;

/// Query parameters for a document put.
#[derive(Debug, Default, Deserialize)]
pub struct PutQuery {
    /// Merge into the stored document instead of replacing it
    #[serde(default)]
    pub merge: bool,
}

/// Fetch a user's document.
pub async fn handle_get(pool: &PgPool, user_id: &str) -> Result<Value> {
    validate_user_id(user_id)?;
    let stored = db::get_document(pool, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no document for user {user_id}")))?;

    tracing::debug!(user_id = %stored.user_id, "document served");
    Ok(stored.body)
}

/// Write a user's document, merging or replacing per `query`.
pub async fn handle_put(pool: &PgPool, user_id: &str, query: PutQuery, body: Value) -> Result<()> {
    validate_user_id(user_id)?;
    let incoming = validate_document(body)?;

    let mut tx = pool.begin().await?;
    let existing = db::get_document_for_update(&mut tx, user_id).await?;
    let created = existing.is_none();
    let document = apply_put(existing, incoming, query.merge);
    db::upsert_document(&mut tx, user_id, document).await?;
    tx.commit().await?;

    tracing::info!(user_id, merge = query.merge, created, "document written");
    Ok(())
}

/// Replace top-level fields of an existing document.
pub async fn handle_patch(pool: &PgPool, user_id: &str, fields: Map<String, Value>) -> Result<()> {
    validate_user_id(user_id)?;

    let mut tx = pool.begin().await?;
    let existing = db::get_document_for_update(&mut tx, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no document for user {user_id}")))?;
    let field_count = fields.len();
    db::upsert_document(&mut tx, user_id, apply_fields(existing, fields)).await?;
    tx.commit().await?;

    tracing::info!(user_id, fields = field_count, "document fields updated");
    Ok(())
}

fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() || user_id.len() > MAX_USER_ID_LEN {
        return Err(AppError::BadRequest(format!(
            "user id must be 1 to {MAX_USER_ID_LEN} bytes"
        )));
    }
    Ok(())
}

/// Check the body parses as a snapshot and return it as an object.
fn validate_document(body: Value) -> Result<Map<String, Value>> {
    let snapshot = AggregateSnapshot::from_value(body.clone())?;
    for (dataset, actual) in snapshot.shape_mismatches() {
        tracing::warn!(dataset = %dataset, ?actual, "accepting dataset with unexpected shape");
    }

    match body {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::BadRequest("document must be a JSON object".into())),
    }
}

fn apply_put(
    existing: Option<Map<String, Value>>,
    incoming: Map<String, Value>,
    merge: bool,
) -> Map<String, Value> {
    match existing {
        Some(mut document) if merge => {
            deep_merge(&mut document, incoming);
            document
        }
        _ => incoming,
    }
}

fn apply_fields(mut document: Map<String, Value>, fields: Map<String, Value>) -> Map<String, Value> {
    document.extend(fields);
    document
}
