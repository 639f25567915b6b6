//! Database operations for the documents table.

use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, Row, Transaction};
use studyhub_engine::{APP_VERSION_FIELD, LAST_SYNC_FIELD};

/// A stored document row from the database.
#[derive(Debug)]
pub struct StoredDocument {
    pub user_id: String,
    pub body: Value,
    #[allow(dead_code)]
    pub last_sync: Option<String>,
    #[allow(dead_code)]
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredDocument {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredDocument {
            user_id: row.try_get("user_id")?,
            body: row.try_get("body")?,
            last_sync: row.try_get("last_sync")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Get a user's document.
pub async fn get_document(pool: &PgPool, user_id: &str) -> Result<Option<StoredDocument>, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(
        r#"
        SELECT user_id, body, last_sync, updated_at
        FROM documents
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

/// Lock a user's document row for a read-modify-write.
pub async fn get_document_for_update(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
) -> Result<Option<Map<String, Value>>, sqlx::Error> {
    let row = sqlx::query("SELECT body FROM documents WHERE user_id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;

    match row {
        Some(row) => match row.try_get::<Value, _>("body")? {
            Value::Object(body) => Ok(Some(body)),
            _ => Ok(Some(Map::new())),
        },
        None => Ok(None),
    }
}

/// Insert or replace a user's document.
pub async fn upsert_document(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
    body: Map<String, Value>,
) -> Result<(), sqlx::Error> {
    let last_sync = body
        .get(LAST_SYNC_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string);
    let app_version = body
        .get(APP_VERSION_FIELD)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    sqlx::query(
        r#"
        INSERT INTO documents (user_id, body, last_sync, app_version, created_at, updated_at)
        VALUES ($1, $2, $3, $4, NOW(), NOW())
        ON CONFLICT (user_id) DO UPDATE SET
            body = EXCLUDED.body,
            last_sync = EXCLUDED.last_sync,
            app_version = EXCLUDED.app_version,
            updated_at = NOW()
        "#,
    )
    .bind(user_id)
    .bind(Value::Object(body))
    .bind(last_sync)
    .bind(app_version)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
