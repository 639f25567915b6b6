//! Document endpoint routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::{Map, Value};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_get, handle_patch, handle_put, PutQuery};
use crate::AppState;

/// Create document routes.
pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/users/{user_id}/document",
        get(get_handler).put(put_handler).patch(patch_handler),
    )
}

/// GET /users/{user_id}/document - Fetch the document.
async fn get_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<Value>> {
    let document = handle_get(&state.pool, &user_id).await?;
    Ok(Json(document))
}

/// PUT /users/{user_id}/document?merge= - Write the document.
async fn put_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(user_id): Path<String>,
    Query(query): Query<PutQuery>,
    Json(body): Json<Value>,
) -> Result<StatusCode> {
    handle_put(&state.pool, &user_id, query, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /users/{user_id}/document - Replace top-level fields.
async fn patch_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(user_id): Path<String>,
    Json(fields): Json<Map<String, Value>>,
) -> Result<StatusCode> {
    handle_patch(&state.pool, &user_id, fields).await?;
    Ok(StatusCode::NO_CONTENT)
}
