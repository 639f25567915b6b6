//! Authentication middleware.
//!
//! When `AUTH_SECRET` is configured, every document request must carry it as
//! a bearer token. Without a secret the service accepts anonymous requests.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use crate::AppState;

/// Caller that passed the bearer-token check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthUser {
    /// Presented the configured secret
    Token,
    /// No secret configured
    Anonymous,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        authorize(header, state.config.auth_secret.as_deref())
    }
}

fn authorize(
    header: Option<&str>,
    secret: Option<&str>,
) -> Result<AuthUser, (StatusCode, &'static str)> {
    let Some(secret) = secret else {
        return Ok(AuthUser::Anonymous);
    };

    let token = match header {
        Some(header) => header.strip_prefix("Bearer ").ok_or((
            StatusCode::UNAUTHORIZED,
            "Invalid authorization header format",
        ))?,
        None => return Err((StatusCode::UNAUTHORIZED, "Missing authorization header")),
    };

    if !constant_time_eq(token.as_bytes(), secret.as_bytes()) {
        tracing::warn!("rejected request with invalid bearer token");
        return Err((StatusCode::UNAUTHORIZED, "Invalid bearer token"));
    }
    Ok(AuthUser::Token)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
