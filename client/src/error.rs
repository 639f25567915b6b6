//! Error types for the sync client.

use thiserror::Error;

/// Local persistence failures.
///
/// These never escape [`crate::LocalStore`]; the adapter logs them and
/// reports failure through its return value.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("quota exceeded writing '{key}': {needed} bytes needed, {quota} allowed")]
    QuotaExceeded {
        key: String,
        needed: usize,
        quota: usize,
    },

    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures of a sync cycle or of a remote document call.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no authenticated session")]
    NotAuthenticated,

    #[error("invalid sync url: {0}")]
    InvalidUrl(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote returned {status}: {body}")]
    RemoteStatus { status: u16, body: String },

    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed remote document: {0}")]
    Engine(#[from] studyhub_engine::Error),

    #[error("could not persist '{0}' locally")]
    LocalWrite(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
