//! # StudyHub Engine
//!
//! Deterministic merge logic for StudyHub's local-first sync.
//!
//! A StudyHub client keeps each dataset (subjects, quizzes, quiz results,
//! flashcards, summaries, imported files, chat history, statistics) as a JSON
//! value under its own key, and mirrors all of them into one cloud document
//! per user. This crate decides how a local and a remote copy of the same
//! dataset are reconciled.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches storage, network, or the clock
//! - **Deterministic**: same inputs always produce the same merged value
//! - **Explicit dispatch**: a strategy table keyed by dataset replaces
//!   runtime shape sniffing at call sites
//!
//! ## Core Concepts
//!
//! ### Datasets
//!
//! [`Dataset`] is the closed set of synchronized keys. Each has a declared
//! [`Shape`] (list or mapping), which fixes its empty default.
//!
//! ### Records
//!
//! A [`Record`] is one dataset's value, classified as list, mapping, or
//! scalar. [`QuizResult`] and [`ImportedFile`] type the entries that
//! per-dataset strategies need to read.
//!
//! ### Merging
//!
//! [`MergeEngine`] maps dataset keys to a [`MergeStrategy`]:
//! - [`MergeStrategy::Union`] - lists union, mappings overlay (default)
//! - [`MergeStrategy::QuizResults`] - sum attempts, best score, latest attempt
//! - [`MergeStrategy::SumStatistics`] - sum numeric counters
//! - [`MergeStrategy::LatestFile`] - latest upload per file id
//!
//! ### Snapshots
//!
//! [`AggregateSnapshot`] is the document exchanged with the cloud, stamped
//! with a [`SyncTimestamp`].
//!
//! ## Quick Start
//!
//! ```rust
//! use studyhub_engine::{MergeEngine, Record};
//! use serde_json::json;
//!
//! let engine = MergeEngine::new();
//!
//! let local = Record::from_value(json!({
//!     "q1": {"attempts": 2, "bestScore": 80, "lastAttempt": "2024-01-01"}
//! }));
//! let remote = Record::from_value(json!({
//!     "q1": {"attempts": 3, "bestScore": 90, "lastAttempt": "2024-02-01"}
//! }));
//!
//! let merged = engine.merge(local, remote, "qcm_results").into_value();
//! assert_eq!(
//!     merged,
//!     json!({"q1": {"attempts": 5, "bestScore": 90, "lastAttempt": "2024-02-01"}})
//! );
//! ```

pub mod dataset;
pub mod error;
pub mod merge;
pub mod record;
pub mod snapshot;
pub mod timestamp;

// Re-export main types at crate root
pub use dataset::{Dataset, Shape, LAST_CLOUD_SYNC_KEY};
pub use error::Error;
pub use merge::{MergeEngine, MergeStrategy};
pub use record::{entry_id, FileId, ImportedFile, QuizResult, Record};
pub use snapshot::{
    deep_merge, AggregateSnapshot, SnapshotMetadata, APP_VERSION_FIELD, LAST_SYNC_FIELD,
};
pub use timestamp::SyncTimestamp;

/// Type aliases for clarity
pub type DatasetKey = String;
pub type UserId = String;
