//! # StudyHub Client
//!
//! Local persistence and cloud sync for StudyHub datasets.
//!
//! - [`LocalStore`]: typed, failure-tolerant key-value access
//! - [`DataCollector`]: snapshots every tracked dataset
//! - [`RemoteDocumentStore`]: one cloud document per user
//! - [`SyncOrchestrator`]: periodic, forced, and unload-time sync cycles
//!
//! Merge rules live in [`studyhub_engine`].

pub mod collector;
pub mod config;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod remote;
pub mod session;
pub mod storage;

pub use collector::DataCollector;
pub use config::{ClientConfig, ConfigError};
pub use error::{StorageError, SyncError};
pub use notify::{ChannelSink, Notification, NotificationSink, Severity, TracingSink};
pub use orchestrator::{SkipReason, SyncOrchestrator, SyncOutcome, SyncState};
pub use remote::{HttpDocumentStore, MemoryDocumentStore, PutOptions, RemoteDocumentStore};
pub use session::{SessionProvider, StaticSession};
pub use storage::{FileBackend, KeyValueBackend, LocalStore, MemoryBackend};
