//! The closed set of synchronized datasets.
//!
//! Every dataset lives under one key in the local store and one top-level
//! field of the cloud document. Each has a declared shape, which fixes its
//! empty default, and a default merge strategy.

use crate::{error::Result, merge::MergeStrategy, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Local store key holding the last recorded cloud sync timestamp.
pub const LAST_CLOUD_SYNC_KEY: &str = "last_cloud_sync";

/// Declared shape of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    /// Ordered sequence of entries
    List,
    /// Mapping from identifier to entry
    Map,
}

impl Shape {
    /// The empty value for this shape (`[]` or `{}`), never null.
    pub fn empty_value(self) -> Value {
        match self {
            Shape::List => Value::Array(Vec::new()),
            Shape::Map => Value::Object(serde_json::Map::new()),
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shape::List => write!(f, "list"),
            Shape::Map => write!(f, "map"),
        }
    }
}

/// A synchronized dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    Subjects,
    QcmData,
    QcmResults,
    Flashcards,
    Resumes,
    ImportedFiles,
    ChatHistory,
    Statistics,
}

impl Dataset {
    /// Every tracked dataset, in collection order.
    pub const ALL: [Dataset; 8] = [
        Dataset::Subjects,
        Dataset::QcmData,
        Dataset::QcmResults,
        Dataset::Flashcards,
        Dataset::Resumes,
        Dataset::ImportedFiles,
        Dataset::ChatHistory,
        Dataset::Statistics,
    ];

    /// Store key and document field name.
    pub fn key(self) -> &'static str {
        match self {
            Dataset::Subjects => "subjects",
            Dataset::QcmData => "qcm_data",
            Dataset::QcmResults => "qcm_results",
            Dataset::Flashcards => "flashcards",
            Dataset::Resumes => "resumes",
            Dataset::ImportedFiles => "imported_files",
            Dataset::ChatHistory => "chat_history",
            Dataset::Statistics => "statistics",
        }
    }

    pub fn shape(self) -> Shape {
        match self {
            Dataset::Subjects | Dataset::ImportedFiles => Shape::List,
            _ => Shape::Map,
        }
    }

    /// Strategy registered for this dataset in a default [`crate::MergeEngine`].
    pub fn default_strategy(self) -> MergeStrategy {
        match self {
            Dataset::QcmResults => MergeStrategy::QuizResults,
            Dataset::Statistics => MergeStrategy::SumStatistics,
            Dataset::ImportedFiles => MergeStrategy::LatestFile,
            _ => MergeStrategy::Union,
        }
    }

    /// Look up a dataset by its key.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.key() == key)
    }
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Dataset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_key(s).ok_or_else(|| Error::UnknownDataset(s.to_string()))
    }
}
