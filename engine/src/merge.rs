//! Merge logic for reconciling a local and a remote dataset.
//!
//! Given the local and remote value of the same dataset, this module produces
//! one merged value. The rule applied is looked up in a strategy table keyed
//! by dataset identifier; unregistered keys use [`MergeStrategy::Union`].
//!
//! # Rules
//!
//! 1. Identical records are already in sync and are returned unchanged
//! 2. A remote `null` means "absent" and keeps the local record
//! 3. The dataset's strategy runs if both sides have the shape it expects
//! 4. Otherwise the default rule applies: lists union, mappings overlay,
//!    anything else takes the remote value

use crate::{
    record::{entry_id, ImportedFile, QuizResult},
    timestamp::{compare_dates, later_of},
    Dataset, DatasetKey, Record,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Per-dataset merge strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStrategy {
    /// Lists: concatenate and dedupe. Mappings: remote overwrites local,
    /// one nested level deep. Anything else: remote wins.
    #[default]
    Union,
    /// Per quiz id: sum `attempts`, max `bestScore`, latest `lastAttempt`
    QuizResults,
    /// Sum numeric leaves recursively
    SumStatistics,
    /// Dedupe files by `id`, keeping the latest `uploadedAt`
    LatestFile,
}

/// Nesting depth the default mapping rule recurses into.
const OVERLAY_DEPTH: usize = 1;

/// The merge engine holds the strategy table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeEngine {
    strategies: BTreeMap<DatasetKey, MergeStrategy>,
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeEngine {
    /// Create an engine with every known dataset's strategy registered.
    pub fn new() -> Self {
        let mut engine = Self::empty();
        for dataset in Dataset::ALL {
            engine.register(dataset.key(), dataset.default_strategy());
        }
        engine
    }

    /// Create an engine with no registrations (everything uses `Union`).
    pub fn empty() -> Self {
        Self {
            strategies: BTreeMap::new(),
        }
    }

    /// Register a strategy, returning the one it replaced.
    pub fn register(
        &mut self,
        dataset_key: impl Into<DatasetKey>,
        strategy: MergeStrategy,
    ) -> Option<MergeStrategy> {
        self.strategies.insert(dataset_key.into(), strategy)
    }

    /// Builder-style registration.
    pub fn with_strategy(mut self, dataset_key: impl Into<DatasetKey>, strategy: MergeStrategy) -> Self {
        self.register(dataset_key, strategy);
        self
    }

    /// Strategy used for a dataset key.
    pub fn strategy_for(&self, dataset_key: &str) -> MergeStrategy {
        self.strategies
            .get(dataset_key)
            .copied()
            .unwrap_or_default()
    }

    /// Merge a local and a remote record of the same dataset.
    pub fn merge(&self, local: Record, remote: Record, dataset_key: &str) -> Record {
        if local == remote {
            return local;
        }
        if remote.is_null() {
            return local;
        }

        match (self.strategy_for(dataset_key), local, remote) {
            (MergeStrategy::QuizResults, Record::Map(local), Record::Map(remote)) => {
                Record::Map(merge_quiz_results(dataset_key, local, remote))
            }
            (MergeStrategy::SumStatistics, Record::Map(local), Record::Map(remote)) => {
                Record::Map(sum_statistics(local, remote))
            }
            (MergeStrategy::LatestFile, Record::List(local), Record::List(remote)) => {
                Record::List(latest_files(local, remote))
            }
            (_, local, remote) => merge_default(local, remote),
        }
    }

    /// Convenience wrapper over raw JSON values.
    pub fn merge_values(&self, local: Value, remote: Value, dataset_key: &str) -> Value {
        self.merge(Record::from_value(local), Record::from_value(remote), dataset_key)
            .into_value()
    }
}

/// The default rule, dispatched on the runtime shapes of both sides.
fn merge_default(local: Record, remote: Record) -> Record {
    match (local, remote) {
        (Record::List(local), Record::List(remote)) => Record::List(union_lists(local, remote)),
        (Record::Map(local), Record::Map(remote)) => {
            Record::Map(overlay_maps(local, remote, OVERLAY_DEPTH))
        }
        (_, remote) => remote,
    }
}

/// Concatenate local then remote, dropping repeats.
///
/// Entries with an `id` are repeats when ids match, and the later occurrence
/// replaces the earlier one in place. Other entries are repeats when they are
/// structurally equal.
fn union_lists(local: Vec<Value>, remote: Vec<Value>) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(local.len() + remote.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut seen: HashSet<String> = HashSet::new();

    for entry in local.into_iter().chain(remote) {
        match entry_id(&entry) {
            Some(id) => match positions.get(&id) {
                Some(&pos) => merged[pos] = entry,
                None => {
                    positions.insert(id, merged.len());
                    merged.push(entry);
                }
            },
            None => {
                // Maps are ordered, so compact JSON is a canonical form
                if seen.insert(entry.to_string()) {
                    merged.push(entry);
                }
            }
        }
    }

    merged
}

/// Remote keys overwrite local keys; colliding mappings recurse `depth` levels.
fn overlay_maps(
    mut local: Map<String, Value>,
    remote: Map<String, Value>,
    depth: usize,
) -> Map<String, Value> {
    for (key, remote_value) in remote {
        let nested =
            depth > 0 && remote_value.is_object() && matches!(local.get(&key), Some(Value::Object(_)));

        if nested {
            if let (Some(Value::Object(local_inner)), Value::Object(remote_inner)) =
                (local.get_mut(&key), remote_value)
            {
                let taken = std::mem::take(local_inner);
                *local_inner = overlay_maps(taken, remote_inner, depth - 1);
            }
        } else {
            local.insert(key, remote_value);
        }
    }
    local
}

/// Default rule for a single colliding entry inside a mapping.
fn merge_colliding_entry(local: Value, remote: Value) -> Value {
    match (local, remote) {
        (Value::Object(local), Value::Object(remote)) => Value::Object(overlay_maps(local, remote, 0)),
        (_, remote) => remote,
    }
}

fn merge_quiz_results(
    dataset_key: &str,
    mut local: Map<String, Value>,
    remote: Map<String, Value>,
) -> Map<String, Value> {
    for (quiz_id, remote_entry) in remote {
        let merged = match local.remove(&quiz_id) {
            None => remote_entry,
            Some(local_entry) => {
                let parsed = (
                    QuizResult::from_entry(dataset_key, &quiz_id, &local_entry),
                    QuizResult::from_entry(dataset_key, &quiz_id, &remote_entry),
                );
                match parsed {
                    (Ok(l), Ok(r)) => combine_quiz_results(l, r).into_entry(),
                    _ => merge_colliding_entry(local_entry, remote_entry),
                }
            }
        };
        local.insert(quiz_id, merged);
    }
    local
}

fn combine_quiz_results(local: QuizResult, remote: QuizResult) -> QuizResult {
    let last_attempt =
        later_of(local.last_attempt.as_deref(), remote.last_attempt.as_deref()).map(str::to_string);
    let best_score = max_number(local.best_score, remote.best_score);

    let mut extra = local.extra;
    extra.extend(remote.extra);

    QuizResult {
        attempts: local.attempts.saturating_add(remote.attempts),
        best_score,
        last_attempt,
        extra,
    }
}

/// Larger of two optional numbers; the first wins ties.
fn max_number(a: Option<Number>, b: Option<Number>) -> Option<Number> {
    match (a, b) {
        (Some(a), Some(b)) => {
            let ordering = a
                .as_f64()
                .zip(b.as_f64())
                .and_then(|(a, b)| b.partial_cmp(&a));
            if ordering == Some(Ordering::Greater) {
                Some(b)
            } else {
                Some(a)
            }
        }
        (a, None) => a,
        (None, b) => b,
    }
}

fn sum_statistics(mut local: Map<String, Value>, remote: Map<String, Value>) -> Map<String, Value> {
    for (key, remote_value) in remote {
        let merged = match (local.remove(&key), remote_value) {
            (None, remote_value) => remote_value,
            (Some(Value::Number(l)), Value::Number(r)) => sum_numbers(&l, &r),
            (Some(Value::Object(l)), Value::Object(r)) => Value::Object(sum_statistics(l, r)),
            (Some(_), remote_value) => remote_value,
        };
        local.insert(key, merged);
    }
    local
}

/// Add two JSON numbers, staying integral when both sides are.
fn sum_numbers(a: &Number, b: &Number) -> Value {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Value::from(sum);
        }
    }
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        if let Some(sum) = a.checked_add(b) {
            return Value::from(sum);
        }
    }
    let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    Number::from_f64(sum)
        .map(Value::Number)
        .unwrap_or_else(|| Value::Number(b.clone()))
}

/// Dedupe file entries by id, keeping the one with the later `uploadedAt`.
///
/// Entries keep their first-appearance position. On equal dates the earlier
/// (local) entry stays. Entries without an id fall back to structural dedupe.
fn latest_files(local: Vec<Value>, remote: Vec<Value>) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(local.len() + remote.len());
    let mut positions: HashMap<String, (usize, Option<String>)> = HashMap::new();
    let mut seen: HashSet<String> = HashSet::new();

    for entry in local.into_iter().chain(remote) {
        let Some(file) = ImportedFile::from_entry(&entry) else {
            if seen.insert(entry.to_string()) {
                merged.push(entry);
            }
            continue;
        };

        let id = file.id.as_key();
        match positions.get_mut(&id) {
            Some((pos, current_date)) => {
                let newer = match (current_date.as_deref(), file.uploaded_at.as_deref()) {
                    (Some(current), Some(candidate)) => {
                        compare_dates(candidate, current) == Ordering::Greater
                    }
                    (None, Some(_)) => true,
                    (_, None) => false,
                };
                if newer {
                    merged[*pos] = entry;
                    *current_date = file.uploaded_at;
                }
            }
            None => {
                positions.insert(id, (merged.len(), file.uploaded_at));
                merged.push(entry);
            }
        }
    }

    merged
}
