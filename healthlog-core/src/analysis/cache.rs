//! Content-addressed cache of TEF analyses.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::types::{FoodEntry, TefAnalysis};

/// Entries kept before the oldest is evicted.
pub const DEFAULT_CAPACITY: usize = 64;

/// Fields that do not change what was eaten.
const IGNORED_FIELDS: &[&str] = &["log_id", "is_pending"];

fn canonical(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonical(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonical).collect()),
        other => other,
    }
}

/// SHA-256 (hex) of the canonical JSON of `entries`.
///
/// Placeholders are skipped; ids and the pending flag are ignored, so the hash
/// only moves when what was eaten changes. Entry order matters.
pub fn content_hash(entries: &[FoodEntry]) -> String {
    let content: Vec<Value> = entries
        .iter()
        .filter(|e| !e.is_pending)
        .map(|entry| {
            let mut value = serde_json::to_value(entry).unwrap_or(Value::Null);
            if let Some(map) = value.as_object_mut() {
                for field in IGNORED_FIELDS {
                    map.remove(*field);
                }
            }
            canonical(value)
        })
        .collect();

    let bytes = serde_json::to_vec(&Value::Array(content)).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Whether `entries` differ from the content last analyzed.
pub fn should_recompute(entries: &[FoodEntry], last_seen_hash: &str) -> bool {
    content_hash(entries) != last_seen_hash
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisCacheEntry {
    pub analysis: TefAnalysis,
    pub cached_at: DateTime<Utc>,
}

/// In-memory cache keyed by [`content_hash`].
pub struct AnalysisCache {
    entries: Mutex<HashMap<String, AnalysisCacheEntry>>,
    capacity: usize,
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl AnalysisCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, hash: &str) -> Option<TefAnalysis> {
        self.entries
            .lock()
            .unwrap()
            .get(hash)
            .map(|e| e.analysis.clone())
    }

    pub fn insert(&self, hash: &str, analysis: TefAnalysis) {
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(hash) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.cached_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            hash.to_string(),
            AnalysisCacheEntry {
                analysis,
                cached_at: Utc::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}
