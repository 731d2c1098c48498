//! Folds partial results into the suggestion set.
//!
//! Categories are kept in first-seen order. A `Replace` swaps the whole
//! category, an `Append` adds one suggestion (creating the category if needed),
//! and the two compose in any interleaving.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::frame::{CompletePayload, PartialUpdate};

pub const DEFAULT_PRIORITY: &str = "medium";
const GENERATING_SUMMARY: &str = "Generating suggestions…";
const MISSING_SUMMARY: &str = "No summary available";

/// One category of suggestions, normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySuggestion {
    pub key: String,
    pub category: String,
    pub priority: String,
    #[serde(default)]
    pub suggestions: Vec<Value>,
    pub summary: String,
    /// Fields the server added that we do not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn non_empty_str(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl CategorySuggestion {
    /// Fill in whatever `value` is missing. Non-objects become an empty
    /// category named `fallback_category`.
    pub fn normalize(value: &Value, fallback_category: &str, fallback_summary: &str) -> Self {
        let empty = Map::new();
        let map = value.as_object().unwrap_or(&empty);

        let category = non_empty_str(map, "category").unwrap_or_else(|| fallback_category.to_string());
        let key = non_empty_str(map, "key").unwrap_or_else(|| category.clone());
        let extra = map
            .iter()
            .filter(|(k, _)| {
                !matches!(
                    k.as_str(),
                    "key" | "category" | "priority" | "suggestions" | "summary"
                )
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self {
            key,
            category,
            priority: non_empty_str(map, "priority").unwrap_or_else(|| DEFAULT_PRIORITY.to_string()),
            suggestions: map
                .get("suggestions")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            summary: non_empty_str(map, "summary").unwrap_or_else(|| fallback_summary.to_string()),
            extra,
        }
    }
}

/// A suggestion set for one analysis date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRecord {
    pub suggestions: Vec<CategorySuggestion>,
    pub generated_at: DateTime<Utc>,
    pub data_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_info: Option<Value>,
    /// Milliseconds
    #[serde(default)]
    pub processing_time: u64,
    /// Milliseconds since the epoch; strictly increasing within a run
    #[serde(default)]
    pub last_updated: i64,
}

/// What is published after every merge.
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestionSnapshot {
    pub record: SuggestionRecord,
    pub is_partial: bool,
    /// Category touched by the latest merge
    pub current_category: Option<String>,
    /// The suggestion just appended, for single-unit updates
    pub recent_suggestion: Option<Value>,
}

pub struct PartialResultMerger {
    date: String,
    started: Instant,
    categories: Vec<(String, Value)>,
    last_updated: i64,
}

impl PartialResultMerger {
    pub fn new(date: &str) -> Self {
        Self {
            date: date.to_string(),
            started: Instant::now(),
            categories: Vec::new(),
            last_updated: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Suggestions accumulated for `category`.
    pub fn count(&self, category: &str) -> usize {
        self.categories
            .iter()
            .find(|(k, _)| k == category)
            .and_then(|(_, v)| v.get("suggestions"))
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }

    fn stamp(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis();
        self.last_updated = now.max(self.last_updated + 1);
        self.last_updated
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Fold `update` into `category` and return the whole in-progress set.
    pub fn merge(&mut self, category: &str, update: PartialUpdate) -> SuggestionSnapshot {
        let mut recent = None;
        match update {
            PartialUpdate::Replace(data) => match self.categories.iter_mut().find(|(k, _)| k == category) {
                Some((_, slot)) => *slot = data,
                None => self.categories.push((category.to_string(), data)),
            },
            PartialUpdate::Append {
                suggestion,
                priority,
                summary,
            } => {
                let index = match self.categories.iter().position(|(k, _)| k == category) {
                    Some(i) => i,
                    None => {
                        let initial = serde_json::json!({
                            "key": category,
                            "category": category,
                            "priority": priority.unwrap_or_else(|| DEFAULT_PRIORITY.to_string()),
                            "suggestions": [],
                            "summary": summary.unwrap_or_else(|| GENERATING_SUMMARY.to_string()),
                        });
                        self.categories.push((category.to_string(), initial));
                        self.categories.len() - 1
                    }
                };
                append_suggestion(&mut self.categories[index].1, suggestion.clone());
                recent = Some(suggestion);
            }
        }

        let suggestions = self
            .categories
            .iter()
            .map(|(key, value)| CategorySuggestion::normalize(value, key, GENERATING_SUMMARY))
            .collect();
        let record = SuggestionRecord {
            suggestions,
            generated_at: Utc::now(),
            data_date: self.date.clone(),
            key_info: None,
            processing_time: self.elapsed_ms(),
            last_updated: self.stamp(),
        };
        SuggestionSnapshot {
            record,
            is_partial: true,
            current_category: Some(category.to_string()),
            recent_suggestion: recent,
        }
    }

    /// The final set. Server-supplied suggestions win when there are any.
    pub fn finalize(&mut self, complete: Option<CompletePayload>) -> SuggestionRecord {
        let complete = complete.unwrap_or_default();

        let suggestions: Vec<CategorySuggestion> = if complete.suggestions.is_empty() {
            self.categories
                .iter()
                .map(|(key, value)| CategorySuggestion::normalize(value, key, MISSING_SUMMARY))
                .collect()
        } else {
            complete
                .suggestions
                .iter()
                .map(|value| CategorySuggestion::normalize(value, "unknown", MISSING_SUMMARY))
                .collect()
        };

        SuggestionRecord {
            suggestions,
            generated_at: complete.generated_at.unwrap_or_else(Utc::now),
            data_date: self.date.clone(),
            key_info: complete.key_info,
            processing_time: complete
                .processing_time_ms
                .unwrap_or_else(|| self.elapsed_ms()),
            last_updated: self.stamp(),
        }
    }
}

/// Push onto `category.suggestions`, replacing a missing or non-array list.
fn append_suggestion(category: &mut Value, suggestion: Value) {
    if !category.is_object() {
        *category = Value::Object(Map::new());
    }
    if let Some(map) = category.as_object_mut() {
        let list = map
            .entry("suggestions")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !list.is_array() {
            *list = Value::Array(Vec::new());
        }
        if let Some(items) = list.as_array_mut() {
            items.push(suggestion);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn append(text: &str) -> PartialUpdate {
        PartialUpdate::Append {
            suggestion: json!(text),
            priority: None,
            summary: None,
        }
    }

    #[test]
    fn test_two_single_units_in_order() {
        let mut merger = PartialResultMerger::new("2024-06-01");
        merger.merge("nutrition", append("eat more fiber"));
        let snapshot = merger.merge("nutrition", append("drink water"));

        let nutrition = &snapshot.record.suggestions[0];
        assert_eq!(nutrition.priority, "medium");
        assert_eq!(nutrition.suggestions, vec![json!("eat more fiber"), json!("drink water")]);
        assert_eq!(snapshot.recent_suggestion, Some(json!("drink water")));
        assert_eq!(merger.count("nutrition"), 2);
    }

    #[test]
    fn test_replace_and_append_compose() {
        let mut merger = PartialResultMerger::new("2024-06-01");
        merger.merge("exercise", append("stretch"));
        merger.merge(
            "nutrition",
            PartialUpdate::Replace(json!({
                "category": "nutrition",
                "priority": "high",
                "suggestions": ["a"],
                "summary": "Protein is low",
                "confidence": 0.8
            })),
        );
        let snapshot = merger.merge("nutrition", append("b"));

        let keys: Vec<&str> = snapshot.record.suggestions.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["exercise", "nutrition"]);

        let nutrition = &snapshot.record.suggestions[1];
        assert_eq!(nutrition.priority, "high");
        assert_eq!(nutrition.suggestions, vec![json!("a"), json!("b")]);
        assert_eq!(nutrition.extra.get("confidence"), Some(&json!(0.8)));

        // A later replace wins over earlier appends
        let snapshot = merger.merge("exercise", PartialUpdate::Replace(json!({"suggestions": []})));
        assert!(snapshot.record.suggestions[0].suggestions.is_empty());
        assert_eq!(snapshot.record.suggestions[0].summary, GENERATING_SUMMARY);
    }

    #[test]
    fn test_last_updated_strictly_increases() {
        let mut merger = PartialResultMerger::new("2024-06-01");
        let mut previous = 0;
        for i in 0..50 {
            let snapshot = merger.merge("nutrition", append(&i.to_string()));
            assert!(snapshot.record.last_updated > previous);
            previous = snapshot.record.last_updated;
        }
        assert!(merger.finalize(None).last_updated > previous);
    }

    #[test]
    fn test_finalize_prefers_server_set() {
        let mut merger = PartialResultMerger::new("2024-06-01");
        merger.merge("nutrition", append("local"));

        let record = merger.finalize(Some(CompletePayload {
            suggestions: vec![json!({"category": "metabolism", "suggestions": ["server"]})],
            processing_time_ms: Some(900),
            key_info: Some(json!({"source": "shared"})),
            ..Default::default()
        }));
        assert_eq!(record.suggestions.len(), 1);
        assert_eq!(record.suggestions[0].key, "metabolism");
        assert_eq!(record.suggestions[0].summary, MISSING_SUMMARY);
        assert_eq!(record.processing_time, 900);
        assert_eq!(record.data_date, "2024-06-01");
        assert!(record.key_info.is_some());
    }

    #[test]
    fn test_finalize_uses_accumulated_when_server_set_empty() {
        let mut merger = PartialResultMerger::new("2024-06-01");
        merger.merge("nutrition", append("local"));
        let record = merger.finalize(Some(CompletePayload::default()));
        assert_eq!(record.suggestions[0].suggestions, vec![json!("local")]);
    }

    #[test]
    fn test_normalize_non_object() {
        let normalized = CategorySuggestion::normalize(&json!("oops"), "unknown", MISSING_SUMMARY);
        assert_eq!(normalized.key, "unknown");
        assert_eq!(normalized.priority, DEFAULT_PRIORITY);
        assert!(normalized.suggestions.is_empty());
    }

    #[test]
    fn test_record_wire_shape() {
        let mut merger = PartialResultMerger::new("2024-06-01");
        merger.merge("nutrition", append("x"));
        let json = serde_json::to_value(merger.finalize(None)).unwrap();
        assert!(json.get("generatedAt").is_some());
        assert_eq!(json["dataDate"], "2024-06-01");
        assert!(json.get("lastUpdated").is_some());
        assert!(json.get("keyInfo").is_none());
    }
}
