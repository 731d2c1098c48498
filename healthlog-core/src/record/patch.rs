//! Partial record updates.
//!
//! A [`RecordPatch`] names only the fields it changes. Applying it replaces
//! those fields wholesale (no deep merge), so re-applying the same patch is a
//! no-op. Fields that can be cleared use `Option<Option<T>>`: absent leaves the
//! field alone, `Some(None)` clears it, `Some(Some(v))` sets it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{
    ActivityLevel, DailyRecord, DailyStatus, ExerciseEntry, FoodEntry, Summary, TefAnalysis,
};

use super::summary::recompute_summary;

/// Distinguish an explicit `null` from a missing key.
fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Field-wise partial [`DailyRecord`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub food_entries: Option<Vec<FoodEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exercise_entries: Option<Vec<ExerciseEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub weight: Option<Option<f64>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub activity_level: Option<Option<ActivityLevel>>,
    #[serde(
        rename = "calculatedBMR",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub calculated_bmr: Option<Option<f64>>,
    #[serde(
        rename = "calculatedTDEE",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub calculated_tdee: Option<Option<f64>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub tef_analysis: Option<Option<TefAnalysis>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub daily_status: Option<Option<DailyStatus>>,
    #[serde(
        rename = "last_modified",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_modified: Option<DateTime<Utc>>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        *self == RecordPatch::default()
    }

    /// Whether the patch replaces either entry list.
    pub fn touches_entries(&self) -> bool {
        self.food_entries.is_some() || self.exercise_entries.is_some()
    }

    /// Both entry lists, the summary and the modification time of `record`.
    /// This is what a commit or a delete pushes to the remote.
    pub fn entries_of(record: &DailyRecord) -> Self {
        Self {
            food_entries: Some(record.food_entries.clone()),
            exercise_entries: Some(record.exercise_entries.clone()),
            summary: Some(record.summary.clone()),
            last_modified: record.last_modified,
            ..Default::default()
        }
    }

    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }
}

/// Apply `patch` to `record`, returning the new record.
///
/// The summary is always recomputed from the resulting entry lists, so a
/// summary carried by the patch can never disagree with its entries.
pub fn apply(record: &DailyRecord, patch: &RecordPatch) -> DailyRecord {
    let mut next = record.clone();

    if let Some(food) = &patch.food_entries {
        next.food_entries = food.clone();
    }
    if let Some(exercise) = &patch.exercise_entries {
        next.exercise_entries = exercise.clone();
    }
    if let Some(weight) = patch.weight {
        next.weight = weight;
    }
    if let Some(level) = patch.activity_level {
        next.activity_level = level;
    }
    if let Some(bmr) = patch.calculated_bmr {
        next.calculated_bmr = bmr;
    }
    if let Some(tdee) = patch.calculated_tdee {
        next.calculated_tdee = tdee;
    }
    if let Some(tef) = &patch.tef_analysis {
        next.tef_analysis = tef.clone();
    }
    if let Some(status) = &patch.daily_status {
        next.daily_status = status.clone();
    }
    if let Some(at) = patch.last_modified {
        next.last_modified = Some(at);
    }

    next.summary = recompute_summary(&next.food_entries, &next.exercise_entries);
    next
}

/// Combine two patches field by field; `later` wins where both set a field.
pub fn merge(earlier: &RecordPatch, later: &RecordPatch) -> RecordPatch {
    RecordPatch {
        food_entries: later
            .food_entries
            .clone()
            .or_else(|| earlier.food_entries.clone()),
        exercise_entries: later
            .exercise_entries
            .clone()
            .or_else(|| earlier.exercise_entries.clone()),
        summary: later.summary.clone().or_else(|| earlier.summary.clone()),
        weight: later.weight.or(earlier.weight),
        activity_level: later.activity_level.or(earlier.activity_level),
        calculated_bmr: later.calculated_bmr.or(earlier.calculated_bmr),
        calculated_tdee: later.calculated_tdee.or(earlier.calculated_tdee),
        tef_analysis: later
            .tef_analysis
            .clone()
            .or_else(|| earlier.tef_analysis.clone()),
        daily_status: later
            .daily_status
            .clone()
            .or_else(|| earlier.daily_status.clone()),
        last_modified: later.last_modified.or(earlier.last_modified),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NutritionInfo;

    fn food(id: &str, calories: f64) -> FoodEntry {
        FoodEntry {
            log_id: id.to_string(),
            food_name: id.to_string(),
            consumed_grams: 100.0,
            meal_type: None,
            time_period: None,
            nutritional_info_per_100g: NutritionInfo::default(),
            total_nutritional_info_consumed: NutritionInfo {
                calories,
                ..Default::default()
            },
            is_estimated: true,
            is_pending: false,
        }
    }

    #[test]
    fn test_absent_fields_untouched() {
        let mut record = DailyRecord::empty("2024-05-01");
        record.weight = Some(70.0);
        record.food_entries.push(food("a", 100.0));

        let patch = RecordPatch {
            activity_level: Some(Some(ActivityLevel::Active)),
            ..Default::default()
        };
        let next = apply(&record, &patch);

        assert_eq!(next.weight, Some(70.0));
        assert_eq!(next.food_entries.len(), 1);
        assert_eq!(next.activity_level, Some(ActivityLevel::Active));
    }

    #[test]
    fn test_clear_with_explicit_null() {
        let mut record = DailyRecord::empty("2024-05-01");
        record.weight = Some(70.0);

        let patch: RecordPatch = serde_json::from_str(r#"{"weight": null}"#).unwrap();
        assert_eq!(patch.weight, Some(None));
        assert_eq!(apply(&record, &patch).weight, None);

        let untouched: RecordPatch = serde_json::from_str("{}").unwrap();
        assert_eq!(apply(&record, &untouched).weight, Some(70.0));
    }

    #[test]
    fn test_apply_idempotent() {
        let record = DailyRecord::empty("2024-05-01");
        let patch = RecordPatch {
            food_entries: Some(vec![food("a", 120.0), food("b", 80.0)]),
            weight: Some(Some(71.5)),
            ..Default::default()
        };
        let once = apply(&record, &patch);
        let twice = apply(&once, &patch);
        assert_eq!(once, twice);
        assert_eq!(once.summary.total_calories_consumed, 200.0);
    }

    #[test]
    fn test_disjoint_patches_commute_through_merge() {
        let mut record = DailyRecord::empty("2024-05-01");
        record.food_entries.push(food("a", 50.0));

        let p1 = RecordPatch {
            food_entries: Some(vec![food("b", 300.0)]),
            summary: Some(Summary::default()),
            ..Default::default()
        };
        let p2 = RecordPatch {
            weight: Some(Some(68.0)),
            daily_status: Some(Some(DailyStatus {
                mood: Some(4),
                ..Default::default()
            })),
            ..Default::default()
        };

        let sequential = apply(&apply(&record, &p1), &p2);
        let merged = apply(&record, &merge(&p1, &p2));
        assert_eq!(sequential, merged);

        // Order of disjoint patches does not matter either
        let reversed = apply(&apply(&record, &p2), &p1);
        assert_eq!(sequential, reversed);
    }

    #[test]
    fn test_merge_later_wins() {
        let p1 = RecordPatch {
            weight: Some(Some(70.0)),
            calculated_bmr: Some(Some(1500.0)),
            ..Default::default()
        };
        let p2 = RecordPatch {
            weight: Some(None),
            ..Default::default()
        };
        let merged = merge(&p1, &p2);
        assert_eq!(merged.weight, Some(None));
        assert_eq!(merged.calculated_bmr, Some(Some(1500.0)));
    }

    #[test]
    fn test_stale_summary_in_patch_is_replaced() {
        let record = DailyRecord::empty("2024-05-01");
        let patch = RecordPatch {
            food_entries: Some(vec![food("a", 250.0)]),
            summary: Some(Summary {
                total_calories_consumed: 9999.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(apply(&record, &patch).summary.total_calories_consumed, 250.0);
    }
}
