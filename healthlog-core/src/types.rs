//! Core domain types for healthlog
//!
//! These types mirror the JSON shape shared with the sync server, so field
//! names are renamed where the wire format differs from Rust conventions.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **DailyRecord** | Everything logged for one calendar day, keyed by `YYYY-MM-DD` |
//! | **Entry** | A food or exercise item inside a record |
//! | **Placeholder** | A speculative entry shown while a parse request is in flight |
//! | **Summary** | Totals derived from the entry lists; never edited directly |
//! | **TEF** | Thermic effect of food, the energy spent digesting a day's intake |

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Prefix carried by placeholder ids.
pub const PLACEHOLDER_ID_PREFIX: &str = "pending-";

// ============================================
// Dates
// ============================================

/// Format a date as the record key (`YYYY-MM-DD`).
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse and validate a record key.
pub fn parse_date_key(key: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d")
        .map_err(|e| Error::Validation(format!("invalid date key {:?}: {}", key, e)))
}

/// Today's record key in local time.
pub fn today_key() -> String {
    date_key(chrono::Local::now().date_naive())
}

// ============================================
// Entries
// ============================================

/// The two entry lists of a record. Also the unit of submission concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Food,
    Exercise,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Food => "food",
            EntryKind::Exercise => "exercise",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "food" => Ok(EntryKind::Food),
            "exercise" => Ok(EntryKind::Exercise),
            _ => Err(format!("unknown entry kind: {}", s)),
        }
    }
}

/// Nutrient amounts. The four macro fields are always present; anything else
/// the parser returns (fiber, sodium, ...) lands in `other`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NutritionInfo {
    #[serde(default)]
    pub calories: f64,
    #[serde(default)]
    pub carbohydrates: f64,
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub fat: f64,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A food item as returned by the parse endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodEntry {
    #[serde(default)]
    pub log_id: String,
    pub food_name: String,
    #[serde(default)]
    pub consumed_grams: f64,
    #[serde(default)]
    pub meal_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_period: Option<String>,
    #[serde(default)]
    pub nutritional_info_per_100g: NutritionInfo,
    #[serde(default)]
    pub total_nutritional_info_consumed: NutritionInfo,
    #[serde(default)]
    pub is_estimated: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_pending: bool,
}

/// An exercise item as returned by the parse endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseEntry {
    #[serde(default)]
    pub log_id: String,
    pub exercise_name: String,
    #[serde(default = "default_exercise_type")]
    pub exercise_type: String,
    #[serde(default)]
    pub duration_minutes: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sets: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub estimated_mets: f64,
    #[serde(default)]
    pub user_weight: f64,
    #[serde(default)]
    pub calories_burned_estimated: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub muscle_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_estimated: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_pending: bool,
}

fn default_exercise_type() -> String {
    "other".to_string()
}

impl FoodEntry {
    /// Zero-nutrition stand-in shown while a parse is in flight.
    pub fn placeholder(temp_id: &str, text: &str) -> Self {
        Self {
            log_id: temp_id.to_string(),
            food_name: placeholder_label(text),
            consumed_grams: 0.0,
            meal_type: None,
            time_period: None,
            nutritional_info_per_100g: NutritionInfo::default(),
            total_nutritional_info_consumed: NutritionInfo::default(),
            is_estimated: true,
            is_pending: true,
        }
    }
}

impl ExerciseEntry {
    /// Zero-burn stand-in shown while a parse is in flight.
    pub fn placeholder(temp_id: &str, text: &str, user_weight: f64) -> Self {
        Self {
            log_id: temp_id.to_string(),
            exercise_name: placeholder_label(text),
            exercise_type: default_exercise_type(),
            duration_minutes: 0.0,
            distance_km: None,
            sets: None,
            reps: None,
            weight_kg: None,
            estimated_mets: 1.0,
            user_weight,
            calories_burned_estimated: 0.0,
            muscle_groups: Vec::new(),
            notes: None,
            is_estimated: true,
            is_pending: true,
        }
    }
}

fn placeholder_label(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        "Parsing…".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Create a fresh temporary id for a placeholder.
pub fn placeholder_id() -> String {
    format!("{}{}", PLACEHOLDER_ID_PREFIX, uuid::Uuid::new_v4())
}

/// Create a fresh permanent entry id.
pub fn entry_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================
// Derived values
// ============================================

/// Macro totals in grams.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Macros {
    pub carbs: f64,
    pub protein: f64,
    pub fat: f64,
}

/// Totals derived from the entry lists. See [`crate::record::summary`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_calories_consumed: f64,
    pub total_calories_burned: f64,
    pub macros: Macros,
    #[serde(default)]
    pub micronutrients: BTreeMap<String, f64>,
}

/// Thermic-effect-of-food analysis for one day's food entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TefAnalysis {
    #[serde(rename = "baseTEF")]
    pub base_tef: f64,
    #[serde(rename = "baseTEFPercentage")]
    pub base_tef_percentage: f64,
    pub enhancement_multiplier: f64,
    #[serde(rename = "enhancedTEF")]
    pub enhanced_tef: f64,
    #[serde(default)]
    pub enhancement_factors: Vec<String>,
    pub analysis_timestamp: DateTime<Utc>,
}

impl TefAnalysis {
    /// Energy added on top of the baseline TEF already folded into TDEE.
    pub fn additional_tef(&self) -> f64 {
        self.enhanced_tef - self.base_tef
    }
}

/// Self-reported wellbeing for the day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_quality: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bed_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

// ============================================
// Profile
// ============================================

/// Physical activity level, used as the TDEE multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Sedentary,
    Light,
    #[default]
    Moderate,
    Active,
    VeryActive,
}

impl ActivityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityLevel::Sedentary => "sedentary",
            ActivityLevel::Light => "light",
            ActivityLevel::Moderate => "moderate",
            ActivityLevel::Active => "active",
            ActivityLevel::VeryActive => "very_active",
        }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            ActivityLevel::Sedentary => 1.2,
            ActivityLevel::Light => 1.375,
            ActivityLevel::Moderate => 1.55,
            ActivityLevel::Active => 1.725,
            ActivityLevel::VeryActive => 1.9,
        }
    }
}

impl std::fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ActivityLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sedentary" => Ok(ActivityLevel::Sedentary),
            "light" => Ok(ActivityLevel::Light),
            "moderate" => Ok(ActivityLevel::Moderate),
            "active" => Ok(ActivityLevel::Active),
            "very_active" => Ok(ActivityLevel::VeryActive),
            _ => Err(format!("unknown activity level: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[default]
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    LoseWeight,
    #[default]
    Maintain,
    GainWeight,
}

/// Which BMR equation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BmrFormula {
    #[default]
    MifflinStJeor,
    HarrisBenedict,
}

/// The user's body data and preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Kilograms
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Centimetres
    #[serde(default = "default_height")]
    pub height: f64,
    #[serde(default = "default_age")]
    pub age: u32,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default, alias = "activity_level")]
    pub activity_level: ActivityLevel,
    #[serde(default)]
    pub goal: Goal,
    #[serde(default, alias = "bmr_formula")]
    pub bmr_formula: BmrFormula,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            weight: default_weight(),
            height: default_height(),
            age: default_age(),
            gender: Gender::default(),
            activity_level: ActivityLevel::default(),
            goal: Goal::default(),
            bmr_formula: BmrFormula::default(),
        }
    }
}

fn default_weight() -> f64 {
    70.0
}

fn default_height() -> f64 {
    170.0
}

fn default_age() -> u32 {
    30
}

// ============================================
// DailyRecord
// ============================================

/// Everything logged for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRecord {
    pub date: String,
    #[serde(default)]
    pub food_entries: Vec<FoodEntry>,
    #[serde(default)]
    pub exercise_entries: Vec<ExerciseEntry>,
    #[serde(default)]
    pub summary: Summary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_level: Option<ActivityLevel>,
    #[serde(
        rename = "calculatedBMR",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub calculated_bmr: Option<f64>,
    #[serde(
        rename = "calculatedTDEE",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub calculated_tdee: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tef_analysis: Option<TefAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_status: Option<DailyStatus>,
    #[serde(
        rename = "last_modified",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_modified: Option<DateTime<Utc>>,
}

impl DailyRecord {
    /// An empty record for `date`.
    pub fn empty(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            food_entries: Vec::new(),
            exercise_entries: Vec::new(),
            summary: Summary::default(),
            weight: None,
            activity_level: None,
            calculated_bmr: None,
            calculated_tdee: None,
            tef_analysis: None,
            daily_status: None,
            last_modified: None,
        }
    }

    /// Whether any entry or day-level value has been recorded.
    pub fn has_content(&self) -> bool {
        !self.food_entries.is_empty()
            || !self.exercise_entries.is_empty()
            || self.weight.is_some()
            || self.daily_status.is_some()
            || self.calculated_bmr.is_some()
            || self.calculated_tdee.is_some()
            || self.tef_analysis.is_some()
    }

    /// Whether either entry list is non-empty.
    pub fn has_entries(&self) -> bool {
        !self.food_entries.is_empty() || !self.exercise_entries.is_empty()
    }

    /// Drop every placeholder entry.
    pub fn strip_placeholders(&mut self) {
        self.food_entries.retain(|e| !e.is_pending);
        self.exercise_entries.retain(|e| !e.is_pending);
    }

    /// Copy of this record without placeholders.
    pub fn without_placeholders(&self) -> Self {
        let mut clean = self.clone();
        clean.strip_placeholders();
        clean
    }

    /// Number of placeholder entries in the list for `kind`.
    pub fn placeholder_count(&self, kind: EntryKind) -> usize {
        match kind {
            EntryKind::Food => self.food_entries.iter().filter(|e| e.is_pending).count(),
            EntryKind::Exercise => self
                .exercise_entries
                .iter()
                .filter(|e| e.is_pending)
                .count(),
        }
    }

    /// Remove the entry with `log_id` from the list for `kind`.
    ///
    /// Returns true if an entry was removed.
    pub fn remove_entry(&mut self, kind: EntryKind, log_id: &str) -> bool {
        match kind {
            EntryKind::Food => {
                let before = self.food_entries.len();
                self.food_entries.retain(|e| e.log_id != log_id);
                before != self.food_entries.len()
            }
            EntryKind::Exercise => {
                let before = self.exercise_entries.len();
                self.exercise_entries.retain(|e| e.log_id != log_id);
                before != self.exercise_entries.len()
            }
        }
    }
}
