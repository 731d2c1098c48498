//! Basal and total daily energy expenditure.

use crate::types::{ActivityLevel, BmrFormula, DailyRecord, Gender, UserProfile};

use super::patch::{apply, RecordPatch};

/// BMR and TDEE in kcal/day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetabolicRates {
    pub bmr: f64,
    pub tdee: f64,
}

/// Day-specific overrides of the profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct DayInputs {
    pub weight: Option<f64>,
    pub activity_level: Option<ActivityLevel>,
    /// Extra TEF on top of the baseline already included in the activity factor
    pub additional_tef: Option<f64>,
}

/// Compute BMR/TDEE for a day. Returns `None` when the inputs cannot produce a
/// meaningful value (non-positive weight, height or age).
pub fn calculate_metabolic_rates(profile: &UserProfile, day: DayInputs) -> Option<MetabolicRates> {
    let weight = day.weight.unwrap_or(profile.weight);
    let height = profile.height;
    let age = f64::from(profile.age);

    if weight <= 0.0 || height <= 0.0 || age <= 0.0 {
        return None;
    }

    let bmr = match (profile.bmr_formula, profile.gender) {
        (BmrFormula::MifflinStJeor, Gender::Male) => 10.0 * weight + 6.25 * height - 5.0 * age + 5.0,
        (BmrFormula::MifflinStJeor, Gender::Female) => {
            10.0 * weight + 6.25 * height - 5.0 * age - 161.0
        }
        (BmrFormula::HarrisBenedict, Gender::Male) => {
            88.362 + 13.397 * weight + 4.799 * height - 5.677 * age
        }
        (BmrFormula::HarrisBenedict, Gender::Female) => {
            447.593 + 9.247 * weight + 3.098 * height - 4.330 * age
        }
    };

    let level = day.activity_level.unwrap_or(profile.activity_level);
    let tdee = bmr * level.multiplier() + day.additional_tef.unwrap_or(0.0);

    Some(MetabolicRates {
        bmr: round1(bmr),
        tdee: round1(tdee),
    })
}

/// Extend `patch` with BMR/TDEE for the record it produces from `record`.
///
/// Rates follow the day's weight and activity level (falling back to the
/// profile) plus any TEF above baseline. Rates that cannot be computed are
/// cleared.
pub fn with_metabolic_rates(
    profile: &UserProfile,
    record: &DailyRecord,
    mut patch: RecordPatch,
) -> RecordPatch {
    let next = apply(record, &patch);
    let rates = calculate_metabolic_rates(
        profile,
        DayInputs {
            weight: next.weight,
            activity_level: next.activity_level,
            additional_tef: next.tef_analysis.as_ref().map(|t| t.additional_tef()),
        },
    );
    patch.calculated_bmr = Some(rates.map(|r| r.bmr));
    patch.calculated_tdee = Some(rates.map(|r| r.tdee));
    patch
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
