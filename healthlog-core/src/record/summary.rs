//! Summary recomputation.

use std::collections::BTreeMap;

use crate::types::{ExerciseEntry, FoodEntry, Macros, Summary};

/// Derive the day's totals from its entry lists.
///
/// Macros come from each food's consumed nutrition. Every other numeric key on
/// that nutrition object is accumulated into `micronutrients`. Placeholders
/// contribute zeros, so they never skew the totals.
pub fn recompute_summary(food: &[FoodEntry], exercise: &[ExerciseEntry]) -> Summary {
    let mut calories = 0.0;
    let mut carbs = 0.0;
    let mut protein = 0.0;
    let mut fat = 0.0;
    let mut micronutrients: BTreeMap<String, f64> = BTreeMap::new();

    for entry in food {
        let consumed = &entry.total_nutritional_info_consumed;
        calories += consumed.calories;
        carbs += consumed.carbohydrates;
        protein += consumed.protein;
        fat += consumed.fat;

        for (key, value) in &consumed.other {
            if let Some(amount) = value.as_f64() {
                *micronutrients.entry(key.clone()).or_insert(0.0) += amount;
            }
        }
    }

    let burned = exercise.iter().map(|e| e.calories_burned_estimated).sum();

    Summary {
        total_calories_consumed: calories,
        total_calories_burned: burned,
        macros: Macros {
            carbs,
            protein,
            fat,
        },
        micronutrients,
    }
}
