//! Thermic effect of food from macros.

use chrono::{DateTime, Utc};

use crate::types::{FoodEntry, TefAnalysis};

/// Share of each macro's energy spent on digestion.
const PROTEIN_TEF: f64 = 0.25;
const CARB_TEF: f64 = 0.075;
const FAT_TEF: f64 = 0.015;

const PROTEIN_KCAL_PER_G: f64 = 4.0;
const CARB_KCAL_PER_G: f64 = 4.0;
const FAT_KCAL_PER_G: f64 = 9.0;

/// Keywords that hint at a higher thermic effect, and the factor they name.
const FACTOR_KEYWORDS: &[(&[&str], &str)] = &[
    (&["chili", "chilli", "jalapeno", "cayenne", "spicy", "hot sauce", "sriracha"], "Capsaicin (spicy food)"),
    (&["coffee", "espresso", "latte", "americano", "cappuccino"], "Caffeine"),
    (&["green tea", "matcha", "oolong"], "Catechins (green tea)"),
    (&["ginger"], "Gingerol (ginger)"),
    (&["cinnamon"], "Cinnamon"),
    (&["vinegar"], "Acetic acid (vinegar)"),
    (&["mustard", "wasabi", "horseradish"], "Isothiocyanates (mustard, wasabi)"),
];

/// Extra factor named when protein supplies a large share of the energy.
const HIGH_PROTEIN_SHARE: f64 = 0.3;

fn counted(entries: &[FoodEntry]) -> impl Iterator<Item = &FoodEntry> {
    entries.iter().filter(|e| !e.is_pending)
}

/// Baseline TEF in kcal and total energy in kcal.
pub fn base_tef(entries: &[FoodEntry]) -> (f64, f64) {
    let mut protein = 0.0;
    let mut carbs = 0.0;
    let mut fat = 0.0;
    let mut calories = 0.0;
    for entry in counted(entries) {
        let info = &entry.total_nutritional_info_consumed;
        protein += info.protein;
        carbs += info.carbohydrates;
        fat += info.fat;
        calories += info.calories;
    }

    let tef = protein * PROTEIN_KCAL_PER_G * PROTEIN_TEF
        + carbs * CARB_KCAL_PER_G * CARB_TEF
        + fat * FAT_KCAL_PER_G * FAT_TEF;
    (tef, calories)
}

/// Factors detected from food names and macro balance.
pub fn detect_factors(entries: &[FoodEntry]) -> Vec<String> {
    let mut factors: Vec<String> = Vec::new();
    for entry in counted(entries) {
        let name = entry.food_name.to_lowercase();
        for (keywords, factor) in FACTOR_KEYWORDS {
            if keywords.iter().any(|k| name.contains(k)) && !factors.iter().any(|f| f == factor) {
                factors.push(factor.to_string());
            }
        }
    }

    let protein_kcal: f64 = counted(entries)
        .map(|e| e.total_nutritional_info_consumed.protein * PROTEIN_KCAL_PER_G)
        .sum();
    let (_, calories) = base_tef(entries);
    if calories > 0.0 && protein_kcal / calories >= HIGH_PROTEIN_SHARE {
        factors.push("High protein share".to_string());
    }
    factors
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Combine the local baseline with an enhancement multiplier.
///
/// `factors` wins when non-empty; otherwise locally detected factors are used.
pub fn build_analysis(
    entries: &[FoodEntry],
    multiplier: f64,
    factors: Vec<String>,
    timestamp: Option<DateTime<Utc>>,
) -> TefAnalysis {
    let (base, calories) = base_tef(entries);
    let multiplier = if multiplier.is_finite() && multiplier > 0.0 {
        multiplier
    } else {
        1.0
    };
    let percentage = if calories > 0.0 {
        base / calories * 100.0
    } else {
        0.0
    };
    let factors = if factors.is_empty() {
        detect_factors(entries)
    } else {
        factors
    };

    TefAnalysis {
        base_tef: round1(base),
        base_tef_percentage: round1(percentage),
        enhancement_multiplier: multiplier,
        enhanced_tef: round1(base * multiplier),
        enhancement_factors: factors,
        analysis_timestamp: timestamp.unwrap_or_else(Utc::now),
    }
}
