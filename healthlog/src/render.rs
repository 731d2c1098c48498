//! Plain-text output for the CLI.

use healthlog_core::store::OutboxItem;
use healthlog_core::suggest::{GenerationProgress, SuggestionRecord};
use healthlog_core::{DailyRecord, PushOutcome, SyncReport, TefAnalysis};
use serde_json::Value;

pub fn print_record(record: &DailyRecord) {
    println!("Date: {}", record.date);

    let summary = &record.summary;
    println!(
        "  Calories: {:.0} in, {:.0} out, {:.0} net",
        summary.total_calories_consumed,
        summary.total_calories_burned,
        summary.total_calories_consumed - summary.total_calories_burned
    );
    println!(
        "  Macros: {:.1}g carbs, {:.1}g protein, {:.1}g fat",
        summary.macros.carbs, summary.macros.protein, summary.macros.fat
    );

    if let Some(weight) = record.weight {
        println!("  Weight: {:.1} kg", weight);
    }
    if let Some(level) = record.activity_level {
        println!("  Activity: {}", level);
    }
    if let (Some(bmr), Some(tdee)) = (record.calculated_bmr, record.calculated_tdee) {
        println!("  BMR: {:.0} kcal, TDEE: {:.0} kcal", bmr, tdee);
    }
    if let Some(tef) = &record.tef_analysis {
        println!(
            "  TEF: {:.1} kcal (x{:.2}, +{:.1} kcal)",
            tef.enhanced_tef,
            tef.enhancement_multiplier,
            tef.additional_tef()
        );
    }
    if let Some(status) = &record.daily_status {
        let scores: Vec<String> = [
            ("stress", status.stress),
            ("mood", status.mood),
            ("health", status.health),
            ("sleep", status.sleep_quality),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.map(|v| format!("{} {}", label, v)))
        .collect();
        if !scores.is_empty() {
            println!("  Status: {}", scores.join(", "));
        }
        if let Some(note) = &status.note {
            println!("  Note: {}", note);
        }
    }

    if !record.food_entries.is_empty() {
        println!("\nFood:");
        for entry in &record.food_entries {
            let pending = if entry.is_pending { " (parsing)" } else { "" };
            println!(
                "  {:<30} {:>6.0} g {:>6.0} kcal  [{}]{}",
                entry.food_name,
                entry.consumed_grams,
                entry.total_nutritional_info_consumed.calories,
                entry.log_id,
                pending
            );
        }
    }

    if !record.exercise_entries.is_empty() {
        println!("\nExercise:");
        for entry in &record.exercise_entries {
            let pending = if entry.is_pending { " (parsing)" } else { "" };
            println!(
                "  {:<30} {:>6.0} min {:>6.0} kcal  [{}]{}",
                entry.exercise_name,
                entry.duration_minutes,
                entry.calories_burned_estimated,
                entry.log_id,
                pending
            );
        }
    }

    if !record.has_content() {
        println!("\nNothing logged yet.");
    }
}

pub fn print_push(push: PushOutcome) {
    match push {
        PushOutcome::Sent => println!("Synced."),
        PushOutcome::Queued => println!("Saved locally; sync failed, change queued for retry."),
        PushOutcome::Disabled => {}
    }
}

pub fn print_sync_report(report: &SyncReport) {
    if report.skipped {
        println!("A sync is already running.");
        return;
    }
    println!("Sync complete:");
    println!("  Queued changes sent: {}", report.flushed);
    println!("  Still queued:        {}", report.still_queued);
    println!("  Records received:    {}", report.received);
    println!("  Days updated:        {}", report.updated.len());
}

pub fn print_outbox(items: &[OutboxItem]) {
    if items.is_empty() {
        println!("Outbox is empty.");
        return;
    }
    println!("{} queued change(s):", items.len());
    for item in items {
        println!(
            "  {}  attempts {}  queued {}{}",
            item.date,
            item.attempts,
            item.created_at.format("%Y-%m-%d %H:%M"),
            item.last_error
                .as_deref()
                .map(|e| format!("  last error: {}", e))
                .unwrap_or_default()
        );
    }
}

pub fn print_tef(analysis: &TefAnalysis) {
    println!("TEF analysis:");
    println!(
        "  Baseline:   {:.1} kcal ({:.1}% of intake)",
        analysis.base_tef, analysis.base_tef_percentage
    );
    println!("  Multiplier: x{:.2}", analysis.enhancement_multiplier);
    println!("  Enhanced:   {:.1} kcal", analysis.enhanced_tef);
    if !analysis.enhancement_factors.is_empty() {
        println!("  Factors:    {}", analysis.enhancement_factors.join(", "));
    }
}

/// One line describing generation progress, for the spinner.
pub fn progress_line(progress: &GenerationProgress) -> String {
    let categories: Vec<String> = progress
        .categories
        .iter()
        .map(|(key, state)| format!("{} {}", key, state.status.as_str()))
        .collect();
    match &progress.message {
        Some(message) if categories.is_empty() => message.clone(),
        Some(message) => format!("{} ({})", message, categories.join(", ")),
        None => categories.join(", "),
    }
}

fn suggestion_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => ["title", "text", "suggestion", "description"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

pub fn print_suggestions(record: &SuggestionRecord) {
    if record.suggestions.is_empty() {
        println!("No suggestions for {}.", record.data_date);
        return;
    }
    println!(
        "Suggestions for {} (generated {}):",
        record.data_date,
        record.generated_at.format("%Y-%m-%d %H:%M")
    );
    for category in &record.suggestions {
        println!("\n[{}] {}", category.priority, category.category);
        println!("  {}", category.summary);
        for suggestion in &category.suggestions {
            println!("  - {}", suggestion_text(suggestion));
        }
    }
}
