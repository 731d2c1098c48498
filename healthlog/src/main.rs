//! healthlog - offline-first food and exercise log
//!
//! Every change is written to the local database first and pushed to the
//! sync server (when configured) afterwards. Failed pushes stay in the outbox
//! until the next `healthlog sync`.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/healthlog/data.db (~/.local/share/healthlog/data.db)
//! - Logs: $XDG_STATE_HOME/healthlog/healthlog.YYYY-MM-DD.log (~/.local/state/healthlog/)
//! - Config: $XDG_CONFIG_HOME/healthlog/config.toml (~/.config/healthlog/config.toml)

mod app;
mod render;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use healthlog_core::analysis::TefTrigger;
use healthlog_core::store::{LocalStore, OutboxStore, SuggestionStore};
use healthlog_core::{
    parse_date_key, today_key, ActivityLevel, Config, DailyRecord, DailyStatus, DailyTracker, EntryKind,
};
use indicatif::{ProgressBar, ProgressStyle};

use crate::app::App;

#[derive(Parser)]
#[command(name = "healthlog")]
#[command(about = "Offline-first food and exercise log")]
#[command(version)]
struct Args {
    /// Day to work on (YYYY-MM-DD), defaults to today
    #[arg(short, long, global = true)]
    date: Option<String>,

    /// Print records as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the day's entries and totals
    Status,

    /// Describe food or exercise in plain words and log the parsed entries
    Log {
        /// food or exercise
        kind: EntryKind,
        /// What you ate or did, e.g. "2 eggs and toast"
        text: Vec<String>,
        /// Photo of the meal (repeatable)
        #[arg(short, long = "image")]
        images: Vec<PathBuf>,
    },

    /// Remove an entry by id
    Delete {
        kind: EntryKind,
        log_id: String,
    },

    /// Set the day's weight in kilograms
    Weight {
        kg: Option<f64>,
        /// Clear the weight instead
        #[arg(long, conflicts_with = "kg")]
        clear: bool,
    },

    /// Set the day's activity level
    Activity {
        /// sedentary, light, moderate, active or very_active
        level: Option<ActivityLevel>,
        #[arg(long, conflicts_with = "level")]
        clear: bool,
    },

    /// Record how the day felt (scores 1-5)
    Wellbeing {
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        stress: Option<u8>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        mood: Option<u8>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        health: Option<u8>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        sleep: Option<u8>,
        #[arg(long)]
        note: Option<String>,
    },

    /// Send queued changes and pull remote records
    Sync {
        /// Pull every record even if the server thinks nothing changed
        #[arg(long)]
        force: bool,
    },

    /// Generate suggestions for the day
    Suggest {
        /// Show the last stored suggestions without generating
        #[arg(long)]
        cached: bool,
    },

    /// Analyze the thermic effect of the day's food
    Tef {
        /// Wait out the debounce period instead of analyzing right away
        #[arg(long)]
        debounced: bool,
    },

    /// List days with logged content
    Dates,

    /// Show changes waiting to be synced
    Outbox,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        healthlog_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let date = match &args.date {
        Some(date) => {
            parse_date_key(date).with_context(|| format!("invalid date {:?}", date))?;
            date.clone()
        }
        None => today_key(),
    };

    tracing::info!(date = %date, "healthlog starting");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let result = runtime.block_on(async {
        let app = App::open(config, &date)?;
        run(&app, &args, &date).await
    });

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }
    result
}

async fn run(app: &App, args: &Args, date: &str) -> Result<()> {
    let tracker = &app.tracker;

    match &args.command {
        Command::Status => {
            let record = open_day(tracker, date).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                render::print_record(&record);
            }
        }

        Command::Log { kind, text, images } => {
            let submissions = app
                .submissions
                .as_ref()
                .context("AI parsing is not configured (set ai.server_url)")?;
            open_day(tracker, date).await?;

            let images = app::load_images(images)?;
            let text = text.join(" ");
            let weight = tracker
                .live()
                .snapshot()
                .await
                .weight
                .unwrap_or(app.config.profile.weight);

            let spinner = spinner(format!("Parsing {}...", kind));
            let outcome = submissions.submit(date, *kind, &text, images, weight).await;
            spinner.finish_and_clear();
            let outcome = outcome?;

            println!("Logged {} {} entr{}.", outcome.added, kind, if outcome.added == 1 { "y" } else { "ies" });
            render::print_push(outcome.push);

            if *kind == EntryKind::Food {
                note_food_changed(app, date).await;
            }
            print_or_json(args.json, &outcome.record)?;
        }

        Command::Delete { kind, log_id } => {
            open_day(tracker, date).await?;
            let deleted = tracker.delete_entry(date, *kind, log_id).await?;
            println!("Deleted {} entry {}.", kind, log_id);
            render::print_push(deleted.push);
            if let Some(follow_up) = deleted.follow_up {
                let sync = &app.config.sync;
                let limit = sync.post_delete_pull_delay() + Duration::from_secs(sync.timeout_secs);
                if !app::await_follow_up(follow_up, limit).await {
                    tracing::warn!(date, "Follow-up pull did not finish in time");
                }
            }
            if *kind == EntryKind::Food {
                note_food_changed(app, date).await;
            }
            print_or_json(args.json, &deleted.record)?;
        }

        Command::Weight { kg, clear } => {
            if kg.is_none() && !clear {
                anyhow::bail!("give a weight in kilograms or --clear");
            }
            open_day(tracker, date).await?;
            let (record, push) = tracker.set_weight(date, *kg).await?;
            render::print_push(push);
            print_or_json(args.json, &record)?;
        }

        Command::Activity { level, clear } => {
            if level.is_none() && !clear {
                anyhow::bail!("give an activity level or --clear");
            }
            open_day(tracker, date).await?;
            let (record, push) = tracker.set_activity_level(date, *level).await?;
            render::print_push(push);
            print_or_json(args.json, &record)?;
        }

        Command::Wellbeing {
            stress,
            mood,
            health,
            sleep,
            note,
        } => {
            open_day(tracker, date).await?;
            let mut status = tracker.live().snapshot().await.daily_status.unwrap_or_default();
            status.stress = stress.or(status.stress);
            status.mood = mood.or(status.mood);
            status.health = health.or(status.health);
            status.sleep_quality = sleep.or(status.sleep_quality);
            if note.is_some() {
                status.note = note.clone();
            }
            let status = (status != DailyStatus::default()).then_some(status);
            let (record, push) = tracker.set_daily_status(date, status).await?;
            render::print_push(push);
            print_or_json(args.json, &record)?;
        }

        Command::Sync { force } => {
            if !tracker.sync().is_enabled() {
                println!("Sync is not configured (set sync.enabled, sync.server_url and sync.api_key).");
                return Ok(());
            }
            let spinner = spinner("Syncing...".to_string());
            let report = tracker.sync().sync_all(*force).await;
            spinner.finish_and_clear();
            let report = report?;
            render::print_sync_report(&report);
            tracker.refresh_recorded_dates().await?;
        }

        Command::Suggest { cached } => {
            if *cached {
                match app.store.load_suggestions(date).await? {
                    Some(record) => render::print_suggestions(&record),
                    None => println!("No stored suggestions for {}.", date),
                }
                return Ok(());
            }

            let aggregator = app
                .suggestions
                .as_ref()
                .context("AI suggestions are not configured (set ai.server_url)")?;

            let spinner = spinner("Preparing data...".to_string());
            let mut progress = aggregator.subscribe_progress();
            let watcher = {
                let spinner = spinner.clone();
                tokio::spawn(async move {
                    while progress.changed().await.is_ok() {
                        let line = render::progress_line(&progress.borrow_and_update());
                        spinner.set_message(line);
                    }
                })
            };

            let result = aggregator.generate(date).await;
            watcher.abort();
            spinner.finish_and_clear();

            let record = result?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                render::print_suggestions(&record);
            }
        }

        Command::Tef { debounced } => {
            let analyzer = app
                .tef
                .as_ref()
                .context("TEF analysis is not configured (set ai.server_url)")?;
            open_day(tracker, date).await?;

            if *debounced {
                let before = analysis_time(app).await;
                match analyzer.on_entries_changed(date).await? {
                    TefTrigger::Scheduled(delay) => {
                        let spinner = spinner(format!("Analysis starts in {}s", delay.as_secs()));
                        while analyzer.is_scheduled() {
                            spinner.set_message(format!(
                                "Analysis starts in {}s",
                                analyzer.countdown_secs()
                            ));
                            tokio::time::sleep(Duration::from_millis(250)).await;
                        }

                        // The analysis runs detached once the countdown ends
                        spinner.set_message("Analyzing...");
                        let ai = &app.config.ai;
                        let limit = ai.request_timeout() * (ai.max_retries + 1) + ai.retry_backoff() * ai.max_retries * ai.max_retries;
                        let finished = tokio::time::timeout(limit, async {
                            while analysis_time(app).await == before {
                                tokio::time::sleep(Duration::from_millis(250)).await;
                            }
                        })
                        .await;
                        spinner.finish_and_clear();
                        if finished.is_err() {
                            anyhow::bail!("TEF analysis did not finish; see the log for details");
                        }
                    }
                    other => println!("No new analysis ({:?}).", other),
                }
            } else {
                let spinner = spinner("Analyzing...".to_string());
                let analysis = analyzer.analyze_now(date).await;
                spinner.finish_and_clear();
                analysis?;
            }

            match tracker.live().snapshot().await.tef_analysis {
                Some(analysis) => render::print_tef(&analysis),
                None => println!("No TEF analysis for {}.", date),
            }
        }

        Command::Dates => {
            let count = tracker.refresh_recorded_dates().await?;
            if args.json {
                println!("{}", serde_json::to_string(&tracker.recorded_dates())?);
            } else if count == 0 {
                println!("No days recorded yet.");
            } else {
                for day in tracker.recorded_dates() {
                    println!("{}", day);
                }
            }
        }

        Command::Outbox => {
            app.store.wait_for_ready().await?;
            let items = app.store.pending().await?;
            render::print_outbox(&items);
        }
    }

    Ok(())
}

/// Select `date` and wait out the automatic pull of an empty day, so the
/// command works on whatever the server already had.
async fn open_day(tracker: &DailyTracker, date: &str) -> Result<DailyRecord> {
    let loaded = tracker.select_date(date).await?;
    if let Some(pull) = loaded.auto_pull {
        match pull.await {
            Ok(Ok(report)) => tracing::debug!(updated = report.updated.len(), "Automatic pull finished"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Automatic pull failed"),
            Err(e) => tracing::warn!(error = %e, "Automatic pull aborted"),
        }
    }
    Ok(tracker.live().snapshot().await)
}

async fn analysis_time(app: &App) -> Option<chrono::DateTime<chrono::Utc>> {
    app.tracker
        .live()
        .snapshot()
        .await
        .tef_analysis
        .map(|a| a.analysis_timestamp)
}

/// Let the TEF analyzer know the day's food changed.
async fn note_food_changed(app: &App, date: &str) {
    let Some(analyzer) = &app.tef else {
        return;
    };
    match analyzer.on_entries_changed(date).await {
        Ok(TefTrigger::Scheduled(delay)) => {
            println!(
                "TEF analysis due in {}s; run `healthlog tef` to analyze now.",
                delay.as_secs()
            );
        }
        Ok(trigger) => tracing::debug!(?trigger, "TEF not rescheduled"),
        Err(e) => tracing::warn!(error = %e, "TEF update failed"),
    }
}

fn print_or_json(json: bool, record: &DailyRecord) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
    } else {
        println!();
        render::print_record(record);
    }
    Ok(())
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
