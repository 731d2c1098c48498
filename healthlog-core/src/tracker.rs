//! The selected day
//!
//! [`DailyTracker`] owns date selection and everything that edits a day
//! outside of submissions: loads (with the one-shot automatic pull for empty
//! days), refresh handling, day-level fields, entry edits and deletes, and the
//! index of dates that have anything recorded.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::record::{with_metabolic_rates, LiveRecord, RecordPatch};
use crate::sync::{PushOutcome, RefreshSource, SyncReconciler, SyncReport};
use crate::types::{
    ActivityLevel, DailyRecord, DailyStatus, EntryKind, ExerciseEntry, FoodEntry, UserProfile,
};

/// Result of loading a date.
pub struct Loaded {
    /// The installed snapshot; `None` when the selection moved on meanwhile
    pub record: Option<DailyRecord>,
    /// Background full pull started because the day was empty
    pub auto_pull: Option<JoinHandle<Result<SyncReport>>>,
}

/// A replacement for an existing entry.
#[derive(Debug, Clone)]
pub enum EntryUpdate {
    Food(FoodEntry),
    Exercise(ExerciseEntry),
}

impl EntryUpdate {
    pub fn kind(&self) -> EntryKind {
        match self {
            EntryUpdate::Food(_) => EntryKind::Food,
            EntryUpdate::Exercise(_) => EntryKind::Exercise,
        }
    }
}

/// Result of deleting an entry.
pub struct Deleted {
    pub record: DailyRecord,
    pub push: PushOutcome,
    /// Follow-up pull for cross-device convergence
    pub follow_up: Option<JoinHandle<()>>,
}

pub struct DailyTracker {
    live: Arc<LiveRecord>,
    sync: Arc<SyncReconciler>,
    profile: UserProfile,
    config: SyncConfig,
    recorded: Mutex<BTreeSet<String>>,
}

impl DailyTracker {
    pub fn new(
        live: Arc<LiveRecord>,
        sync: Arc<SyncReconciler>,
        profile: UserProfile,
        config: SyncConfig,
    ) -> Self {
        Self {
            live,
            sync,
            profile,
            config,
            recorded: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn live(&self) -> &Arc<LiveRecord> {
        &self.live
    }

    pub fn sync(&self) -> &Arc<SyncReconciler> {
        &self.sync
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    /// Switch to `date` and load it.
    pub async fn select_date(&self, date: &str) -> Result<Loaded> {
        crate::types::parse_date_key(date)?;
        self.live.select(date).await;
        self.load(date).await
    }

    /// Load `date` from the store into the live record.
    ///
    /// A day with nothing stored triggers one full pull (per date, until a
    /// non-empty load re-arms it). When the pull brings the day in, it is
    /// installed into the live record before the handle resolves.
    pub async fn load(&self, date: &str) -> Result<Loaded> {
        let store = self.live.store();
        store.wait_for_ready().await?;
        let stored = store.get(date).await?;
        let has_content = stored.as_ref().is_some_and(DailyRecord::has_content);

        let installed = match stored {
            Some(record) => self.live.install_if_current(record).await,
            None => self.live.date().await == date,
        };
        if !installed {
            return Ok(Loaded {
                record: None,
                auto_pull: None,
            });
        }

        self.sync.note_loaded(has_content);
        self.note_recorded(date, has_content);

        let auto_pull = if !has_content && self.sync.claim_auto_pull(date) {
            tracing::info!(date, "Nothing stored locally, pulling from server");
            let sync = Arc::clone(&self.sync);
            let live = Arc::clone(&self.live);
            let date = date.to_string();
            Some(tokio::spawn(async move {
                let report = sync.sync_all(true).await?;
                if report.updated.contains(&date) && live.reload_if_current(&date).await? {
                    tracing::debug!(date = %date, "Installed pulled record");
                }
                Ok(report)
            }))
        } else {
            None
        };

        Ok(Loaded {
            record: Some(self.live.snapshot().await),
            auto_pull,
        })
    }

    /// React to refresh signals until the bus closes.
    ///
    /// Signals for the selected date reload it after `refresh_delay`, which
    /// gives the store time to settle (a heuristic, not a guarantee). Cloud
    /// syncs also refresh the recorded-dates index.
    pub fn spawn_refresh_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut rx = self.sync.bus().subscribe();
        tokio::spawn(async move {
            loop {
                let signal = match rx.recv().await {
                    Ok(signal) => signal,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Refresh listener lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                if signal.date == this.live.date().await {
                    let tracker = Arc::clone(&this);
                    let date = signal.date.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(tracker.config.refresh_delay()).await;
                        if let Err(e) = tracker.load(&date).await {
                            tracing::warn!(date = %date, error = %e, "Refresh reload failed");
                        }
                    });
                }

                if signal.source == RefreshSource::CloudSync {
                    let tracker = Arc::clone(&this);
                    tokio::spawn(async move {
                        tokio::time::sleep(tracker.config.calendar_refresh_delay()).await;
                        if let Err(e) = tracker.refresh_recorded_dates().await {
                            tracing::warn!(error = %e, "Recorded dates refresh failed");
                        }
                    });
                }
            }
        })
    }

    /// Apply `patch` to `date`, persist and push it.
    pub async fn apply_patch(&self, date: &str, patch: RecordPatch) -> Result<(DailyRecord, PushOutcome)> {
        let (record, stamped) = self.live.update(date, move |_| patch).await?;
        self.finish_write(date, record, stamped).await
    }

    /// Patch plus BMR/TDEE recomputed for the resulting record.
    async fn apply_with_rates(&self, date: &str, patch: RecordPatch) -> Result<(DailyRecord, PushOutcome)> {
        let profile = &self.profile;
        let (record, stamped) = self
            .live
            .update(date, |record| with_metabolic_rates(profile, record, patch))
            .await?;
        self.finish_write(date, record, stamped).await
    }

    /// Index, announce and push a persisted field edit.
    async fn finish_write(
        &self,
        date: &str,
        record: DailyRecord,
        stamped: RecordPatch,
    ) -> Result<(DailyRecord, PushOutcome)> {
        self.note_recorded(date, record.has_content());
        if self.live.date().await != date {
            // Stored copy changed behind the selection
            self.sync.bus().emit(date, RefreshSource::Local);
        }
        let push = self.sync.push(date, &stamped).await;
        Ok((record, push))
    }

    /// Set or clear the day's weight in kilograms.
    pub async fn set_weight(&self, date: &str, weight: Option<f64>) -> Result<(DailyRecord, PushOutcome)> {
        if let Some(w) = weight {
            if !w.is_finite() || w <= 0.0 {
                return Err(Error::Validation(format!("invalid weight: {}", w)));
            }
        }
        self.apply_with_rates(
            date,
            RecordPatch {
                weight: Some(weight),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_activity_level(
        &self,
        date: &str,
        level: Option<ActivityLevel>,
    ) -> Result<(DailyRecord, PushOutcome)> {
        self.apply_with_rates(
            date,
            RecordPatch {
                activity_level: Some(level),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_daily_status(
        &self,
        date: &str,
        status: Option<DailyStatus>,
    ) -> Result<(DailyRecord, PushOutcome)> {
        self.apply_patch(
            date,
            RecordPatch {
                daily_status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    /// Replace the entry `log_id` in place, keeping its position and id.
    pub async fn update_entry(
        &self,
        date: &str,
        log_id: &str,
        update: EntryUpdate,
    ) -> Result<(DailyRecord, PushOutcome)> {
        let mut found = false;
        let (record, _) = self
            .live
            .update(date, |record| {
                let mut patch = RecordPatch::default();
                match update {
                    EntryUpdate::Food(mut entry) => {
                        entry.log_id = log_id.to_string();
                        entry.is_pending = false;
                        let mut food = record.food_entries.clone();
                        if let Some(slot) = food.iter_mut().find(|e| e.log_id == log_id && !e.is_pending) {
                            *slot = entry;
                            found = true;
                            patch.food_entries = Some(food);
                        }
                    }
                    EntryUpdate::Exercise(mut entry) => {
                        entry.log_id = log_id.to_string();
                        entry.is_pending = false;
                        let mut exercise = record.exercise_entries.clone();
                        if let Some(slot) = exercise
                            .iter_mut()
                            .find(|e| e.log_id == log_id && !e.is_pending)
                        {
                            *slot = entry;
                            found = true;
                            patch.exercise_entries = Some(exercise);
                        }
                    }
                }
                patch
            })
            .await?;

        if !found {
            return Err(Error::Validation(format!("no entry {} on {}", log_id, date)));
        }
        let push = self
            .sync
            .push(date, &RecordPatch::entries_of(&record.without_placeholders()))
            .await;
        Ok((record, push))
    }

    /// Remove an entry, push the lists, announce the delete and schedule a
    /// follow-up pull.
    pub async fn delete_entry(&self, date: &str, kind: EntryKind, log_id: &str) -> Result<Deleted> {
        let mut found = false;
        let (record, _) = self
            .live
            .update(date, |record| {
                let mut next = record.clone();
                found = next.remove_entry(kind, log_id);
                match kind {
                    EntryKind::Food if found => RecordPatch {
                        food_entries: Some(next.food_entries),
                        ..Default::default()
                    },
                    EntryKind::Exercise if found => RecordPatch {
                        exercise_entries: Some(next.exercise_entries),
                        ..Default::default()
                    },
                    _ => RecordPatch::default(),
                }
            })
            .await?;

        if !found {
            return Err(Error::Validation(format!("no {} entry {} on {}", kind, log_id, date)));
        }
        self.note_recorded(date, record.has_content());

        let push = self
            .sync
            .push(date, &RecordPatch::entries_of(&record.without_placeholders()))
            .await;
        self.sync.bus().emit(date, RefreshSource::Delete);

        let follow_up = self
            .sync
            .is_enabled()
            .then(|| self.sync.schedule_pull(date, self.config.post_delete_pull_delay()));

        tracing::info!(date, kind = %kind, log_id, "Deleted entry");
        Ok(Deleted {
            record,
            push,
            follow_up,
        })
    }

    fn note_recorded(&self, date: &str, has_content: bool) {
        let mut recorded = self.recorded.lock().unwrap();
        if has_content {
            recorded.insert(date.to_string());
        } else {
            recorded.remove(date);
        }
    }

    /// Dates with anything recorded, oldest first.
    pub fn recorded_dates(&self) -> Vec<String> {
        self.recorded.lock().unwrap().iter().cloned().collect()
    }

    pub fn has_record(&self, date: &str) -> bool {
        self.recorded.lock().unwrap().contains(date)
    }

    /// Rebuild the recorded-dates index from the store.
    pub async fn refresh_recorded_dates(&self) -> Result<usize> {
        let store = self.live.store();
        store.wait_for_ready().await?;
        let dates: BTreeSet<String> = store
            .get_all()
            .await?
            .into_iter()
            .filter(DailyRecord::has_content)
            .map(|r| r.date)
            .collect();
        let count = dates.len();
        *self.recorded.lock().unwrap() = dates;
        Ok(count)
    }
}
