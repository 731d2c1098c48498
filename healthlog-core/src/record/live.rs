//! The selected day, held in memory and written through to the store.
//!
//! Every mutation runs under one async lock: read the latest snapshot, build
//! the next record, persist it, then swap it in. If persisting fails the
//! snapshot is left as it was and the error is returned.
//!
//! Placeholders only ever live in the in-memory snapshot. Records are stripped
//! of them before they are written, and loads installed over the snapshot keep
//! the placeholders of submissions that are still in flight.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::store::Storage;
use crate::types::DailyRecord;

use super::patch::{apply, RecordPatch};
use super::summary::recompute_summary;

pub struct LiveRecord {
    store: Arc<dyn Storage>,
    current: Mutex<DailyRecord>,
}

impl LiveRecord {
    /// Start with an empty record for `date`; nothing is loaded yet.
    pub fn new(store: Arc<dyn Storage>, date: &str) -> Self {
        Self {
            store,
            current: Mutex::new(DailyRecord::empty(date)),
        }
    }

    pub fn store(&self) -> &Arc<dyn Storage> {
        &self.store
    }

    /// Copy of the current snapshot, placeholders included.
    pub async fn snapshot(&self) -> DailyRecord {
        self.current.lock().await.clone()
    }

    /// Date of the current snapshot.
    pub async fn date(&self) -> String {
        self.current.lock().await.date.clone()
    }

    /// Switch to `date`, showing an empty record until a load is installed.
    /// Returns false if `date` was already selected.
    pub async fn select(&self, date: &str) -> bool {
        let mut current = self.current.lock().await;
        if current.date == date {
            return false;
        }
        *current = DailyRecord::empty(date);
        true
    }

    /// Install a freshly loaded record if its date is still selected.
    ///
    /// Returns false (and drops `record`) when the selection moved on while
    /// the load was in flight.
    pub async fn install_if_current(&self, record: DailyRecord) -> bool {
        let mut current = self.current.lock().await;
        if current.date != record.date {
            tracing::debug!(
                loaded = %record.date,
                selected = %current.date,
                "Discarding stale load"
            );
            return false;
        }
        install(&mut current, record);
        true
    }

    /// Re-read `date` from the store into the snapshot if it is still
    /// selected. The read happens under the snapshot lock, so no write can
    /// land between it and the swap.
    pub async fn reload_if_current(&self, date: &str) -> Result<bool> {
        let mut current = self.current.lock().await;
        if current.date != date {
            return Ok(false);
        }
        match self.store.get(date).await? {
            Some(record) => {
                install(&mut current, record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Apply `patch` to the record for `date` and persist the result.
    ///
    /// `last_modified` is stamped with the current time unless the patch
    /// already carries one. Returns the new record (placeholders included when
    /// `date` is the selected day).
    pub async fn apply(&self, date: &str, patch: RecordPatch) -> Result<DailyRecord> {
        self.update(date, move |_| patch).await.map(|(record, _)| record)
    }

    /// Read-modify-write: `build` derives a patch from the latest record for
    /// `date`, which is then applied and persisted as in [`LiveRecord::apply`].
    ///
    /// Returns the new record and the stamped patch.
    pub async fn update<F>(&self, date: &str, build: F) -> Result<(DailyRecord, RecordPatch)>
    where
        F: FnOnce(&DailyRecord) -> RecordPatch + Send,
    {
        let mut current = self.current.lock().await;

        if current.date == date {
            let mut patch = build(&current);
            if patch.last_modified.is_none() {
                patch.last_modified = Some(Utc::now());
            }
            let next = apply(&current, &patch);
            self.store.set(date, &next.without_placeholders()).await?;
            *current = next.clone();
            return Ok((next, patch));
        }

        // Not the selected day; go through the stored copy instead.
        drop(current);
        let stored = self
            .store
            .get(date)
            .await?
            .map(|r| r.without_placeholders())
            .unwrap_or_else(|| DailyRecord::empty(date));
        let mut patch = build(&stored);
        if patch.last_modified.is_none() {
            patch.last_modified = Some(Utc::now());
        }
        let next = apply(&stored, &patch);
        self.store.set(date, &next).await?;
        Ok((next, patch))
    }

    /// Mutate the in-memory snapshot without persisting (placeholders).
    ///
    /// Returns false when `date` is not the selected day; the mutation is
    /// skipped in that case.
    pub async fn edit_in_memory<F>(&self, date: &str, edit: F) -> bool
    where
        F: FnOnce(&mut DailyRecord) + Send,
    {
        let mut current = self.current.lock().await;
        if current.date != date {
            return false;
        }
        edit(&mut current);
        current.summary = recompute_summary(&current.food_entries, &current.exercise_entries);
        true
    }
}

/// Replace `current` with `record`, carrying over in-flight placeholders.
fn install(current: &mut DailyRecord, mut record: DailyRecord) {
    record.strip_placeholders();
    record
        .food_entries
        .extend(current.food_entries.iter().filter(|e| e.is_pending).cloned());
    record.exercise_entries.extend(
        current
            .exercise_entries
            .iter()
            .filter(|e| e.is_pending)
            .cloned(),
    );
    record.summary = recompute_summary(&record.food_entries, &record.exercise_entries);
    *current = record;
}
