//! Push/pull reconciliation between the local store and the sync server.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::record::{apply, recompute_summary, RecordPatch};
use crate::store::Storage;
use crate::types::DailyRecord;

use super::signal::{RefreshBus, RefreshSource};
use super::RemoteSync;

/// Process-wide sync bookkeeping.
#[derive(Debug, Default)]
struct SyncState {
    in_flight: bool,
    /// Dates that already triggered an automatic pull
    auto_pull_attempted: HashSet<String>,
}

/// What happened to a pushed patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Sent,
    /// Delivery failed; the patch is in the outbox
    Queued,
    /// No sync server configured
    Disabled,
}

/// Result of a full sync pass.
#[derive(Debug, Default, Clone)]
pub struct SyncReport {
    /// Another sync was already running; nothing was done
    pub skipped: bool,
    /// Outbox items delivered
    pub flushed: usize,
    /// Outbox items left queued (failed again, or re-queued mid-delivery)
    pub still_queued: usize,
    /// Records received from the server
    pub received: usize,
    /// Dates whose local copy was replaced
    pub updated: Vec<String>,
}

/// Clears the in-flight flag when dropped.
struct InFlight<'a>(&'a Mutex<SyncState>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().unwrap().in_flight = false;
    }
}

pub struct SyncReconciler {
    store: Arc<dyn Storage>,
    remote: Option<Arc<dyn RemoteSync>>,
    bus: RefreshBus,
    state: Mutex<SyncState>,
}

impl SyncReconciler {
    pub fn new(store: Arc<dyn Storage>, remote: Option<Arc<dyn RemoteSync>>, bus: RefreshBus) -> Self {
        Self {
            store,
            remote,
            bus,
            state: Mutex::new(SyncState::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.remote.is_some()
    }

    pub fn is_syncing(&self) -> bool {
        self.state.lock().unwrap().in_flight
    }

    pub fn bus(&self) -> &RefreshBus {
        &self.bus
    }

    fn begin(&self) -> Option<InFlight<'_>> {
        let mut state = self.state.lock().unwrap();
        if state.in_flight {
            return None;
        }
        state.in_flight = true;
        Some(InFlight(&self.state))
    }

    /// Send `patch` for `date`. Never fails: local state is already durable,
    /// so a failed delivery is logged and queued in the outbox.
    pub async fn push(&self, date: &str, patch: &RecordPatch) -> PushOutcome {
        let Some(remote) = &self.remote else {
            tracing::debug!(date, "Sync disabled, not pushing");
            return PushOutcome::Disabled;
        };

        let mut patch = patch.clone();
        if let Some(food) = patch.food_entries.as_mut() {
            food.retain(|e| !e.is_pending);
        }
        if let Some(exercise) = patch.exercise_entries.as_mut() {
            exercise.retain(|e| !e.is_pending);
        }

        match remote.push(date, &patch).await {
            Ok(()) => {
                tracing::debug!(date, "Pushed patch");
                PushOutcome::Sent
            }
            Err(e) => {
                tracing::warn!(date, error = %e, "Push failed, queueing patch");
                if let Err(store_err) = self.store.enqueue(date, &patch, &e.to_string()).await {
                    tracing::error!(date, error = %store_err, "Failed to queue patch");
                }
                PushOutcome::Queued
            }
        }
    }

    /// Fetch the remote record for `date` and store it if it wins.
    ///
    /// Emits a `cloudSync` signal when the local copy changed. Returns whether
    /// it did. Skipped (returns false) while another sync is in flight.
    pub async fn pull(&self, date: &str, force: bool) -> Result<bool> {
        let Some(remote) = self.remote.clone() else {
            return Ok(false);
        };
        let Some(_guard) = self.begin() else {
            tracing::debug!(date, "Sync in flight, skipping pull");
            return Ok(false);
        };

        let Some(record) = remote.pull(date).await? else {
            return Ok(false);
        };
        let queued = self
            .store
            .pending()
            .await?
            .into_iter()
            .find(|item| item.date == date)
            .map(|item| item.patch);
        let changed = self.store_remote(record, force, queued.as_ref()).await?;
        if changed {
            self.bus.emit(date, RefreshSource::CloudSync);
        }
        Ok(changed)
    }

    /// Flush the outbox, then pull every remote record.
    ///
    /// A concurrent call returns immediately with `skipped` set.
    pub async fn sync_all(&self, force_full_pull: bool) -> Result<SyncReport> {
        let Some(remote) = self.remote.clone() else {
            return Err(Error::Config("sync is not configured".to_string()));
        };
        let Some(_guard) = self.begin() else {
            return Ok(SyncReport {
                skipped: true,
                ..Default::default()
            });
        };

        let mut report = SyncReport::default();

        for item in self.store.pending().await? {
            match remote.push(&item.date, &item.patch).await {
                Ok(()) => {
                    report.flushed += 1;
                    if !self.store.remove(item.id, item.attempts).await? {
                        // Re-queued while in flight; the merged patch goes out next time
                        tracing::debug!(date = %item.date, "Outbox item changed during delivery, keeping it");
                        report.still_queued += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(date = %item.date, attempts = item.attempts, error = %e, "Outbox delivery failed");
                    self.store.mark_failed(item.id, &e.to_string()).await?;
                    report.still_queued += 1;
                }
            }
        }

        let records = remote.pull_all(force_full_pull).await?;
        report.received = records.len();

        let queued: HashMap<String, RecordPatch> = self
            .store
            .pending()
            .await?
            .into_iter()
            .map(|item| (item.date, item.patch))
            .collect();

        for record in records {
            let date = record.date.clone();
            if self
                .store_remote(record, force_full_pull, queued.get(&date))
                .await?
            {
                report.updated.push(date);
            }
        }

        for date in &report.updated {
            self.bus.emit(date, RefreshSource::CloudSync);
        }

        tracing::info!(
            flushed = report.flushed,
            still_queued = report.still_queued,
            received = report.received,
            updated = report.updated.len(),
            "Sync complete"
        );
        Ok(report)
    }

    /// Write a remote record locally if it wins against the stored one.
    ///
    /// It wins when forced, when nothing is stored, or when its
    /// `last_modified` is not older than the local one. A patch still waiting
    /// in the outbox for the date is applied on top, so unsent local edits
    /// survive the overwrite.
    async fn store_remote(
        &self,
        mut record: DailyRecord,
        force: bool,
        queued: Option<&RecordPatch>,
    ) -> Result<bool> {
        record.strip_placeholders();
        record.summary = recompute_summary(&record.food_entries, &record.exercise_entries);

        let local = self.store.get(&record.date).await?;
        let wins = match &local {
            None => true,
            Some(_) if force => true,
            Some(local) => match (record.last_modified, local.last_modified) {
                (Some(remote_at), Some(local_at)) => remote_at >= local_at,
                (None, Some(_)) => false,
                (_, None) => true,
            },
        };
        if !wins {
            return Ok(false);
        }

        if let Some(patch) = queued {
            record = apply(&record, patch);
        }
        if local.as_ref() == Some(&record) {
            return Ok(false);
        }

        self.store.set(&record.date, &record).await?;
        Ok(true)
    }

    /// Whether loading `date` empty should trigger an automatic full pull.
    ///
    /// Returns true at most once per date until [`Self::note_loaded`] re-arms.
    pub fn claim_auto_pull(&self, date: &str) -> bool {
        if self.remote.is_none() {
            return false;
        }
        let mut state = self.state.lock().unwrap();
        if state.in_flight {
            return false;
        }
        state.auto_pull_attempted.insert(date.to_string())
    }

    /// Record a successful load. A non-empty one re-arms automatic pulls.
    pub fn note_loaded(&self, has_content: bool) {
        if has_content {
            self.state.lock().unwrap().auto_pull_attempted.clear();
        }
    }

    /// Pull `date` after `delay`, in the background.
    pub fn schedule_pull(self: &Arc<Self>, date: &str, delay: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let date = date.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = this.pull(&date, false).await {
                tracing::warn!(date = %date, error = %e, "Follow-up pull failed");
            }
        })
    }
}
