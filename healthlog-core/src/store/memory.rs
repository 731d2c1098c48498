//! In-memory store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Error, Result};
use crate::record::{merge, RecordPatch};
use crate::suggest::SuggestionRecord;
use crate::types::DailyRecord;

use super::{LocalStore, OutboxItem, OutboxStore, SuggestionStore};

/// Volatile store backed by maps.
///
/// Writes can be made to fail on demand, which lets callers exercise the
/// "local persistence failure is fatal" path.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, DailyRecord>>,
    outbox: Mutex<Vec<OutboxItem>>,
    suggestions: Mutex<HashMap<String, SuggestionRecord>>,
    next_outbox_id: AtomicI64,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent record write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored suggestion sets.
    pub fn suggestion_count(&self) -> usize {
        self.suggestions.lock().unwrap().len()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn wait_for_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, date: &str) -> Result<Option<DailyRecord>> {
        Ok(self.records.lock().unwrap().get(date).cloned())
    }

    async fn set(&self, date: &str, record: &DailyRecord) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Store(format!("write rejected for {}", date)));
        }
        self.records
            .lock()
            .unwrap()
            .insert(date.to_string(), record.clone());
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<DailyRecord>> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn enqueue(&self, date: &str, patch: &RecordPatch, error: &str) -> Result<()> {
        let mut outbox = self.outbox.lock().unwrap();
        if let Some(item) = outbox.iter_mut().find(|i| i.date == date) {
            item.patch = merge(&item.patch, patch);
            item.attempts += 1;
            item.last_error = Some(error.to_string());
            return Ok(());
        }

        let id = self.next_outbox_id.fetch_add(1, Ordering::SeqCst) + 1;
        outbox.push(OutboxItem {
            id,
            date: date.to_string(),
            patch: patch.clone(),
            attempts: 1,
            last_error: Some(error.to_string()),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<OutboxItem>> {
        Ok(self.outbox.lock().unwrap().clone())
    }

    async fn remove(&self, id: i64, attempts: u32) -> Result<bool> {
        let mut outbox = self.outbox.lock().unwrap();
        let before = outbox.len();
        outbox.retain(|i| !(i.id == id && i.attempts == attempts));
        Ok(outbox.len() < before)
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        if let Some(item) = self.outbox.lock().unwrap().iter_mut().find(|i| i.id == id) {
            item.attempts += 1;
            item.last_error = Some(error.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl SuggestionStore for MemoryStore {
    async fn save_suggestions(&self, date: &str, record: &SuggestionRecord) -> Result<()> {
        self.suggestions
            .lock()
            .unwrap()
            .insert(date.to_string(), record.clone());
        Ok(())
    }

    async fn load_suggestions(&self, date: &str) -> Result<Option<SuggestionRecord>> {
        Ok(self.suggestions.lock().unwrap().get(date).cloned())
    }
}
