//! Local durable storage
//!
//! Records are keyed by date. The store is the source of truth for the app:
//! every mutation lands here before anything is sent to the sync server.
//!
//! Two implementations are provided:
//! - [`SqliteStore`] for real use (`$XDG_DATA_HOME/healthlog/data.db`)
//! - [`MemoryStore`] for tests and ephemeral sessions
//!
//! Besides records, the store keeps the sync outbox (patches that could not be
//! pushed yet) and the last finalized suggestion set per date.

mod memory;
pub mod schema;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::record::RecordPatch;
use crate::suggest::SuggestionRecord;
use crate::types::DailyRecord;

/// Keyed record storage.
///
/// Implementations must tolerate interleaved `get`/`set` calls from
/// concurrent tasks; no transaction API is assumed.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Resolve once the store is open and migrated.
    async fn wait_for_ready(&self) -> Result<()>;

    async fn get(&self, date: &str) -> Result<Option<DailyRecord>>;

    async fn set(&self, date: &str, record: &DailyRecord) -> Result<()>;

    async fn get_all(&self) -> Result<Vec<DailyRecord>>;
}

/// A patch that still has to reach the sync server.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxItem {
    pub id: i64,
    pub date: String,
    pub patch: RecordPatch,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Durable queue of unsent patches, at most one per date.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Queue `patch` for `date`, merging it into any patch already queued for
    /// that date.
    async fn enqueue(&self, date: &str, patch: &RecordPatch, error: &str) -> Result<()>;

    /// Queued items, oldest first.
    async fn pending(&self) -> Result<Vec<OutboxItem>>;

    /// Drop a delivered item.
    ///
    /// `attempts` is the count seen when the item was read. If the item was
    /// merged into or retried since then it is kept and false is returned.
    async fn remove(&self, id: i64, attempts: u32) -> Result<bool>;

    /// Record another failed delivery attempt.
    async fn mark_failed(&self, id: i64, error: &str) -> Result<()>;
}

/// Finalized suggestion sets keyed by analysis date.
#[async_trait]
pub trait SuggestionStore: Send + Sync {
    async fn save_suggestions(&self, date: &str, record: &SuggestionRecord) -> Result<()>;

    async fn load_suggestions(&self, date: &str) -> Result<Option<SuggestionRecord>>;
}

/// Everything the app needs from local storage.
pub trait Storage: LocalStore + OutboxStore + SuggestionStore {}

impl<T: LocalStore + OutboxStore + SuggestionStore> Storage for T {}
