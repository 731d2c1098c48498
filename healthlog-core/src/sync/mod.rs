//! Sync with the remote server
//!
//! The local store is always written first. The [`SyncReconciler`] then:
//!
//! - pushes patches, queueing failed ones in the durable outbox
//! - pulls remote snapshots (last write observed wins, `force` overrides)
//! - announces every date it rewrote on the [`RefreshBus`]
//!
//! ```text
//! LiveRecord ──set──► LocalStore
//!      │
//!      └─patch──► SyncReconciler ──push/pull──► RemoteSync (HTTP)
//!                       │   ▲
//!                outbox ▼   │ flush on sync_all
//!                    OutboxStore
//! ```

mod client;
mod reconciler;
mod signal;

pub use client::SyncClient;
pub use reconciler::{PushOutcome, SyncReconciler, SyncReport};
pub use signal::{RefreshBus, RefreshSignal, RefreshSource};

use async_trait::async_trait;

use crate::error::Result;
use crate::record::RecordPatch;
use crate::types::DailyRecord;

/// The remote copy of the records.
#[async_trait]
pub trait RemoteSync: Send + Sync {
    async fn push(&self, date: &str, patch: &RecordPatch) -> Result<()>;

    /// `None` when the server has no record for `date`.
    async fn pull(&self, date: &str) -> Result<Option<DailyRecord>>;

    async fn pull_all(&self, force: bool) -> Result<Vec<DailyRecord>>;
}
