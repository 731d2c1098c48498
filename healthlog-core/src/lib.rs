//! # healthlog-core
//!
//! Core library for healthlog - an offline-first food and exercise log.
//!
//! This library provides:
//! - Domain types for daily records, entries and the user profile
//! - Local storage with SQLite, plus an outbox for unsent changes
//! - Best-effort sync with a remote server
//! - AI-assisted entry parsing, streamed suggestions and TEF analysis
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Every change flows through the same path:
//! - **Local first:** a [`RecordPatch`] is applied to the live record and
//!   persisted before anything touches the network
//! - **Remote second:** the patch is pushed; failures land in the outbox and
//!   are flushed by the next full sync
//! - **Derived last:** summaries, metabolic rates and TEF are recomputed from
//!   the record and never edited directly
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use healthlog_core::sync::RefreshBus;
//! use healthlog_core::{Config, LiveRecord, SqliteStore, SyncReconciler};
//!
//! # async fn run() -> healthlog_core::Result<()> {
//! let config = Config::load()?;
//!
//! // Open the local store
//! let store = Arc::new(SqliteStore::open(&Config::database_path())?);
//! store.migrate()?;
//!
//! // Local-only: no remote configured
//! let sync = SyncReconciler::new(store.clone(), None, RefreshBus::new());
//! let live = LiveRecord::new(store, &healthlog_core::today_key());
//! let record = live.snapshot().await;
//! # let _ = (config, sync, record);
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use record::{LiveRecord, RecordPatch};
pub use store::{MemoryStore, SqliteStore, Storage};
pub use sync::{PushOutcome, SyncReconciler, SyncReport};
pub use tracker::DailyTracker;
pub use types::*;

// Public modules
pub mod ai;
pub mod analysis;
pub mod config;
pub mod error;
pub mod logging;
pub mod record;
pub mod store;
pub mod submit;
pub mod suggest;
pub mod sync;
pub mod tracker;
pub mod types;
