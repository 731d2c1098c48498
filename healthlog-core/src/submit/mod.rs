//! Optimistic submissions
//!
//! Free text (and optionally photos) goes to the parse endpoint. While the
//! request is in flight a placeholder entry stands in for the result:
//!
//! 1. **Propose**: a `pending-<uuid>` placeholder is appended to the list
//! 2. **Commit**: the placeholder is swapped for the parsed entries, the record
//!    is persisted and the entry lists are pushed
//! 3. **Rollback**: the placeholder is removed and nothing else changes
//!
//! Food and exercise submissions are independent; each allows one submission
//! in flight at a time.

mod manager;

pub use manager::{Submission, SubmissionManager, SubmissionOutcome};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;

use crate::config::ModelSelection;
use crate::error::Result;
use crate::types::{EntryKind, ExerciseEntry, FoodEntry};

/// Most images accepted in one submission.
pub const MAX_IMAGES: usize = 5;

/// A photo attached to a submission.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// Everything the parse endpoint needs.
#[derive(Debug, Clone)]
pub struct ParseRequest {
    pub text: String,
    pub kind: EntryKind,
    pub language: String,
    /// Kilograms, used for exercise energy estimates
    pub user_weight: f64,
    pub images: Vec<ImageAttachment>,
    pub models: ModelSelection,
}

/// Parse endpoint response. A non-empty `error` means the parse failed even
/// though the request succeeded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParseResponse {
    #[serde(default)]
    pub food: Vec<FoodEntry>,
    #[serde(default)]
    pub exercise: Vec<ExerciseEntry>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Turns free text into entries.
#[async_trait]
pub trait ParseService: Send + Sync {
    async fn parse(&self, request: &ParseRequest) -> Result<ParseResponse>;
}
