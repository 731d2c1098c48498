//! Derived metrics
//!
//! The thermic effect of food (TEF) for the selected day is recomputed when
//! the food entries change, but only after a quiet period, and only when the
//! content actually changed:
//!
//! - [`cache`]: content hash of the entries and the analyses seen per hash
//! - [`debounce`]: restartable timer with a countdown
//! - [`tef`]: baseline TEF from macros and local factor detection
//! - [`TefAnalyzer`]: wires the above to the live record and the TEF endpoint

mod analyzer;
pub mod cache;
pub mod debounce;
pub mod tef;

pub use analyzer::{TefAnalyzer, TefTrigger};
pub use cache::{content_hash, should_recompute, AnalysisCache, AnalysisCacheEntry};
pub use debounce::Debouncer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ModelSelection;
use crate::error::Result;
use crate::types::FoodEntry;

/// Body of the TEF endpoint request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TefRequest {
    pub food_entries: Vec<FoodEntry>,
    pub ai_config: ModelSelection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TefResponse {
    #[serde(default = "neutral_multiplier")]
    pub enhancement_multiplier: f64,
    #[serde(default)]
    pub enhancement_factors: Vec<String>,
    #[serde(default)]
    pub analysis_timestamp: Option<DateTime<Utc>>,
}

fn neutral_multiplier() -> f64 {
    1.0
}

/// Estimates how much the day's foods raise TEF above baseline.
#[async_trait]
pub trait TefService: Send + Sync {
    async fn analyze(&self, request: &TefRequest) -> Result<TefResponse>;
}
