//! Drives one suggestion stream from request to persisted result.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::watch;

use crate::config::{AiConfig, ModelSelection};
use crate::error::{Error, Result};
use crate::store::Storage;
use crate::types::{date_key, parse_date_key, DailyRecord, UserProfile};

use super::frame::{parse_event, FrameBuffer, PartialUpdate, StreamEvent};
use super::merger::{PartialResultMerger, SuggestionRecord, SuggestionSnapshot};
use super::progress::{CategoryStatus, GenerationProgress};

/// Days before the analysis date sent along as context.
pub const RECENT_DAYS: i64 = 7;

/// Response body of the suggestion endpoint, chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Opens the suggestion stream. Retries, if any, happen before the stream is
/// returned.
#[async_trait]
pub trait SuggestionTransport: Send + Sync {
    async fn open(&self, request: &SuggestionRequest) -> Result<ByteStream>;
}

/// Body of the suggestion request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRequest {
    pub daily_log: DailyRecord,
    pub user_profile: UserProfile,
    pub recent_logs: Vec<DailyRecord>,
    pub ai_config: ModelSelection,
    pub selected_experts: Vec<String>,
}

pub struct SuggestionAggregator {
    store: Arc<dyn Storage>,
    transport: Arc<dyn SuggestionTransport>,
    profile: UserProfile,
    models: ModelSelection,
    categories: Vec<String>,
    idle_timeout: Duration,
    progress: watch::Sender<GenerationProgress>,
    results: watch::Sender<Option<SuggestionSnapshot>>,
}

impl SuggestionAggregator {
    pub fn new(
        store: Arc<dyn Storage>,
        transport: Arc<dyn SuggestionTransport>,
        profile: UserProfile,
        ai: &AiConfig,
    ) -> Self {
        let (progress, _) = watch::channel(GenerationProgress::default());
        let (results, _) = watch::channel(None);
        Self {
            store,
            transport,
            profile,
            models: ai.models(),
            categories: ai.categories.clone(),
            idle_timeout: ai.stream_idle_timeout(),
            progress,
            results,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<GenerationProgress> {
        self.progress.subscribe()
    }

    /// Every merged in-progress set, then the final one.
    pub fn subscribe_results(&self) -> watch::Receiver<Option<SuggestionSnapshot>> {
        self.results.subscribe()
    }

    pub fn progress(&self) -> GenerationProgress {
        self.progress.borrow().clone()
    }

    /// The last persisted suggestion set for `date`.
    pub async fn latest(&self, date: &str) -> Result<Option<SuggestionRecord>> {
        self.store.load_suggestions(date).await
    }

    /// Build the request for `date`, refusing dates without entries.
    pub async fn build_request(&self, date: &str) -> Result<SuggestionRequest> {
        let day = parse_date_key(date)?;
        let daily_log = self
            .store
            .get(date)
            .await?
            .map(|r| r.without_placeholders())
            .filter(DailyRecord::has_entries)
            .ok_or_else(|| Error::NoData(date.to_string()))?;

        let mut recent_logs = Vec::new();
        for offset in 1..=RECENT_DAYS {
            let key = date_key(day - chrono::Duration::days(offset));
            if let Some(record) = self.store.get(&key).await? {
                if record.has_entries() {
                    recent_logs.push(record.without_placeholders());
                }
            }
        }

        Ok(SuggestionRequest {
            daily_log,
            user_profile: self.profile.clone(),
            recent_logs,
            ai_config: self.models.clone(),
            selected_experts: self.categories.clone(),
        })
    }

    /// Generate, publish and persist suggestions for `date`.
    ///
    /// An empty final set is returned but not persisted. On failure nothing is
    /// persisted and every unfinished category ends in `error`.
    pub async fn generate(&self, date: &str) -> Result<SuggestionRecord> {
        let request = self.build_request(date).await?;
        self.progress
            .send_replace(GenerationProgress::start(&self.categories));
        self.results.send_replace(None);

        tracing::info!(
            date,
            recent = request.recent_logs.len(),
            categories = ?self.categories,
            "Generating suggestions"
        );

        let outcome = match self.run(date, &request).await {
            Ok(record) => self.persist(date, record).await,
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(record) => {
                self.results.send_replace(Some(SuggestionSnapshot {
                    record: record.clone(),
                    is_partial: false,
                    current_category: None,
                    recent_suggestion: None,
                }));
                self.progress
                    .send_modify(|p| p.finish_success("Suggestions ready".to_string()));
                tracing::info!(date, categories = record.suggestions.len(), "Suggestions complete");
            }
            Err(e) => {
                let message = e.to_string();
                self.progress.send_modify(|p| p.fail(message));
                tracing::warn!(date, error = %e, "Suggestion generation failed");
            }
        }
        outcome
    }

    async fn persist(&self, date: &str, record: SuggestionRecord) -> Result<SuggestionRecord> {
        if record.suggestions.is_empty() {
            tracing::debug!(date, "Empty suggestion set, not persisting");
        } else {
            self.store.save_suggestions(date, &record).await?;
        }
        Ok(record)
    }

    async fn run(&self, date: &str, request: &SuggestionRequest) -> Result<SuggestionRecord> {
        let mut stream = self.transport.open(request).await?;
        let mut frames = FrameBuffer::new();
        let mut merger = PartialResultMerger::new(date);
        let mut seen = 0usize;

        loop {
            let chunk = match tokio::time::timeout(self.idle_timeout, stream.next()).await {
                Err(_) => {
                    // Dropping the body cancels the read.
                    drop(stream);
                    return Err(Error::StreamStalled(self.idle_timeout));
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(chunk))) => chunk,
            };

            for payload in frames.push(&chunk) {
                seen += 1;
                if let Some(record) = self.handle(&payload, &mut merger)? {
                    return Ok(record);
                }
            }
        }

        if let Some(payload) = frames.finish() {
            seen += 1;
            if let Some(record) = self.handle(&payload, &mut merger)? {
                return Ok(record);
            }
        }

        if seen == 0 {
            return Err(Error::EmptyStream);
        }
        if merger.is_empty() {
            return Err(Error::IncompleteStream);
        }
        tracing::warn!(date, frames = seen, "Stream closed without completion, keeping partial results");
        Ok(merger.finalize(None))
    }

    /// Apply one frame. Returns the final record on `complete`.
    fn handle(
        &self,
        payload: &str,
        merger: &mut PartialResultMerger,
    ) -> Result<Option<SuggestionRecord>> {
        let event = match parse_event(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                return Ok(None);
            }
        };

        match event {
            StreamEvent::Heartbeat => {}
            StreamEvent::Init { message } => {
                let message = message.unwrap_or_else(|| "Generating suggestions…".to_string());
                self.progress.send_modify(|p| p.mark_loading(message));
            }
            StreamEvent::Progress { category, message } => {
                self.progress.send_modify(|p| {
                    p.set_category(&category, CategoryStatus::Generating, message);
                });
            }
            StreamEvent::Partial { category, update } => {
                let single = matches!(update, PartialUpdate::Append { .. });
                let snapshot = merger.merge(&category, update);
                let count = merger.count(&category);
                self.progress.send_modify(|p| {
                    if single {
                        p.mark_partial(format!(
                            "Generating {} suggestions ({} so far)",
                            category, count
                        ));
                        p.set_category(
                            &category,
                            CategoryStatus::Generating,
                            Some(format!("Generating suggestion {}", count)),
                        );
                    } else {
                        p.mark_partial(format!("Generating {} suggestions", category));
                        p.set_category(
                            &category,
                            CategoryStatus::Success,
                            Some("Analysis complete".to_string()),
                        );
                    }
                });
                self.results.send_replace(Some(snapshot));
            }
            StreamEvent::Error { category, message } => {
                let message = message.unwrap_or_else(|| "Analysis failed".to_string());
                tracing::warn!(category = %category, message = %message, "Category failed");
                self.progress.send_modify(|p| {
                    p.set_category(&category, CategoryStatus::Error, Some(message));
                });
            }
            StreamEvent::Fatal { message } => {
                return Err(Error::StreamFatal(
                    message.unwrap_or_else(|| "generation failed".to_string()),
                ));
            }
            StreamEvent::Complete(payload) => return Ok(Some(merger.finalize(Some(payload)))),
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LocalStore, MemoryStore, SuggestionStore};
    use crate::suggest::progress::GenerationStatus;
    use crate::types::{FoodEntry, NutritionInfo};
    use futures_util::stream;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DATE: &str = "2024-06-10";

    /// Serves a fixed list of chunks, optionally hanging afterwards.
    struct ScriptedTransport {
        chunks: Vec<Vec<u8>>,
        hang: bool,
        opened: AtomicUsize,
    }

    impl ScriptedTransport {
        fn frames(frames: &[serde_json::Value]) -> Self {
            let chunks = frames
                .iter()
                .map(|f| format!("data: {}\n\n", f).into_bytes())
                .collect();
            Self::raw(chunks)
        }

        fn raw(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks,
                hang: false,
                opened: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SuggestionTransport for ScriptedTransport {
        async fn open(&self, _request: &SuggestionRequest) -> Result<ByteStream> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let chunks: Vec<Result<Bytes>> = self
                .chunks
                .iter()
                .map(|c| Ok(Bytes::from(c.clone())))
                .collect();
            let body = stream::iter(chunks);
            if self.hang {
                Ok(Box::pin(body.chain(stream::pending())))
            } else {
                Ok(Box::pin(body))
            }
        }
    }

    fn food(name: &str) -> FoodEntry {
        FoodEntry {
            log_id: name.to_string(),
            food_name: name.to_string(),
            consumed_grams: 100.0,
            meal_type: None,
            time_period: None,
            nutritional_info_per_100g: NutritionInfo::default(),
            total_nutritional_info_consumed: NutritionInfo {
                calories: 200.0,
                ..Default::default()
            },
            is_estimated: true,
            is_pending: false,
        }
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let mut today = DailyRecord::empty(DATE);
        today.food_entries.push(food("oats"));
        store.set(DATE, &today).await.unwrap();

        let mut earlier = DailyRecord::empty("2024-06-08");
        earlier.food_entries.push(food("rice"));
        store.set("2024-06-08", &earlier).await.unwrap();
        // Out of the window
        let mut old = DailyRecord::empty("2024-06-01");
        old.food_entries.push(food("pasta"));
        store.set("2024-06-01", &old).await.unwrap();
        // Weight only: no entries
        let mut weight_only = DailyRecord::empty("2024-06-09");
        weight_only.weight = Some(70.0);
        store.set("2024-06-09", &weight_only).await.unwrap();
        store
    }

    fn aggregator(store: Arc<MemoryStore>, transport: Arc<ScriptedTransport>) -> SuggestionAggregator {
        SuggestionAggregator::new(store, transport, UserProfile::default(), &AiConfig::default())
            .with_idle_timeout(Duration::from_millis(100))
    }

    fn single(category: &str, text: &str) -> serde_json::Value {
        json!({
            "type": "partial",
            "category": category,
            "isSingleSuggestion": true,
            "data": {"suggestion": text}
        })
    }

    #[tokio::test]
    async fn test_request_context() {
        let store = seeded_store().await;
        let agg = aggregator(store, Arc::new(ScriptedTransport::raw(vec![])));

        let request = agg.build_request(DATE).await.unwrap();
        assert_eq!(request.recent_logs.len(), 1);
        assert_eq!(request.recent_logs[0].date, "2024-06-08");
        assert_eq!(request.selected_experts, vec!["nutrition", "exercise"]);

        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("dailyLog").is_some());
        assert!(body["aiConfig"].get("agentModel").is_some());
    }

    #[tokio::test]
    async fn test_no_data_refused_up_front() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(ScriptedTransport::raw(vec![]));
        let agg = aggregator(store, transport.clone());

        assert!(matches!(agg.generate(DATE).await, Err(Error::NoData(_))));
        assert_eq!(transport.opened.load(Ordering::SeqCst), 0);
        assert_eq!(agg.progress().status, GenerationStatus::Idle);
    }

    #[tokio::test]
    async fn test_single_units_then_complete() {
        let store = seeded_store().await;
        let transport = Arc::new(ScriptedTransport::frames(&[
            json!({"type": "init", "message": "starting"}),
            json!({"type": "progress", "category": "nutrition"}),
            single("nutrition", "eat more fiber"),
            json!({"type": "heartbeat"}),
            single("nutrition", "drink water"),
            json!({"type": "complete"}),
        ]));
        let agg = aggregator(store.clone(), transport);
        let results = agg.subscribe_results();

        let record = agg.generate(DATE).await.unwrap();
        let nutrition = &record.suggestions[0];
        assert_eq!(nutrition.key, "nutrition");
        assert_eq!(nutrition.priority, "medium");
        assert_eq!(nutrition.suggestions, vec![json!("eat more fiber"), json!("drink water")]);

        assert_eq!(store.load_suggestions(DATE).await.unwrap(), Some(record.clone()));
        assert!(!results.borrow().as_ref().unwrap().is_partial);

        let progress = agg.progress();
        assert_eq!(progress.status, GenerationStatus::Success);
        assert_eq!(
            progress.category("exercise").unwrap().status,
            CategoryStatus::Success
        );
    }

    #[tokio::test]
    async fn test_server_set_replaces_partials() {
        let store = seeded_store().await;
        let transport = Arc::new(ScriptedTransport::frames(&[
            json!({"type": "partial", "category": "nutrition", "data": {"summary": "ok", "suggestions": ["a"]}}),
            single("exercise", "walk"),
            json!({"type": "error", "category": "exercise", "message": "model refused"}),
            json!({"type": "complete", "suggestions": [{"category": "nutrition", "suggestions": ["final"]}], "processingTime": 42}),
        ]));
        let agg = aggregator(store, transport);

        let record = agg.generate(DATE).await.unwrap();
        assert_eq!(record.suggestions.len(), 1);
        assert_eq!(record.suggestions[0].suggestions, vec![json!("final")]);
        assert_eq!(record.processing_time, 42);

        let progress = agg.progress();
        assert_eq!(
            progress.category("nutrition").unwrap().status,
            CategoryStatus::Success
        );
        // Errored categories stay errored after success
        assert_eq!(
            progress.category("exercise").unwrap().status,
            CategoryStatus::Error
        );
    }

    #[tokio::test]
    async fn test_empty_stream_fails_without_persisting() {
        let store = seeded_store().await;
        let agg = aggregator(store.clone(), Arc::new(ScriptedTransport::raw(vec![])));

        assert!(matches!(agg.generate(DATE).await, Err(Error::EmptyStream)));
        assert_eq!(store.suggestion_count(), 0);

        let progress = agg.progress();
        assert_eq!(progress.status, GenerationStatus::Error);
        assert!(progress
            .categories
            .iter()
            .all(|(_, s)| s.status == CategoryStatus::Error));
    }

    #[tokio::test]
    async fn test_malformed_frame_dropped() {
        let store = seeded_store().await;
        let transport = Arc::new(ScriptedTransport::raw(vec![
            b"data: {not json\n\n".to_vec(),
            format!("data: {}\n\n", single("nutrition", "x")).into_bytes(),
            b"data: {\"type\":\"complete\"}\n\n".to_vec(),
        ]));
        let agg = aggregator(store, transport);

        let record = agg.generate(DATE).await.unwrap();
        assert_eq!(record.suggestions[0].suggestions, vec![json!("x")]);
    }

    #[tokio::test]
    async fn test_stalled_stream() {
        let store = seeded_store().await;
        let mut transport = ScriptedTransport::frames(&[single("nutrition", "x")]);
        transport.hang = true;
        let agg = aggregator(store.clone(), Arc::new(transport));

        let err = agg.generate(DATE).await.unwrap_err();
        assert!(matches!(err, Error::StreamStalled(_)));
        assert_eq!(store.suggestion_count(), 0);
        assert_eq!(agg.progress().status, GenerationStatus::Error);
    }

    #[tokio::test]
    async fn test_fatal_frame() {
        let store = seeded_store().await;
        let transport = Arc::new(ScriptedTransport::frames(&[
            single("nutrition", "x"),
            json!({"type": "fatal", "message": "quota gone"}),
            json!({"type": "complete"}),
        ]));
        let agg = aggregator(store.clone(), transport);

        let err = agg.generate(DATE).await.unwrap_err();
        assert!(matches!(err, Error::StreamFatal(ref m) if m == "quota gone"));
        assert_eq!(store.suggestion_count(), 0);
        assert_eq!(agg.progress().message.as_deref(), Some(err.to_string().as_str()));
    }

    #[tokio::test]
    async fn test_close_without_complete() {
        let store = seeded_store().await;
        let agg = aggregator(
            store.clone(),
            Arc::new(ScriptedTransport::frames(&[single("nutrition", "kept")])),
        );
        let record = agg.generate(DATE).await.unwrap();
        assert_eq!(record.suggestions[0].suggestions, vec![json!("kept")]);
        assert_eq!(store.suggestion_count(), 1);

        let agg = aggregator(
            store,
            Arc::new(ScriptedTransport::frames(&[json!({"type": "heartbeat"})])),
        );
        assert!(matches!(agg.generate(DATE).await, Err(Error::IncompleteStream)));
    }

    #[tokio::test]
    async fn test_trailing_frame_flushed_at_close() {
        let store = seeded_store().await;
        let transport = Arc::new(ScriptedTransport::raw(vec![
            format!("data: {}\n\n", single("nutrition", "x")).into_bytes(),
            b"data: {\"type\":\"complete\",\"processingTime\":7}".to_vec(),
        ]));
        let agg = aggregator(store, transport);
        assert_eq!(agg.generate(DATE).await.unwrap().processing_time, 7);
    }
}
