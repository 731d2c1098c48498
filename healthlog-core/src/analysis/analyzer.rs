//! Keeps the selected day's TEF analysis in step with its food entries.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{AnalysisConfig, ModelSelection};
use crate::error::{Error, Result};
use crate::record::{with_metabolic_rates, LiveRecord, RecordPatch};
use crate::sync::SyncReconciler;
use crate::types::{DailyRecord, FoodEntry, TefAnalysis, UserProfile};

use super::cache::{content_hash, AnalysisCache};
use super::debounce::Debouncer;
use super::tef::build_analysis;
use super::{TefRequest, TefService};

/// What a change notification led to.
#[derive(Debug, Clone, PartialEq)]
pub enum TefTrigger {
    /// The date is not the selected one
    Skipped,
    /// No food entries and nothing to clear
    Idle,
    /// Entries were emptied; the analysis was removed
    Cleared,
    /// A cached analysis for this content was applied
    CacheHit,
    /// Same content as the last analysis
    Unchanged,
    /// Automatic analysis is off; content noted only
    Disabled,
    /// Analysis will run after the debounce delay
    Scheduled(Duration),
}

pub struct TefAnalyzer {
    live: Arc<LiveRecord>,
    sync: Arc<SyncReconciler>,
    service: Arc<dyn TefService>,
    profile: UserProfile,
    models: ModelSelection,
    auto: bool,
    cache: AnalysisCache,
    debouncer: Debouncer,
    /// (date, hash) of the content last analyzed or scheduled
    last_seen: Mutex<Option<(String, String)>>,
}

fn counted_food(record: &DailyRecord) -> Vec<FoodEntry> {
    record
        .food_entries
        .iter()
        .filter(|e| !e.is_pending)
        .cloned()
        .collect()
}

impl TefAnalyzer {
    pub fn new(
        live: Arc<LiveRecord>,
        sync: Arc<SyncReconciler>,
        service: Arc<dyn TefService>,
        profile: UserProfile,
        models: ModelSelection,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            live,
            sync,
            service,
            profile,
            models,
            auto: config.auto_tef,
            cache: AnalysisCache::default(),
            debouncer: Debouncer::new(config.debounce()),
            last_seen: Mutex::new(None),
        }
    }

    /// Seconds until a scheduled analysis starts; zero when none is waiting.
    pub fn countdown_secs(&self) -> u64 {
        self.debouncer.countdown_secs()
    }

    pub fn is_scheduled(&self) -> bool {
        self.debouncer.remaining().is_some()
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    fn seen(&self, date: &str, hash: &str) -> bool {
        self.last_seen
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|(d, h)| d == date && h == hash)
    }

    fn note_seen(&self, date: &str, hash: Option<String>) {
        *self.last_seen.lock().unwrap() = hash.map(|h| (date.to_string(), h));
    }

    /// React to a change of the selected day's food entries.
    pub async fn on_entries_changed(self: &Arc<Self>, date: &str) -> Result<TefTrigger> {
        let record = self.live.snapshot().await;
        if record.date != date {
            return Ok(TefTrigger::Skipped);
        }
        let food = counted_food(&record);

        if food.is_empty() {
            self.debouncer.cancel();
            self.note_seen(date, None);
            if record.tef_analysis.is_none() {
                return Ok(TefTrigger::Idle);
            }
            self.apply(date, None).await?;
            tracing::debug!(date, "Food entries emptied, cleared TEF analysis");
            return Ok(TefTrigger::Cleared);
        }

        let hash = content_hash(&food);

        if let Some(cached) = self.cache.get(&hash) {
            self.debouncer.cancel();
            self.note_seen(date, Some(hash));
            if record.tef_analysis.as_ref() != Some(&cached) {
                self.apply(date, Some(cached)).await?;
                tracing::debug!(date, "Applied cached TEF analysis");
            }
            return Ok(TefTrigger::CacheHit);
        }

        if self.seen(date, &hash) {
            return Ok(TefTrigger::Unchanged);
        }
        self.note_seen(date, Some(hash));

        if !self.auto {
            return Ok(TefTrigger::Disabled);
        }

        let this = Arc::clone(self);
        let target = date.to_string();
        self.debouncer.schedule(async move {
            match this.run(&target).await {
                Ok(analysis) => tracing::info!(
                    date = %target,
                    enhanced = analysis.enhanced_tef,
                    "TEF analysis updated"
                ),
                Err(e) => tracing::warn!(date = %target, error = %e, "Scheduled TEF analysis failed"),
            }
        });
        tracing::debug!(date, delay = ?self.debouncer.delay(), "TEF analysis scheduled");
        Ok(TefTrigger::Scheduled(self.debouncer.delay()))
    }

    /// Analyze `date` immediately, bypassing the debounce.
    pub async fn analyze_now(&self, date: &str) -> Result<TefAnalysis> {
        self.debouncer.cancel();
        self.run(date).await
    }

    async fn run(&self, date: &str) -> Result<TefAnalysis> {
        let record = if self.live.date().await == date {
            self.live.snapshot().await
        } else {
            self.live
                .store()
                .get(date)
                .await?
                .unwrap_or_else(|| DailyRecord::empty(date))
        };
        let food = counted_food(&record);
        if food.is_empty() {
            return Err(Error::NoData(date.to_string()));
        }

        let hash = content_hash(&food);
        let response = self
            .service
            .analyze(&TefRequest {
                food_entries: food.clone(),
                ai_config: self.models.clone(),
            })
            .await?;

        let analysis = build_analysis(
            &food,
            response.enhancement_multiplier,
            response.enhancement_factors,
            response.analysis_timestamp,
        );
        self.cache.insert(&hash, analysis.clone());
        self.note_seen(date, Some(hash));
        self.apply(date, Some(analysis.clone())).await?;
        Ok(analysis)
    }

    /// Store `analysis` on the record, recompute BMR/TDEE, push.
    async fn apply(&self, date: &str, analysis: Option<TefAnalysis>) -> Result<DailyRecord> {
        let profile = &self.profile;
        let (record, patch) = self
            .live
            .update(date, |record| {
                with_metabolic_rates(
                    profile,
                    record,
                    RecordPatch {
                        tef_analysis: Some(analysis),
                        ..Default::default()
                    },
                )
            })
            .await?;
        self.sync.push(date, &patch).await;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::TefResponse;
    use crate::config::AnalysisConfig;
    use crate::store::{LocalStore, MemoryStore};
    use crate::sync::testing::FakeRemote;
    use crate::sync::{RefreshBus, RemoteSync};
    use crate::types::NutritionInfo;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DATE: &str = "2024-06-01";

    struct FakeTef {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TefService for FakeTef {
        async fn analyze(&self, _request: &TefRequest) -> Result<TefResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TefResponse {
                enhancement_multiplier: 1.2,
                enhancement_factors: vec!["Protein-rich meal".to_string()],
                analysis_timestamp: None,
            })
        }
    }

    fn chicken(grams: f64) -> FoodEntry {
        FoodEntry {
            log_id: "c1".to_string(),
            food_name: "chicken breast".to_string(),
            consumed_grams: grams,
            meal_type: Some("dinner".to_string()),
            time_period: None,
            nutritional_info_per_100g: NutritionInfo::default(),
            total_nutritional_info_consumed: NutritionInfo {
                calories: grams * 1.65,
                protein: grams * 0.31,
                fat: grams * 0.036,
                ..Default::default()
            },
            is_estimated: true,
            is_pending: false,
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        live: Arc<LiveRecord>,
        service: Arc<FakeTef>,
        remote: Arc<FakeRemote>,
        analyzer: Arc<TefAnalyzer>,
    }

    fn harness(debounce: Duration, auto: bool) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(FakeRemote::new());
        let live = Arc::new(LiveRecord::new(store.clone(), DATE));
        let sync = Arc::new(SyncReconciler::new(
            store.clone(),
            Some(remote.clone() as Arc<dyn RemoteSync>),
            RefreshBus::new(),
        ));
        let service = Arc::new(FakeTef {
            calls: AtomicUsize::new(0),
        });
        let config = AnalysisConfig {
            auto_tef: auto,
            debounce_secs: 15,
        };
        let mut analyzer = TefAnalyzer::new(
            live.clone(),
            sync,
            service.clone(),
            UserProfile::default(),
            ModelSelection::default(),
            &config,
        );
        analyzer.debouncer = Debouncer::new(debounce);
        Harness {
            store,
            live,
            service,
            remote,
            analyzer: Arc::new(analyzer),
        }
    }

    async fn set_food(live: &LiveRecord, food: Vec<FoodEntry>) {
        live.apply(
            DATE,
            RecordPatch {
                food_entries: Some(food),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_debounced_analysis_applies_and_caches() {
        let h = harness(Duration::from_millis(40), true);
        set_food(&h.live, vec![chicken(200.0)]).await;

        let trigger = h.analyzer.on_entries_changed(DATE).await.unwrap();
        assert_eq!(trigger, TefTrigger::Scheduled(Duration::from_millis(40)));
        assert!(h.analyzer.is_scheduled());

        // Same content again does not restart anything
        assert_eq!(
            h.analyzer.on_entries_changed(DATE).await.unwrap(),
            TefTrigger::Unchanged
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.service.calls.load(Ordering::SeqCst), 1);

        let record = h.live.snapshot().await;
        let analysis = record.tef_analysis.clone().unwrap();
        assert_eq!(analysis.enhancement_multiplier, 1.2);
        assert_eq!(analysis.enhancement_factors, vec!["Protein-rich meal"]);
        assert!(record.calculated_tdee.is_some());
        assert_eq!(h.store.get(DATE).await.unwrap().unwrap().tef_analysis, Some(analysis));
        assert_eq!(h.analyzer.cache().len(), 1);
        assert!(h.remote.pushed().iter().any(|(_, p)| p.tef_analysis.is_some()));
    }

    #[tokio::test]
    async fn test_cache_hit_applies_immediately() {
        let h = harness(Duration::from_secs(15), true);
        set_food(&h.live, vec![chicken(200.0)]).await;
        h.analyzer.analyze_now(DATE).await.unwrap();

        set_food(&h.live, vec![chicken(250.0)]).await;
        assert!(matches!(
            h.analyzer.on_entries_changed(DATE).await.unwrap(),
            TefTrigger::Scheduled(_)
        ));

        // Back to the analyzed content: cached result, countdown cancelled
        set_food(&h.live, vec![chicken(200.0)]).await;
        assert_eq!(
            h.analyzer.on_entries_changed(DATE).await.unwrap(),
            TefTrigger::CacheHit
        );
        assert_eq!(h.analyzer.countdown_secs(), 0);
        assert_eq!(h.service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_emptied_list_clears_immediately() {
        let h = harness(Duration::from_secs(15), true);
        set_food(&h.live, vec![chicken(200.0)]).await;
        h.analyzer.analyze_now(DATE).await.unwrap();
        let with_tef = h.live.snapshot().await.calculated_tdee.unwrap();

        set_food(&h.live, vec![]).await;
        assert_eq!(
            h.analyzer.on_entries_changed(DATE).await.unwrap(),
            TefTrigger::Cleared
        );
        let record = h.live.snapshot().await;
        assert!(record.tef_analysis.is_none());
        assert!(record.calculated_tdee.unwrap() < with_tef);

        assert_eq!(
            h.analyzer.on_entries_changed(DATE).await.unwrap(),
            TefTrigger::Idle
        );
    }

    #[tokio::test]
    async fn test_auto_disabled_and_manual_analysis() {
        let h = harness(Duration::from_millis(10), false);
        assert!(matches!(h.analyzer.analyze_now(DATE).await, Err(Error::NoData(_))));

        set_food(&h.live, vec![chicken(100.0)]).await;
        assert_eq!(
            h.analyzer.on_entries_changed(DATE).await.unwrap(),
            TefTrigger::Disabled
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(h.service.calls.load(Ordering::SeqCst), 0);

        let analysis = h.analyzer.analyze_now(DATE).await.unwrap();
        assert!(analysis.enhanced_tef > analysis.base_tef);
    }

    #[tokio::test]
    async fn test_other_date_skipped() {
        let h = harness(Duration::from_millis(10), true);
        assert_eq!(
            h.analyzer.on_entries_changed("2024-05-31").await.unwrap(),
            TefTrigger::Skipped
        );
    }
}
