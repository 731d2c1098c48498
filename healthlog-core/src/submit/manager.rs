//! Propose / commit / rollback around the parse endpoint.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::config::{AiConfig, ModelSelection};
use crate::error::{Error, Result};
use crate::record::{LiveRecord, RecordPatch};
use crate::sync::{PushOutcome, SyncReconciler};
use crate::types::{
    entry_id, placeholder_id, DailyRecord, EntryKind, ExerciseEntry, FoodEntry,
};

use super::{ImageAttachment, ParseRequest, ParseResponse, ParseService, MAX_IMAGES};

/// Releases the per-kind slot when the submission is dropped.
struct Slot {
    in_flight: Arc<Mutex<HashSet<EntryKind>>>,
    kind: EntryKind,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap().remove(&self.kind);
    }
}

/// A proposed submission, waiting for its parse result.
pub struct Submission {
    pub date: String,
    pub kind: EntryKind,
    pub temp_id: String,
    _slot: Slot,
}

/// Result of a committed submission.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub record: DailyRecord,
    /// Entries appended to the submitted list
    pub added: usize,
    pub push: PushOutcome,
}

pub struct SubmissionManager {
    live: Arc<LiveRecord>,
    sync: Arc<SyncReconciler>,
    parser: Arc<dyn ParseService>,
    models: ModelSelection,
    language: String,
    in_flight: Arc<Mutex<HashSet<EntryKind>>>,
}

impl SubmissionManager {
    pub fn new(
        live: Arc<LiveRecord>,
        sync: Arc<SyncReconciler>,
        parser: Arc<dyn ParseService>,
        ai: &AiConfig,
    ) -> Self {
        Self {
            live,
            sync,
            parser,
            models: ai.models(),
            language: ai.language.clone(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Whether a submission of `kind` is in flight.
    pub fn is_processing(&self, kind: EntryKind) -> bool {
        self.in_flight.lock().unwrap().contains(&kind)
    }

    /// Parse `text` (and `images`) into entries of `kind` for `date`.
    ///
    /// Input and model configuration are checked before anything is shown.
    /// On failure the placeholder is rolled back and the error returned.
    pub async fn submit(
        &self,
        date: &str,
        kind: EntryKind,
        text: &str,
        images: Vec<ImageAttachment>,
        user_weight: f64,
    ) -> Result<SubmissionOutcome> {
        if text.trim().is_empty() && images.is_empty() {
            return Err(Error::Validation("nothing to submit".to_string()));
        }
        if images.len() > MAX_IMAGES {
            return Err(Error::Validation(format!(
                "at most {} images per submission, got {}",
                MAX_IMAGES,
                images.len()
            )));
        }
        if images.is_empty() {
            self.models.agent_model.validate("agent_model")?;
        } else {
            self.models.vision_model.validate("vision_model")?;
        }

        let submission = self.propose(date, kind, text, user_weight).await?;

        let request = ParseRequest {
            text: text.to_string(),
            kind,
            language: self.language.clone(),
            user_weight,
            images,
            models: self.models.clone(),
        };

        let parsed = match self.parser.parse(&request).await {
            Ok(response) => match response.error.as_deref() {
                Some(message) if !message.is_empty() => Err(Error::Parse(message.to_string())),
                _ => Ok(response),
            },
            Err(e) => Err(e),
        };

        match parsed {
            Ok(response) => self.commit(submission, response).await,
            Err(e) => {
                tracing::warn!(date, kind = %kind, error = %e, "Submission failed");
                self.rollback(submission).await;
                Err(e)
            }
        }
    }

    /// Claim the slot for `kind` and show a placeholder for `text`.
    pub async fn propose(
        &self,
        date: &str,
        kind: EntryKind,
        text: &str,
        user_weight: f64,
    ) -> Result<Submission> {
        if !self.in_flight.lock().unwrap().insert(kind) {
            return Err(Error::SubmissionInFlight(kind));
        }
        let slot = Slot {
            in_flight: Arc::clone(&self.in_flight),
            kind,
        };

        let temp_id = placeholder_id();
        let shown = self
            .live
            .edit_in_memory(date, |record| match kind {
                EntryKind::Food => record
                    .food_entries
                    .push(FoodEntry::placeholder(&temp_id, text)),
                EntryKind::Exercise => record
                    .exercise_entries
                    .push(ExerciseEntry::placeholder(&temp_id, text, user_weight)),
            })
            .await;

        tracing::debug!(date, kind = %kind, temp_id = %temp_id, shown, "Proposed submission");
        Ok(Submission {
            date: date.to_string(),
            kind,
            temp_id,
            _slot: slot,
        })
    }

    /// Replace the placeholder with the parsed entries, persist, push.
    ///
    /// Entries get fresh ids; ids in the response are ignored. Only the list
    /// for the submission's kind is extended.
    pub async fn commit(
        &self,
        submission: Submission,
        response: ParseResponse,
    ) -> Result<SubmissionOutcome> {
        let kind = submission.kind;
        let temp_id = submission.temp_id.clone();

        let new_food: Vec<FoodEntry> = response
            .food
            .into_iter()
            .map(|mut e| {
                e.log_id = entry_id();
                e.is_pending = false;
                e
            })
            .collect();
        let new_exercise: Vec<ExerciseEntry> = response
            .exercise
            .into_iter()
            .map(|mut e| {
                e.log_id = entry_id();
                e.is_pending = false;
                e
            })
            .collect();
        let added = match kind {
            EntryKind::Food => new_food.len(),
            EntryKind::Exercise => new_exercise.len(),
        };

        let updated = self
            .live
            .update(&submission.date, |record| match kind {
                EntryKind::Food => {
                    let mut food: Vec<FoodEntry> = record
                        .food_entries
                        .iter()
                        .filter(|e| e.log_id != temp_id)
                        .cloned()
                        .collect();
                    food.extend(new_food);
                    RecordPatch {
                        food_entries: Some(food),
                        ..Default::default()
                    }
                }
                EntryKind::Exercise => {
                    let mut exercise: Vec<ExerciseEntry> = record
                        .exercise_entries
                        .iter()
                        .filter(|e| e.log_id != temp_id)
                        .cloned()
                        .collect();
                    exercise.extend(new_exercise);
                    RecordPatch {
                        exercise_entries: Some(exercise),
                        ..Default::default()
                    }
                }
            })
            .await;

        let record = match updated {
            Ok((record, _)) => record,
            Err(e) => {
                tracing::error!(date = %submission.date, error = %e, "Failed to persist submission");
                self.rollback(submission).await;
                return Err(e);
            }
        };

        let push = self
            .sync
            .push(
                &submission.date,
                &RecordPatch::entries_of(&record.without_placeholders()),
            )
            .await;

        tracing::info!(date = %submission.date, kind = %kind, added, "Committed submission");
        Ok(SubmissionOutcome {
            record,
            added,
            push,
        })
    }

    /// Drop the placeholder; the record is left as it was before propose.
    pub async fn rollback(&self, submission: Submission) {
        let temp_id = submission.temp_id.clone();
        let kind = submission.kind;
        self.live
            .edit_in_memory(&submission.date, |record| {
                record.remove_entry(kind, &temp_id);
            })
            .await;
        tracing::debug!(date = %submission.date, kind = %kind, "Rolled back submission");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, ModelSource};
    use crate::store::{LocalStore, MemoryStore, OutboxStore};
    use crate::sync::testing::FakeRemote;
    use crate::sync::{RefreshBus, RemoteSync};
    use crate::types::NutritionInfo;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    const DATE: &str = "2024-06-01";

    #[derive(Clone, Copy)]
    enum Behavior {
        Banana,
        Fail,
        ReportError,
    }

    struct FakeParser {
        behavior: Behavior,
        gate: Option<Arc<Notify>>,
    }

    fn banana() -> FoodEntry {
        FoodEntry {
            log_id: "server-id".to_string(),
            food_name: "banana".to_string(),
            consumed_grams: 118.0,
            meal_type: Some("snack".to_string()),
            time_period: None,
            nutritional_info_per_100g: NutritionInfo {
                calories: 89.0,
                ..Default::default()
            },
            total_nutritional_info_consumed: NutritionInfo {
                calories: 105.0,
                carbohydrates: 27.0,
                protein: 1.3,
                fat: 0.4,
                ..Default::default()
            },
            is_estimated: true,
            is_pending: false,
        }
    }

    #[async_trait]
    impl ParseService for FakeParser {
        async fn parse(&self, request: &ParseRequest) -> Result<ParseResponse> {
            if request.kind == EntryKind::Food {
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
            }
            match self.behavior {
                Behavior::Banana => Ok(ParseResponse {
                    food: vec![banana()],
                    ..Default::default()
                }),
                Behavior::Fail => Err(Error::Transport("connection refused".to_string())),
                Behavior::ReportError => Ok(ParseResponse {
                    error: Some("could not understand input".to_string()),
                    ..Default::default()
                }),
            }
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        remote: Arc<FakeRemote>,
        live: Arc<LiveRecord>,
        manager: Arc<SubmissionManager>,
    }

    fn harness(behavior: Behavior, gate: Option<Arc<Notify>>, ai: AiConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(FakeRemote::new());
        let live = Arc::new(LiveRecord::new(store.clone(), DATE));
        let sync = Arc::new(SyncReconciler::new(
            store.clone(),
            Some(remote.clone() as Arc<dyn RemoteSync>),
            RefreshBus::new(),
        ));
        let manager = Arc::new(SubmissionManager::new(
            live.clone(),
            sync,
            Arc::new(FakeParser { behavior, gate }),
            &ai,
        ));
        Harness {
            store,
            remote,
            live,
            manager,
        }
    }

    async fn wait_for_placeholder(live: &LiveRecord, kind: EntryKind) {
        for _ in 0..100 {
            if live.snapshot().await.placeholder_count(kind) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("placeholder never appeared");
    }

    #[tokio::test]
    async fn test_one_banana() {
        let h = harness(Behavior::Banana, None, AiConfig::default());

        let outcome = h
            .manager
            .submit(DATE, EntryKind::Food, "1 banana", vec![], 70.0)
            .await
            .unwrap();

        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.push, PushOutcome::Sent);

        let record = h.live.snapshot().await;
        assert_eq!(record.food_entries.len(), 1);
        assert!(!record.food_entries[0].is_pending);
        assert_ne!(record.food_entries[0].log_id, "server-id");
        assert!(record.summary.total_calories_consumed > 0.0);

        let stored = h.store.get(DATE).await.unwrap().unwrap();
        assert_eq!(stored.food_entries, record.food_entries);

        let pushed = h.remote.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].1.food_entries.as_ref().unwrap().len(), 1);
        assert!(pushed[0].1.summary.is_some());
    }

    #[tokio::test]
    async fn test_failure_rolls_back() {
        let h = harness(Behavior::Fail, None, AiConfig::default());
        let before = h.live.snapshot().await;

        let err = h
            .manager
            .submit(DATE, EntryKind::Food, "1 banana", vec![], 70.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));

        assert_eq!(h.live.snapshot().await, before);
        assert!(h.store.get(DATE).await.unwrap().is_none());
        assert!(h.remote.pushed().is_empty());
        assert!(!h.manager.is_processing(EntryKind::Food));
    }

    #[tokio::test]
    async fn test_reported_parse_error_rolls_back() {
        let h = harness(Behavior::ReportError, None, AiConfig::default());

        let err = h
            .manager
            .submit(DATE, EntryKind::Exercise, "ran a bit", vec![], 70.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse(ref m) if m == "could not understand input"));
        assert_eq!(h.live.snapshot().await.placeholder_count(EntryKind::Exercise), 0);
    }

    #[tokio::test]
    async fn test_second_submission_rejected_while_in_flight() {
        let gate = Arc::new(Notify::new());
        let h = harness(Behavior::Banana, Some(gate.clone()), AiConfig::default());

        let first = {
            let manager = h.manager.clone();
            tokio::spawn(async move {
                manager
                    .submit(DATE, EntryKind::Food, "1 banana", vec![], 70.0)
                    .await
            })
        };
        wait_for_placeholder(&h.live, EntryKind::Food).await;
        assert!(h.manager.is_processing(EntryKind::Food));

        let second = h
            .manager
            .submit(DATE, EntryKind::Food, "2 bananas", vec![], 70.0)
            .await;
        assert!(matches!(second, Err(Error::SubmissionInFlight(EntryKind::Food))));
        assert_eq!(h.live.snapshot().await.placeholder_count(EntryKind::Food), 1);

        // The other kind is not blocked
        h.manager
            .submit(DATE, EntryKind::Exercise, "30 min run", vec![], 70.0)
            .await
            .unwrap();

        gate.notify_one();
        first.await.unwrap().unwrap();

        let record = h.live.snapshot().await;
        assert_eq!(record.placeholder_count(EntryKind::Food), 0);
        assert_eq!(record.food_entries.len(), 1);
    }

    #[tokio::test]
    async fn test_push_failure_keeps_commit() {
        let h = harness(Behavior::Banana, None, AiConfig::default());
        h.remote.set_failing(true);

        let outcome = h
            .manager
            .submit(DATE, EntryKind::Food, "1 banana", vec![], 70.0)
            .await
            .unwrap();

        assert_eq!(outcome.push, PushOutcome::Queued);
        assert_eq!(h.live.snapshot().await.food_entries.len(), 1);
        assert_eq!(h.store.get(DATE).await.unwrap().unwrap().food_entries.len(), 1);
        assert_eq!(h.store.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_targets_submission_date() {
        let gate = Arc::new(Notify::new());
        let h = harness(Behavior::Banana, Some(gate.clone()), AiConfig::default());

        let pending = {
            let manager = h.manager.clone();
            tokio::spawn(async move {
                manager
                    .submit(DATE, EntryKind::Food, "1 banana", vec![], 70.0)
                    .await
            })
        };
        wait_for_placeholder(&h.live, EntryKind::Food).await;

        h.live.select("2024-06-02").await;
        gate.notify_one();
        pending.await.unwrap().unwrap();

        assert!(!h.live.snapshot().await.has_entries());
        let stored = h.store.get(DATE).await.unwrap().unwrap();
        assert_eq!(stored.food_entries.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_before_propose() {
        let ai = AiConfig {
            agent_model: ModelConfig {
                source: ModelSource::Private,
                ..Default::default()
            },
            ..Default::default()
        };
        let h = harness(Behavior::Banana, None, ai);

        let err = h
            .manager
            .submit(DATE, EntryKind::Food, "toast", vec![], 70.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let images = (0..6)
            .map(|i| ImageAttachment {
                file_name: format!("{}.jpg", i),
                mime_type: "image/jpeg".to_string(),
                data: bytes::Bytes::from_static(b"jpeg"),
            })
            .collect();
        let err = h
            .manager
            .submit(DATE, EntryKind::Food, "", images, 70.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert_eq!(h.live.snapshot().await.placeholder_count(EntryKind::Food), 0);
        assert!(!h.manager.is_processing(EntryKind::Food));
    }
}
