//! Wiring of the core components for one CLI invocation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use healthlog_core::ai::HttpAiClient;
use healthlog_core::analysis::TefAnalyzer;
use healthlog_core::submit::{ImageAttachment, SubmissionManager, MAX_IMAGES};
use healthlog_core::suggest::SuggestionAggregator;
use healthlog_core::sync::{RefreshBus, RemoteSync, SyncClient};
use healthlog_core::{Config, DailyTracker, LiveRecord, SqliteStore, Storage, SyncReconciler};
use tokio::task::JoinHandle;

/// Everything a command may need. AI-backed parts are `None` until
/// `ai.server_url` is configured.
pub struct App {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub tracker: Arc<DailyTracker>,
    pub submissions: Option<SubmissionManager>,
    pub suggestions: Option<SuggestionAggregator>,
    pub tef: Option<Arc<TefAnalyzer>>,
}

impl App {
    pub fn open(config: Config, date: &str) -> Result<Self> {
        let db_path = Config::database_path();
        tracing::info!(path = %db_path.display(), "Opening database");

        let store = Arc::new(SqliteStore::open(&db_path).context("failed to open database")?);
        store.migrate().context("failed to run database migrations")?;
        let storage: Arc<dyn Storage> = store.clone();

        let remote: Option<Arc<dyn RemoteSync>> = if config.sync.is_ready() {
            let client = SyncClient::new(config.sync.clone()).context("failed to create sync client")?;
            tracing::info!(
                server_url = %config.sync.server_url.as_deref().unwrap_or(""),
                "Sync enabled"
            );
            Some(Arc::new(client))
        } else {
            None
        };

        let sync = Arc::new(SyncReconciler::new(storage.clone(), remote, RefreshBus::new()));
        let live = Arc::new(LiveRecord::new(storage.clone(), date));
        let tracker = Arc::new(DailyTracker::new(
            live.clone(),
            sync.clone(),
            config.profile.clone(),
            config.sync.clone(),
        ));

        let (submissions, suggestions, tef) = if config.ai.is_ready() {
            let client = Arc::new(HttpAiClient::new(config.ai.clone()).context("failed to create AI client")?);
            let submissions = SubmissionManager::new(live.clone(), sync.clone(), client.clone(), &config.ai);
            let suggestions =
                SuggestionAggregator::new(storage, client.clone(), config.profile.clone(), &config.ai);
            let tef = Arc::new(TefAnalyzer::new(
                live,
                sync,
                client,
                config.profile.clone(),
                config.ai.models(),
                &config.analysis,
            ));
            (Some(submissions), Some(suggestions), Some(tef))
        } else {
            (None, None, None)
        };

        Ok(Self {
            config,
            store,
            tracker,
            submissions,
            suggestions,
            tef,
        })
    }
}

fn mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

/// Read image files for a submission.
pub fn load_images(paths: &[impl AsRef<Path>]) -> Result<Vec<ImageAttachment>> {
    if paths.len() > MAX_IMAGES {
        anyhow::bail!("at most {} images per submission", MAX_IMAGES);
    }
    paths
        .iter()
        .map(|path| {
            let path = path.as_ref();
            let mime_type = mime_for(path)
                .with_context(|| format!("unsupported image type: {}", path.display()))?;
            let data = std::fs::read(path)
                .with_context(|| format!("failed to read image {}", path.display()))?;
            Ok(ImageAttachment {
                file_name: path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("image")
                    .to_string(),
                mime_type: mime_type.to_string(),
                data: data.into(),
            })
        })
        .collect()
}

/// Wait up to `limit` for a background pull the process would otherwise
/// exit on. Returns false if it did not finish in time.
pub async fn await_follow_up(handle: JoinHandle<()>, limit: Duration) -> bool {
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Follow-up pull aborted");
            true
        }
        Err(_) => false,
    }
}
