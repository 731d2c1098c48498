//! HTTP client for the sync server
//!
//! Records are exchanged as whole JSON documents keyed by date; pushes send a
//! [`RecordPatch`] that the server merges field by field.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::record::RecordPatch;
use crate::types::DailyRecord;

use super::RemoteSync;

/// Response from GET /api/sync/logs
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PullAllResponse {
    Wrapped { logs: Vec<DailyRecord> },
    Bare(Vec<DailyRecord>),
}

/// HTTP client for the sync API
pub struct SyncClient {
    config: SyncConfig,
    http_client: reqwest::Client,
    base_url: String,
}

impl SyncClient {
    /// Create a new sync client from configuration
    ///
    /// Returns an error if the configuration is invalid or missing required fields.
    pub fn new(config: SyncConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .server_url
            .clone()
            .ok_or_else(|| Error::Config("sync.server_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        // Build default headers
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &config.api_key {
            let auth_value = format!("Bearer {}", api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
            );
        }

        headers.insert(
            "X-Device-ID",
            HeaderValue::from_str(&config.device_id())
                .map_err(|e| Error::Config(format!("invalid device_id: {}", e)))?,
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            base_url,
        })
    }

    fn log_url(&self, date: &str) -> String {
        format!(
            "{}/api/sync/logs/{}",
            self.base_url,
            urlencoding::encode(date)
        )
    }

    /// Send one patch, no retries.
    async fn send_patch(&self, date: &str, patch: &RecordPatch) -> Result<()> {
        let response = self
            .http_client
            .post(self.log_url(date))
            .json(patch)
            .send()
            .await
            .map_err(|e| Error::from_reqwest("push failed", e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::from_response(status.as_u16(), &body))
        }
    }

    /// Send a patch with retry logic
    ///
    /// Retries transient failures (5xx, timeouts) with exponential backoff.
    pub async fn send_patch_with_retry(&self, date: &str, patch: &RecordPatch) -> Result<()> {
        let mut last_error = None;
        let mut delay = Duration::from_millis(500);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::debug!(
                    "Retrying push for {} (attempt {}/{}), waiting {:?}",
                    date,
                    attempt + 1,
                    self.config.max_retries + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }

            match self.send_patch(date, patch).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(date, error = %e, "Transient error pushing patch");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Transport("max retries exceeded".to_string())))
    }
}

#[async_trait]
impl RemoteSync for SyncClient {
    async fn push(&self, date: &str, patch: &RecordPatch) -> Result<()> {
        self.send_patch_with_retry(date, patch).await
    }

    async fn pull(&self, date: &str) -> Result<Option<DailyRecord>> {
        let response = self
            .http_client
            .get(self.log_url(date))
            .send()
            .await
            .map_err(|e| Error::from_reqwest("pull failed", e))?;

        let status = response.status();

        if status.is_success() {
            let record: DailyRecord = response
                .json()
                .await
                .map_err(|e| Error::Transport(format!("failed to parse record: {}", e)))?;
            Ok(Some(record))
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Ok(None)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::from_response(status.as_u16(), &body))
        }
    }

    async fn pull_all(&self, force: bool) -> Result<Vec<DailyRecord>> {
        let url = format!("{}/api/sync/logs?force={}", self.base_url, force);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::from_reqwest("pull failed", e))?;

        let status = response.status();

        if status.is_success() {
            let result: PullAllResponse = response
                .json()
                .await
                .map_err(|e| Error::Transport(format!("failed to parse records: {}", e)))?;
            Ok(match result {
                PullAllResponse::Wrapped { logs } => logs,
                PullAllResponse::Bare(logs) => logs,
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::from_response(status.as_u16(), &body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_requires_valid_config() {
        let config = SyncConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(SyncClient::new(config).is_err());
    }

    #[test]
    fn test_client_with_valid_config() {
        let config = SyncConfig {
            enabled: true,
            server_url: Some("https://healthlog.example.com/".to_string()),
            api_key: Some("hl_live_test".to_string()),
            device_id: Some("laptop".to_string()),
            ..Default::default()
        };
        let client = SyncClient::new(config).unwrap();
        assert_eq!(
            client.log_url("2024-06-01"),
            "https://healthlog.example.com/api/sync/logs/2024-06-01"
        );
    }

    #[test]
    fn test_pull_all_accepts_both_shapes() {
        let wrapped: PullAllResponse =
            serde_json::from_str(r#"{"logs":[{"date":"2024-06-01"}]}"#).unwrap();
        let bare: PullAllResponse = serde_json::from_str(r#"[{"date":"2024-06-02"}]"#).unwrap();
        assert!(matches!(wrapped, PullAllResponse::Wrapped { ref logs } if logs.len() == 1));
        assert!(matches!(bare, PullAllResponse::Bare(ref logs) if logs[0].date == "2024-06-02"));
    }
}
