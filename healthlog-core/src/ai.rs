//! HTTP client for the AI endpoints
//!
//! One client serves the parse, suggestion and TEF endpoints. Every request
//! carries the model selection as `aiConfig`. Attempts are bounded by the
//! per-attempt timeout (time to a response, not to the end of the body) and
//! transient failures are retried with linear backoff.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::RequestBuilder;
use serde_json::json;

use crate::analysis::{TefRequest, TefResponse, TefService};
use crate::config::AiConfig;
use crate::error::{Error, Result};
use crate::submit::{ParseRequest, ParseResponse, ParseService};
use crate::suggest::{ByteStream, SuggestionRequest, SuggestionTransport};

pub const PARSE_PATH: &str = "/api/openai/parse-shared";
pub const PARSE_WITH_IMAGES_PATH: &str = "/api/openai/parse-with-images";
pub const SUGGESTIONS_PATH: &str = "/api/openai/smart-suggestions-shared";
pub const TEF_PATH: &str = "/api/openai/tef-analysis-shared";

/// HTTP client for the AI API
pub struct HttpAiClient {
    config: AiConfig,
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpAiClient {
    /// Create a new client from configuration
    ///
    /// Returns an error if `ai.server_url` is missing.
    pub fn new(config: AiConfig) -> Result<Self> {
        let base_url = config
            .server_url
            .clone()
            .ok_or_else(|| Error::Config("ai.server_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("healthlog/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            base_url,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send the request built by `build`, retrying transient failures.
    ///
    /// `build` runs once per attempt since multipart bodies cannot be reused.
    async fn send_with_retry<F>(&self, what: &str, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> Result<RequestBuilder> + Send + Sync,
    {
        let timeout = self.config.request_timeout();
        let attempts = self.config.max_retries + 1;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.config.retry_backoff() * (attempt - 1);
                tracing::debug!(
                    "Retrying {} (attempt {}/{}), waiting {:?}",
                    what,
                    attempt,
                    attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            let error = match tokio::time::timeout(timeout, build()?.send()).await {
                Err(_) => Error::Timeout(format!("{} took longer than {:?}", what, timeout)),
                Ok(Err(e)) => Error::from_reqwest(what, e),
                Ok(Ok(response)) if response.status().is_success() => return Ok(response),
                Ok(Ok(response)) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    Error::from_response(status, &body)
                }
            };

            if !error.is_retryable() || attempt == attempts {
                return Err(error);
            }
            tracing::warn!(what, attempt, error = %error, "Transient AI request failure");
        }

        Err(Error::Transport(format!("{}: max retries exceeded", what)))
    }
}

/// JSON body of a text-only parse request.
fn parse_body(request: &ParseRequest) -> serde_json::Value {
    json!({
        "text": request.text,
        "lang": request.language,
        "type": request.kind.as_str(),
        "userWeight": request.user_weight,
        "aiConfig": request.models,
    })
}

/// Multipart body of a parse request with images.
fn parse_form(request: &ParseRequest) -> Result<Form> {
    let ai_config = serde_json::to_string(&request.models)?;
    let mut form = Form::new()
        .text("text", request.text.clone())
        .text("lang", request.language.clone())
        .text("type", request.kind.as_str())
        .text("userWeight", request.user_weight.to_string())
        .text("aiConfig", ai_config);

    for (index, image) in request.images.iter().enumerate() {
        let part = Part::bytes(image.data.to_vec())
            .file_name(image.file_name.clone())
            .mime_str(&image.mime_type)
            .map_err(|e| {
                Error::Validation(format!("invalid image type {:?}: {}", image.mime_type, e))
            })?;
        form = form.part(format!("image{}", index), part);
    }
    Ok(form)
}

#[async_trait]
impl ParseService for HttpAiClient {
    async fn parse(&self, request: &ParseRequest) -> Result<ParseResponse> {
        let response = if request.images.is_empty() {
            let body = parse_body(request);
            let url = self.url(PARSE_PATH);
            self.send_with_retry("parse", || Ok(self.http_client.post(&url).json(&body)))
                .await?
        } else {
            let url = self.url(PARSE_WITH_IMAGES_PATH);
            self.send_with_retry("parse with images", || {
                Ok(self.http_client.post(&url).multipart(parse_form(request)?))
            })
            .await?
        };

        response
            .json()
            .await
            .map_err(|e| Error::Parse(format!("unreadable parse response: {}", e)))
    }
}

#[async_trait]
impl SuggestionTransport for HttpAiClient {
    async fn open(&self, request: &SuggestionRequest) -> Result<ByteStream> {
        let url = self.url(SUGGESTIONS_PATH);
        let response = self
            .send_with_retry("suggestions", || Ok(self.http_client.post(&url).json(request)))
            .await?;

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::from_reqwest("suggestion stream", e)));
        Ok(Box::pin(body))
    }
}

#[async_trait]
impl TefService for HttpAiClient {
    async fn analyze(&self, request: &TefRequest) -> Result<TefResponse> {
        let url = self.url(TEF_PATH);
        let response = self
            .send_with_retry("tef analysis", || Ok(self.http_client.post(&url).json(request)))
            .await?;

        response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("unreadable TEF response: {}", e)))
    }
}
