//! Error types for healthlog-core

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::types::EntryKind;

/// Main error type for the healthlog-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Local record store failure
    #[error("local store error: {0}")]
    Store(String),

    /// Connection refused, DNS failure, aborted request
    #[error("transport error: {0}")]
    Transport(String),

    /// A single attempt ran past its deadline
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Server-side 5xx
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Any other non-success response
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// 429 / LIMIT_EXCEEDED
    #[error("daily AI usage limit reached ({current}/{limit})")]
    RateLimited { current: String, limit: String },

    /// 401 / UNAUTHORIZED
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// 503 / SHARED_KEYS_EXHAUSTED
    #[error("shared AI capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// 408 / REQUEST_TIMEOUT
    #[error("AI service timed out: {0} (a private model configuration may be more reliable)")]
    ServerTimeout(String),

    /// The parse endpoint reported a failure in its body
    #[error("parse failed: {0}")]
    Parse(String),

    /// Stream closed cleanly without a single frame
    #[error("no data received from the suggestion stream")]
    EmptyStream,

    /// Watchdog fired
    #[error("suggestion stream stalled: no data for {0:?}")]
    StreamStalled(Duration),

    /// Server sent a `fatal` frame
    #[error("suggestion generation failed: {0}")]
    StreamFatal(String),

    /// Stream closed after some frames but before anything usable arrived
    #[error("suggestion stream ended before completion")]
    IncompleteStream,

    /// Another submission for the same entry kind has not resolved yet
    #[error("a {0} submission is already in progress")]
    SubmissionInFlight(EntryKind),

    /// Caller input rejected before any work started
    #[error("validation error: {0}")]
    Validation(String),

    /// Record has nothing to analyze
    #[error("no data for {0}")]
    NoData(String),
}

impl Error {
    /// Whether another attempt might succeed (connection failures, timeouts, 5xx).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Timeout(_) | Error::Server { .. }
        )
    }

    /// Build a transport or timeout error from a reqwest failure.
    pub(crate) fn from_reqwest(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(format!("{}: {}", context, err))
        } else if let Some(status) = err.status().filter(|s| s.is_server_error()) {
            Error::Server {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Error::Transport(format!("{}: {}", context, err))
        }
    }
}

/// Structured error body returned by the sync and AI endpoints.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    details: Option<ErrorDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetails {
    #[serde(default)]
    current_usage: Option<serde_json::Value>,
    #[serde(default)]
    daily_limit: Option<serde_json::Value>,
}

fn value_text(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => "unknown".to_string(),
        Some(other) => other.to_string(),
    }
}

impl Error {
    /// Classify a non-success response from its status and body.
    pub(crate) fn from_response(status: u16, body: &str) -> Self {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        let message = parsed.error.clone().unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("HTTP {}", status)
            } else {
                trimmed.to_string()
            }
        });

        match (status, parsed.code.as_deref()) {
            (429, Some("LIMIT_EXCEEDED")) => {
                let details = parsed.details.unwrap_or_default();
                Error::RateLimited {
                    current: value_text(details.current_usage.as_ref()),
                    limit: value_text(details.daily_limit.as_ref()),
                }
            }
            (401, _) => Error::Unauthorized(message),
            (503, Some("SHARED_KEYS_EXHAUSTED")) => Error::CapacityExhausted(message),
            (408, Some("REQUEST_TIMEOUT")) => Error::ServerTimeout(message),
            (s, _) if s >= 500 => Error::Server { status, message },
            _ => Error::Api {
                status,
                code: parsed.code,
                message,
            },
        }
    }
}

/// Result type alias for healthlog-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(Error::Transport("connection refused".into()).is_retryable());
        assert!(Error::Timeout("90s".into()).is_retryable());
        assert!(Error::Server {
            status: 502,
            message: "bad gateway".into()
        }
        .is_retryable());

        assert!(!Error::Unauthorized("login".into()).is_retryable());
        assert!(!Error::RateLimited {
            current: "20".into(),
            limit: "20".into()
        }
        .is_retryable());
        assert!(!Error::Api {
            status: 400,
            code: None,
            message: "bad request".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_structured_error_bodies() {
        let err = Error::from_response(
            429,
            r#"{"error":"limit","code":"LIMIT_EXCEEDED","details":{"currentUsage":20,"dailyLimit":"20"}}"#,
        );
        match err {
            Error::RateLimited { current, limit } => {
                assert_eq!(current, "20");
                assert_eq!(limit, "20");
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            Error::from_response(401, r#"{"error":"login","code":"UNAUTHORIZED"}"#),
            Error::Unauthorized(_)
        ));
        assert!(matches!(
            Error::from_response(503, r#"{"error":"all keys used","code":"SHARED_KEYS_EXHAUSTED"}"#),
            Error::CapacityExhausted(m) if m == "all keys used"
        ));
        assert!(matches!(
            Error::from_response(408, r#"{"code":"REQUEST_TIMEOUT"}"#),
            Error::ServerTimeout(_)
        ));

        // A bare 503 is an ordinary server error and may be retried
        let bare = Error::from_response(503, "upstream down");
        assert!(bare.is_retryable());

        let other = Error::from_response(400, r#"{"error":"bad","code":"INVALID"}"#);
        assert!(matches!(
            other,
            Error::Api { status: 400, code: Some(ref c), .. } if c == "INVALID"
        ));
    }

    #[test]
    fn test_server_timeout_mentions_private_config() {
        let msg = Error::ServerTimeout("took too long".into()).to_string();
        assert!(msg.contains("private model configuration"));
    }
}
