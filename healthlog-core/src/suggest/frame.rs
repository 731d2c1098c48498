//! Event-stream framing.
//!
//! Frames are separated by a blank line and carry one `data: <json>` payload.
//! Chunks may end anywhere, including inside a multi-byte character, so the
//! buffer works on bytes and only decodes complete frames.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

const DATA_PREFIX: &str = "data:";

/// Splits a byte stream into frame payloads.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    dropped: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return the payloads of every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut payloads = Vec::new();
        while let Some(end) = find_separator(&self.buf) {
            let frame: Vec<u8> = self.buf.drain(..end + 2).collect();
            if let Some(payload) = self.payload_of(&frame[..end]) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Payload of whatever is left once the stream has closed.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        self.payload_of(&rest)
    }

    /// Frames discarded because they carried no `data:` line.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn payload_of(&mut self, frame: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(frame);
        let text = text.trim();
        // Blank frames and `:` comments are keep-alives
        if text.is_empty() || text.starts_with(':') {
            return None;
        }
        let Some(payload) = text.strip_prefix(DATA_PREFIX) else {
            self.dropped += 1;
            tracing::warn!(frame = %text, "Dropping frame without data");
            return None;
        };
        let payload = payload.trim();
        (!payload.is_empty()).then(|| payload.to_string())
    }
}

fn find_separator(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// How a `partial` frame changes its category.
#[derive(Debug, Clone, PartialEq)]
pub enum PartialUpdate {
    /// The whole category object
    Replace(Value),
    /// One more suggestion for the category
    Append {
        suggestion: Value,
        priority: Option<String>,
        summary: Option<String>,
    },
}

/// Payload of the terminal `complete` frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletePayload {
    pub suggestions: Vec<Value>,
    pub generated_at: Option<DateTime<Utc>>,
    pub key_info: Option<Value>,
    pub processing_time_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Heartbeat,
    Init {
        message: Option<String>,
    },
    Progress {
        category: String,
        message: Option<String>,
    },
    Partial {
        category: String,
        update: PartialUpdate,
    },
    /// One category failed; the others carry on
    Error {
        category: String,
        message: Option<String>,
    },
    Fatal {
        message: Option<String>,
    },
    Complete(CompletePayload),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    is_single_suggestion: bool,
    #[serde(default)]
    suggestions: Option<Vec<Value>>,
    #[serde(default)]
    generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    key_info: Option<Value>,
    #[serde(default)]
    processing_time: Option<u64>,
}

fn required(field: Option<String>, kind: &str) -> Result<String> {
    field
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::Parse(format!("{} frame without category", kind)))
}

fn text_field(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Decode one frame payload.
pub fn parse_event(payload: &str) -> Result<StreamEvent> {
    let raw: RawFrame = serde_json::from_str(payload)
        .map_err(|e| Error::Parse(format!("malformed frame: {}", e)))?;

    let event = match raw.kind.as_str() {
        "heartbeat" => StreamEvent::Heartbeat,
        "init" => StreamEvent::Init {
            message: raw.message,
        },
        "progress" => StreamEvent::Progress {
            category: required(raw.category, "progress")?,
            message: raw.message,
        },
        "partial" => {
            let category = required(raw.category, "partial")?;
            let data = raw
                .data
                .filter(|d| !d.is_null())
                .ok_or_else(|| Error::Parse("partial frame without data".to_string()))?;

            let single = if raw.is_single_suggestion {
                data.get("suggestion").filter(|s| !s.is_null()).cloned()
            } else {
                None
            };
            let update = match single {
                Some(suggestion) => PartialUpdate::Append {
                    suggestion,
                    priority: text_field(&data, "priority"),
                    summary: text_field(&data, "summary"),
                },
                None => PartialUpdate::Replace(data),
            };
            StreamEvent::Partial { category, update }
        }
        "error" => StreamEvent::Error {
            category: required(raw.category, "error")?,
            message: raw.message,
        },
        "fatal" => StreamEvent::Fatal {
            message: raw.message,
        },
        "complete" => StreamEvent::Complete(CompletePayload {
            suggestions: raw.suggestions.unwrap_or_default(),
            generated_at: raw.generated_at,
            key_info: raw.key_info,
            processing_time_ms: raw.processing_time,
        }),
        other => return Err(Error::Parse(format!("unknown frame type {:?}", other))),
    };
    Ok(event)
}
