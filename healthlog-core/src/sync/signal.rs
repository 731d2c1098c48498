//! Date-scoped refresh signals.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// What caused a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RefreshSource {
    /// A pull wrote a remote record locally
    CloudSync,
    /// An entry was deleted
    Delete,
    /// Another local writer changed the record
    Local,
}

impl std::fmt::Display for RefreshSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RefreshSource::CloudSync => "cloudSync",
            RefreshSource::Delete => "delete",
            RefreshSource::Local => "local",
        };
        write!(f, "{}", name)
    }
}

/// "Reload `date`, its stored copy changed."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSignal {
    pub date: String,
    pub source: RefreshSource,
}

/// Broadcast channel shared by the reconciler and every consumer bound to a
/// date.
#[derive(Clone)]
pub struct RefreshBus {
    tx: broadcast::Sender<RefreshSignal>,
}

impl RefreshBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshSignal> {
        self.tx.subscribe()
    }

    /// Publish a signal. Having no subscribers is not an error.
    pub fn emit(&self, date: &str, source: RefreshSource) {
        tracing::debug!(date, %source, "Refresh signal");
        let _ = self.tx.send(RefreshSignal {
            date: date.to_string(),
            source,
        });
    }
}

impl Default for RefreshBus {
    fn default() -> Self {
        Self::new()
    }
}
