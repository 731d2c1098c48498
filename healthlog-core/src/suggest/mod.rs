//! Streaming suggestions
//!
//! The suggestion endpoint answers with a long-lived event stream. Frames are
//! decoded by [`frame`], folded into the growing suggestion set by
//! [`merger`], and tracked per category by [`progress`]. The
//! [`SuggestionAggregator`] ties them together: it owns the watchdog, publishes
//! every intermediate set on a watch channel, and persists the final set keyed
//! by analysis date.
//!
//! ```text
//! transport ─bytes─► FrameBuffer ─payload─► parse_event ─► StreamEvent
//!                                                            │
//!                     GenerationProgress ◄───────────────────┤
//!                     PartialResultMerger ◄──────────────────┘
//!                             │
//!                  SuggestionSnapshot (watch) ──► SuggestionStore
//! ```

mod aggregator;
pub mod frame;
mod merger;
pub mod progress;

pub use aggregator::{
    ByteStream, SuggestionAggregator, SuggestionRequest, SuggestionTransport, RECENT_DAYS,
};
pub use frame::{CompletePayload, FrameBuffer, PartialUpdate, StreamEvent};
pub use merger::{CategorySuggestion, PartialResultMerger, SuggestionRecord, SuggestionSnapshot};
pub use progress::{CategoryState, CategoryStatus, GenerationProgress, GenerationStatus};
