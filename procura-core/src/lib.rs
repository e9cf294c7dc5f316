mod capability;
mod error;
mod message;
pub mod output_parsers;
pub mod retry;
mod transcript;

pub use capability::{
    AnalyticsQueryCapability, AnalyticsResponse, ExtractionCapability, HierarchyLevel,
    HierarchyLookupCapability, MULTIPLE_HIERARCHIES, NO_HIERARCHY_IDENTIFIED,
};
pub use error::ProcuraError;
pub use message::{add_message_if_not_exists, deduplicate_messages, render_transcript, Message, Role};
pub use retry::{Jitter, RetryDecision, RetryPolicy};
pub use transcript::{InMemoryTranscript, TranscriptMessage, TranscriptStore, TurnMetrics};

pub type Value = serde_json::Value;
