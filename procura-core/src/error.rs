use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcuraError {
    #[error("Capability '{capability}' is unavailable")]
    CapabilityUnavailable { capability: String },
    #[error("LLM provider failed: {0}")]
    LlmProvider(String),
    #[error("Hierarchy lookup failed for '{entity}': {reason}")]
    LookupFailed { entity: String, reason: String },
    #[error("Analytics query failed: {0}")]
    AnalyticsFailed(String),
    #[error("Parsing failed on output '{output}': {reason}")]
    ParseFailed { output: String, reason: String },
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Max retries ({max}) exceeded")]
    MaxRetriesExceeded { max: usize },
    #[error("Checkpoint failed: {0}")]
    CheckpointFailed(String),
    #[error("Transcript store failed: {0}")]
    TranscriptFailed(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Custom(String),
}

impl ProcuraError {
    pub fn unavailable(capability: impl Into<String>) -> Self {
        Self::CapabilityUnavailable {
            capability: capability.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::CapabilityUnavailable { .. })
    }
}
