use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Message, ProcuraError, Role};

/// Latency bookkeeping attached to each persisted turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetrics {
    pub total_time_ms: u64,
    pub time_to_first_token_ms: Option<u64>,
    pub streamed: bool,
    pub fallback: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub message_id: String,
    pub thread_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<TurnMetrics>,
    pub created_at: DateTime<Utc>,
}

impl TranscriptMessage {
    pub fn new(thread_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            role,
            content: content.into(),
            metrics: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_metrics(mut self, metrics: TurnMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn to_message(&self) -> Message {
        Message::new(self.role, self.content.clone())
    }
}

/// Display-side chat history, kept apart from workflow checkpoints.
#[async_trait::async_trait]
pub trait TranscriptStore: Send + Sync + 'static {
    async fn save_message(&self, message: &TranscriptMessage) -> Result<(), ProcuraError>;
    /// Messages of one thread in insertion order.
    async fn load_messages(&self, thread_id: &str) -> Result<Vec<TranscriptMessage>, ProcuraError>;
    async fn clear_thread(&self, thread_id: &str) -> Result<(), ProcuraError>;
}

#[derive(Clone, Default)]
pub struct InMemoryTranscript {
    inner: Arc<RwLock<HashMap<String, Vec<TranscriptMessage>>>>,
}

impl InMemoryTranscript {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TranscriptStore for InMemoryTranscript {
    async fn save_message(&self, message: &TranscriptMessage) -> Result<(), ProcuraError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| ProcuraError::TranscriptFailed("lock".into()))?;
        guard
            .entry(message.thread_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn load_messages(&self, thread_id: &str) -> Result<Vec<TranscriptMessage>, ProcuraError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| ProcuraError::TranscriptFailed("lock".into()))?;
        Ok(guard.get(thread_id).cloned().unwrap_or_default())
    }

    async fn clear_thread(&self, thread_id: &str) -> Result<(), ProcuraError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| ProcuraError::TranscriptFailed("lock".into()))?;
        guard.remove(thread_id);
        Ok(())
    }
}
