use chrono::{DateTime, Utc};
use procura_core::{ProcuraError, Role, TranscriptMessage, TranscriptStore, TurnMetrics};
use sqlx::SqlitePool;

use crate::error::CheckpointSqlError;
use crate::ops::{append_message, delete_messages, load_messages, StoredMessage};

/// Display transcript kept in the `messages` table.
#[derive(Debug, Clone)]
pub struct SqliteTranscriptStore {
    pool: SqlitePool,
}

impl SqliteTranscriptStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn transcript_error(error: CheckpointSqlError) -> ProcuraError {
    ProcuraError::TranscriptFailed(error.to_string())
}

fn decode(stored: StoredMessage) -> Result<TranscriptMessage, CheckpointSqlError> {
    let role: Role = serde_json::from_value(serde_json::Value::String(stored.role.clone()))
        .map_err(|_| CheckpointSqlError::InvalidData(format!("unknown role '{}'", stored.role)))?;
    let metrics = stored
        .metrics_json
        .as_deref()
        .map(serde_json::from_str::<TurnMetrics>)
        .transpose()?;
    let created_at = DateTime::parse_from_rfc3339(&stored.created_at)
        .map_err(|error| CheckpointSqlError::InvalidData(error.to_string()))?
        .with_timezone(&Utc);

    Ok(TranscriptMessage {
        message_id: stored.message_id,
        thread_id: stored.thread_id,
        role,
        content: stored.content,
        metrics,
        created_at,
    })
}

#[async_trait::async_trait]
impl TranscriptStore for SqliteTranscriptStore {
    async fn save_message(&self, message: &TranscriptMessage) -> Result<(), ProcuraError> {
        let metrics = message
            .metrics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        append_message(
            &self.pool,
            &message.thread_id,
            &message.message_id,
            message.role.as_str(),
            &message.content,
            metrics.as_deref(),
            &message.created_at.to_rfc3339(),
        )
        .await
        .map_err(transcript_error)
    }

    async fn load_messages(&self, thread_id: &str) -> Result<Vec<TranscriptMessage>, ProcuraError> {
        load_messages(&self.pool, thread_id)
            .await
            .map_err(transcript_error)?
            .into_iter()
            .map(|stored| decode(stored).map_err(transcript_error))
            .collect()
    }

    async fn clear_thread(&self, thread_id: &str) -> Result<(), ProcuraError> {
        delete_messages(&self.pool, thread_id)
            .await
            .map_err(transcript_error)?;
        Ok(())
    }
}
