use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::error::CheckpointSqlError;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredCheckpoint {
    pub thread_id: String,
    pub seq: i64,
    pub created_at: String,
    pub node: Option<String>,
    pub step: i64,
    pub state_json: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub thread_id: String,
    pub seq: i64,
    pub message_id: String,
    pub role: String,
    pub content: String,
    pub metrics_json: Option<String>,
    pub created_at: String,
}

const INSERT_CHECKPOINT_SQL: &str = "INSERT INTO checkpoints (thread_id, seq, created_at, node, step, state_json) \
    SELECT ?1, COALESCE(MAX(seq), 0) + 1, ?2, ?3, ?4, ?5 FROM checkpoints WHERE thread_id = ?1";

// Single statement, so the version check and the insert are atomic.
const COMPARE_AND_INSERT_CHECKPOINT_SQL: &str = "INSERT INTO checkpoints (thread_id, seq, created_at, node, step, state_json) \
    SELECT ?1, next.seq, ?2, ?3, ?4, ?5 \
    FROM (SELECT COALESCE(MAX(seq), 0) + 1 AS seq FROM checkpoints WHERE thread_id = ?1) AS next \
    WHERE COALESCE((SELECT step FROM checkpoints WHERE thread_id = ?1 ORDER BY seq DESC LIMIT 1), -1) = ?6";

const SELECT_LATEST_CHECKPOINT_SQL: &str = "SELECT thread_id, seq, created_at, node, step, state_json \
    FROM checkpoints WHERE thread_id = ?1 ORDER BY seq DESC LIMIT 1";

const SELECT_CHECKPOINT_HISTORY_SQL: &str = "SELECT thread_id, seq, created_at, node, step, state_json \
    FROM checkpoints WHERE thread_id = ?1 ORDER BY seq ASC";

fn state_to_text<S: Serialize>(state: &S) -> Result<String, CheckpointSqlError> {
    Ok(serde_json::to_string(state)?)
}

fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> Result<StoredCheckpoint, CheckpointSqlError> {
    let state_text: String = row.try_get("state_json").map_err(CheckpointSqlError::Query)?;
    Ok(StoredCheckpoint {
        thread_id: row.try_get("thread_id").map_err(CheckpointSqlError::Query)?,
        seq: row.try_get("seq").map_err(CheckpointSqlError::Query)?,
        created_at: row.try_get("created_at").map_err(CheckpointSqlError::Query)?,
        node: row.try_get("node").map_err(CheckpointSqlError::Query)?,
        step: row.try_get("step").map_err(CheckpointSqlError::Query)?,
        state_json: serde_json::from_str(&state_text)?,
    })
}

pub async fn save_checkpoint<S: Serialize>(
    pool: &SqlitePool,
    thread_id: &str,
    node: &str,
    step: i64,
    created_at: &str,
    state: &S,
) -> Result<(), CheckpointSqlError> {
    sqlx::query(INSERT_CHECKPOINT_SQL)
        .bind(thread_id)
        .bind(created_at)
        .bind(node)
        .bind(step)
        .bind(state_to_text(state)?)
        .execute(pool)
        .await
        .map_err(CheckpointSqlError::Query)?;
    Ok(())
}

/// Inserts only if the thread's latest step equals `expected_step` (`None`
/// for an empty thread). Returns whether the row was written.
pub async fn compare_and_save_checkpoint<S: Serialize>(
    pool: &SqlitePool,
    thread_id: &str,
    node: &str,
    step: i64,
    created_at: &str,
    state: &S,
    expected_step: Option<i64>,
) -> Result<bool, CheckpointSqlError> {
    let result = sqlx::query(COMPARE_AND_INSERT_CHECKPOINT_SQL)
        .bind(thread_id)
        .bind(created_at)
        .bind(node)
        .bind(step)
        .bind(state_to_text(state)?)
        .bind(expected_step.unwrap_or(-1))
        .execute(pool)
        .await
        .map_err(CheckpointSqlError::Query)?;
    Ok(result.rows_affected() == 1)
}

pub async fn load_latest_checkpoint(
    pool: &SqlitePool,
    thread_id: &str,
) -> Result<Option<StoredCheckpoint>, CheckpointSqlError> {
    let row = sqlx::query(SELECT_LATEST_CHECKPOINT_SQL)
        .bind(thread_id)
        .fetch_optional(pool)
        .await
        .map_err(CheckpointSqlError::Query)?;
    row.as_ref().map(row_to_checkpoint).transpose()
}

pub async fn load_checkpoint_history(
    pool: &SqlitePool,
    thread_id: &str,
) -> Result<Vec<StoredCheckpoint>, CheckpointSqlError> {
    let rows = sqlx::query(SELECT_CHECKPOINT_HISTORY_SQL)
        .bind(thread_id)
        .fetch_all(pool)
        .await
        .map_err(CheckpointSqlError::Query)?;
    rows.iter().map(row_to_checkpoint).collect()
}

pub async fn delete_checkpoints(pool: &SqlitePool, thread_id: &str) -> Result<u64, CheckpointSqlError> {
    let result = sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?1")
        .bind(thread_id)
        .execute(pool)
        .await
        .map_err(CheckpointSqlError::Query)?;
    Ok(result.rows_affected())
}

pub async fn append_message(
    pool: &SqlitePool,
    thread_id: &str,
    message_id: &str,
    role: &str,
    content: &str,
    metrics_json: Option<&str>,
    created_at: &str,
) -> Result<(), CheckpointSqlError> {
    sqlx::query(
        "INSERT INTO messages (thread_id, seq, message_id, role, content, metrics_json, created_at) \
         SELECT ?1, COALESCE(MAX(seq), 0) + 1, ?2, ?3, ?4, ?5, ?6 FROM messages WHERE thread_id = ?1",
    )
    .bind(thread_id)
    .bind(message_id)
    .bind(role)
    .bind(content)
    .bind(metrics_json)
    .bind(created_at)
    .execute(pool)
    .await
    .map_err(CheckpointSqlError::Query)?;
    Ok(())
}

pub async fn load_messages(
    pool: &SqlitePool,
    thread_id: &str,
) -> Result<Vec<StoredMessage>, CheckpointSqlError> {
    let rows = sqlx::query(
        "SELECT thread_id, seq, message_id, role, content, metrics_json, created_at \
         FROM messages WHERE thread_id = ?1 ORDER BY seq ASC",
    )
    .bind(thread_id)
    .fetch_all(pool)
    .await
    .map_err(CheckpointSqlError::Query)?;

    rows.iter()
        .map(|row| {
            Ok(StoredMessage {
                thread_id: row.try_get("thread_id").map_err(CheckpointSqlError::Query)?,
                seq: row.try_get("seq").map_err(CheckpointSqlError::Query)?,
                message_id: row.try_get("message_id").map_err(CheckpointSqlError::Query)?,
                role: row.try_get("role").map_err(CheckpointSqlError::Query)?,
                content: row.try_get("content").map_err(CheckpointSqlError::Query)?,
                metrics_json: row.try_get("metrics_json").map_err(CheckpointSqlError::Query)?,
                created_at: row.try_get("created_at").map_err(CheckpointSqlError::Query)?,
            })
        })
        .collect()
}

pub async fn delete_messages(pool: &SqlitePool, thread_id: &str) -> Result<u64, CheckpointSqlError> {
    let result = sqlx::query("DELETE FROM messages WHERE thread_id = ?1")
        .bind(thread_id)
        .execute(pool)
        .await
        .map_err(CheckpointSqlError::Query)?;
    Ok(result.rows_affected())
}
