pub mod error;
pub mod migrations;
pub mod ops;
pub mod schema;
mod transcript;

use std::convert::TryFrom;

use procura_graph::{
    Checkpoint, CheckpointMetadata, Checkpointer, GraphError, HistoryCheckpointer, StateSchema,
};

use crate::error::CheckpointSqlError;
use crate::migrations::run_migrations;
use crate::ops::{
    compare_and_save_checkpoint, delete_checkpoints, load_checkpoint_history,
    load_latest_checkpoint, save_checkpoint, StoredCheckpoint,
};

pub use transcript::SqliteTranscriptStore;

#[derive(Debug, Clone)]
pub struct SqliteCheckpointer {
    pool: sqlx::SqlitePool,
}

#[derive(Debug, Clone)]
pub struct SqliteCheckpointerBuilder {
    database_url: String,
    max_connections: u32,
}

impl SqliteCheckpointer {
    pub fn builder(database_url: impl Into<String>) -> SqliteCheckpointerBuilder {
        SqliteCheckpointerBuilder {
            database_url: database_url.into(),
            max_connections: 1,
        }
    }

    /// Transcript store sharing this checkpointer's pool.
    pub fn transcript_store(&self) -> SqliteTranscriptStore {
        SqliteTranscriptStore::new(self.pool.clone())
    }

    pub fn pool(&self) -> &sqlx::SqlitePool {
        &self.pool
    }
}

impl SqliteCheckpointerBuilder {
    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub async fn build(self) -> Result<SqliteCheckpointer, CheckpointSqlError> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await
            .map_err(CheckpointSqlError::Connection)?;

        run_migrations(&pool).await?;
        tracing::debug!(max_connections = self.max_connections, "sqlite checkpointer ready");

        Ok(SqliteCheckpointer { pool })
    }
}

fn graph_checkpoint_error(message: impl Into<String>) -> GraphError {
    GraphError::Checkpoint(message.into())
}

fn map_sql_error(error: CheckpointSqlError) -> GraphError {
    graph_checkpoint_error(error.to_string())
}

fn to_i64(step: u64) -> Result<i64, GraphError> {
    i64::try_from(step).map_err(|_| graph_checkpoint_error("checkpoint step does not fit into i64"))
}

fn to_u64(step: i64) -> Result<u64, GraphError> {
    u64::try_from(step).map_err(|_| graph_checkpoint_error("checkpoint step is negative"))
}

fn into_checkpoint<S: StateSchema>(stored: StoredCheckpoint) -> Result<Checkpoint<S>, GraphError> {
    let state: S = serde_json::from_value(stored.state_json).map_err(|error| {
        graph_checkpoint_error(format!("failed to deserialize checkpoint state: {error}"))
    })?;

    Ok(Checkpoint {
        thread_id: stored.thread_id,
        state,
        step: to_u64(stored.step)?,
        node: stored.node.unwrap_or_default(),
        created_at: stored.created_at,
    })
}

#[async_trait::async_trait]
impl<S: StateSchema> Checkpointer<S> for SqliteCheckpointer {
    async fn save(&self, checkpoint: &Checkpoint<S>) -> Result<(), GraphError> {
        save_checkpoint(
            &self.pool,
            &checkpoint.thread_id,
            &checkpoint.node,
            to_i64(checkpoint.step)?,
            &checkpoint.created_at,
            &checkpoint.state,
        )
        .await
        .map_err(map_sql_error)
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>, GraphError> {
        let stored = load_latest_checkpoint(&self.pool, thread_id)
            .await
            .map_err(map_sql_error)?;

        stored.map(into_checkpoint).transpose()
    }

    async fn compare_and_save(
        &self,
        checkpoint: &Checkpoint<S>,
        expected_step: Option<u64>,
    ) -> Result<(), GraphError> {
        let expected = expected_step.map(to_i64).transpose()?;
        let written = compare_and_save_checkpoint(
            &self.pool,
            &checkpoint.thread_id,
            &checkpoint.node,
            to_i64(checkpoint.step)?,
            &checkpoint.created_at,
            &checkpoint.state,
            expected,
        )
        .await
        .map_err(map_sql_error)?;

        if written {
            return Ok(());
        }

        let found = load_latest_checkpoint(&self.pool, &checkpoint.thread_id)
            .await
            .map_err(map_sql_error)?
            .map(|stored| to_u64(stored.step))
            .transpose()?;
        tracing::warn!(
            thread_id = checkpoint.thread_id.as_str(),
            expected = ?expected_step,
            found = ?found,
            "checkpoint version conflict"
        );
        Err(GraphError::Conflict {
            thread_id: checkpoint.thread_id.clone(),
            expected: expected_step,
            found,
        })
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), GraphError> {
        delete_checkpoints(&self.pool, thread_id)
            .await
            .map_err(map_sql_error)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: StateSchema> HistoryCheckpointer<S> for SqliteCheckpointer {
    async fn list_checkpoints(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>, GraphError> {
        load_checkpoint_history(&self.pool, thread_id)
            .await
            .map_err(map_sql_error)?
            .into_iter()
            .map(|stored| {
                Ok(CheckpointMetadata {
                    seq: to_u64(stored.seq)?,
                    step: to_u64(stored.step)?,
                    node: stored.node.unwrap_or_default(),
                    created_at: stored.created_at,
                })
            })
            .collect()
    }
}
