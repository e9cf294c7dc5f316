use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::{GraphError, StateSchema};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(bound = "S: StateSchema")]
pub struct Checkpoint<S: StateSchema> {
    pub thread_id: String,
    pub state: S,
    /// Per-thread version, strictly increasing across saves.
    pub step: u64,
    /// Step whose boundary produced this checkpoint.
    pub node: String,
    pub created_at: String,
}

impl<S: StateSchema> Checkpoint<S> {
    pub fn new(thread_id: impl Into<String>, state: S, step: u64, node: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            state,
            step,
            node: node.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[async_trait::async_trait]
pub trait Checkpointer<S: StateSchema>: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint<S>) -> Result<(), GraphError>;
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>, GraphError>;

    /// Saves only if the thread's latest step still equals `expected_step`
    /// (`None` meaning the thread has no checkpoint yet).
    async fn compare_and_save(
        &self,
        checkpoint: &Checkpoint<S>,
        expected_step: Option<u64>,
    ) -> Result<(), GraphError>;

    async fn delete_thread(&self, thread_id: &str) -> Result<(), GraphError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointMetadata {
    pub seq: u64,
    pub step: u64,
    pub node: String,
    pub created_at: String,
}

#[async_trait::async_trait]
pub trait HistoryCheckpointer<S: StateSchema>: Send + Sync {
    async fn list_checkpoints(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>, GraphError>;
}

#[derive(Clone)]
pub struct InMemoryCheckpointer<S: StateSchema> {
    inner: Arc<RwLock<HashMap<String, Vec<Checkpoint<S>>>>>,
}

impl<S: StateSchema> Default for InMemoryCheckpointer<S> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait::async_trait]
impl<S: StateSchema> Checkpointer<S> for InMemoryCheckpointer<S> {
    async fn save(&self, checkpoint: &Checkpoint<S>) -> Result<(), GraphError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| GraphError::Checkpoint("lock".into()))?;
        guard
            .entry(checkpoint.thread_id.clone())
            .or_default()
            .push(checkpoint.clone());
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>, GraphError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| GraphError::Checkpoint("lock".into()))?;
        Ok(guard
            .get(thread_id)
            .and_then(|history| history.last())
            .cloned())
    }

    async fn compare_and_save(
        &self,
        checkpoint: &Checkpoint<S>,
        expected_step: Option<u64>,
    ) -> Result<(), GraphError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| GraphError::Checkpoint("lock".into()))?;
        let history = guard.entry(checkpoint.thread_id.clone()).or_default();
        let found = history.last().map(|latest| latest.step);
        if found != expected_step {
            return Err(GraphError::Conflict {
                thread_id: checkpoint.thread_id.clone(),
                expected: expected_step,
                found,
            });
        }
        history.push(checkpoint.clone());
        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), GraphError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| GraphError::Checkpoint("lock".into()))?;
        guard.remove(thread_id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: StateSchema> HistoryCheckpointer<S> for InMemoryCheckpointer<S> {
    async fn list_checkpoints(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>, GraphError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| GraphError::Checkpoint("lock".into()))?;
        Ok(guard
            .get(thread_id)
            .map(|history| {
                history
                    .iter()
                    .enumerate()
                    .map(|(index, checkpoint)| CheckpointMetadata {
                        seq: index as u64 + 1,
                        step: checkpoint.step,
                        node: checkpoint.node.clone(),
                        created_at: checkpoint.created_at.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
