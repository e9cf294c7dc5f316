use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::{Checkpoint, CheckpointMetadata, Checkpointer, GraphError, HistoryCheckpointer, StateSchema};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "S: StateSchema")]
pub struct CheckpointRecord<S: StateSchema> {
    pub seq: u64,
    pub created_at: String,
    pub checkpoint: Checkpoint<S>,
}

/// One JSONL file per thread under `base_dir`.
///
/// Compare-and-save is atomic within one process only.
#[derive(Clone, Debug)]
pub struct FileCheckpointer {
    base_dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

fn io_error(err: impl std::fmt::Display) -> GraphError {
    GraphError::Checkpoint(err.to_string())
}

impl FileCheckpointer {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn sanitize_thread_id(thread_id: &str) -> String {
        let mut out = String::with_capacity(thread_id.len());
        for ch in thread_id.chars() {
            match ch {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => out.push('_'),
                c if c.is_control() => {}
                c => out.push(c),
            }
        }
        let trimmed = out.trim_matches(|c: char| c == '.' || c.is_whitespace() || c == '_');
        if trimmed.is_empty() {
            let mut hasher = DefaultHasher::new();
            thread_id.hash(&mut hasher);
            return format!("thread-{:08x}", hasher.finish());
        }
        trimmed.to_string()
    }

    fn thread_path(&self, thread_id: &str) -> PathBuf {
        let filename = format!("{}.jsonl", Self::sanitize_thread_id(thread_id));
        self.base_dir.join(filename)
    }

    fn read_records<S: StateSchema>(&self, thread_id: &str) -> Result<Vec<CheckpointRecord<S>>, GraphError> {
        let path = self.thread_path(thread_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&path).map_err(io_error)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(io_error)?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line).map_err(io_error)?);
        }
        Ok(records)
    }

    fn last_record<S: StateSchema>(&self, thread_id: &str) -> Result<Option<CheckpointRecord<S>>, GraphError> {
        Ok(self.read_records(thread_id)?.pop())
    }

    fn append<S: StateSchema>(
        &self,
        checkpoint: &Checkpoint<S>,
        last: Option<&CheckpointRecord<S>>,
    ) -> Result<(), GraphError> {
        fs::create_dir_all(&self.base_dir).map_err(io_error)?;
        let record = CheckpointRecord {
            seq: last.map(|record| record.seq + 1).unwrap_or(1),
            created_at: checkpoint.created_at.clone(),
            checkpoint: checkpoint.clone(),
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.thread_path(&checkpoint.thread_id))
            .map_err(io_error)?;
        let line = serde_json::to_string(&record).map_err(io_error)?;
        file.write_all(format!("{line}\n").as_bytes())
            .map_err(io_error)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: StateSchema> Checkpointer<S> for FileCheckpointer {
    async fn save(&self, checkpoint: &Checkpoint<S>) -> Result<(), GraphError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| GraphError::Checkpoint("lock".into()))?;
        let last = self.last_record::<S>(&checkpoint.thread_id)?;
        self.append(checkpoint, last.as_ref())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>, GraphError> {
        Ok(self
            .last_record::<S>(thread_id)?
            .map(|record| record.checkpoint))
    }

    async fn compare_and_save(
        &self,
        checkpoint: &Checkpoint<S>,
        expected_step: Option<u64>,
    ) -> Result<(), GraphError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| GraphError::Checkpoint("lock".into()))?;
        let last = self.last_record::<S>(&checkpoint.thread_id)?;
        let found = last.as_ref().map(|record| record.checkpoint.step);
        if found != expected_step {
            return Err(GraphError::Conflict {
                thread_id: checkpoint.thread_id.clone(),
                expected: expected_step,
                found,
            });
        }
        self.append(checkpoint, last.as_ref())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), GraphError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| GraphError::Checkpoint("lock".into()))?;
        let path = self.thread_path(thread_id);
        if path.exists() {
            fs::remove_file(&path).map_err(io_error)?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: StateSchema> HistoryCheckpointer<S> for FileCheckpointer {
    async fn list_checkpoints(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>, GraphError> {
        Ok(self
            .read_records::<S>(thread_id)?
            .into_iter()
            .map(|record| CheckpointMetadata {
                seq: record.seq,
                step: record.checkpoint.step,
                node: record.checkpoint.node,
                created_at: record.created_at,
            })
            .collect())
    }
}
