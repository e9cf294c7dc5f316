use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("checkpoint failed: {0}")]
    Checkpoint(String),
    #[error("checkpoint conflict on thread '{thread_id}': expected step {expected:?}, found {found:?}")]
    Conflict {
        thread_id: String,
        expected: Option<u64>,
        found: Option<u64>,
    },
    #[error("Max steps exceeded: reached {reached}, limit {max}")]
    MaxStepsExceeded { max: usize, reached: usize },
    #[error("missing step: {step}")]
    MissingStep { step: String },
    #[error("thread '{thread_id}' has no pending clarification to resume")]
    InvalidResume { thread_id: String },
}
