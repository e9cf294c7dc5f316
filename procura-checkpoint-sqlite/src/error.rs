use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointSqlError {
    #[error("failed to connect to database: {0}")]
    Connection(#[source] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::Error),
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid stored data: {0}")]
    InvalidData(String),
}
