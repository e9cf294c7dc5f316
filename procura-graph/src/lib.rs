mod checkpoint;
mod config;
mod engine;
mod error;
mod file_checkpointer;
pub mod prompts;
mod query;
mod resolver;
mod state;
mod step;
mod summarizer;
mod supervisor;
mod thread_lock;

pub use checkpoint::{
    Checkpoint, CheckpointMetadata, Checkpointer, HistoryCheckpointer, InMemoryCheckpointer,
};
pub use config::{ExecutionConfig, ValidationConfig};
pub use engine::{TurnOutcome, TurnStream, WorkflowEngine, WorkflowEngineBuilder, WorkflowEvent};
pub use error::GraphError;
pub use file_checkpointer::{CheckpointRecord, FileCheckpointer};
pub use query::QueryExecutor;
pub use resolver::{HierarchyResolver, ItemKind, SKIP};
pub use state::{
    Clarification, HierarchyChoice, StateSchema, StepName, Suspension, WorkflowState,
};
pub use step::{StepOutcome, WorkflowStep};
pub use summarizer::Summarizer;
pub use supervisor::{Decision, Supervisor};
pub use thread_lock::ThreadLocks;
