use procura_graph::{
    Checkpoint, Checkpointer, FileCheckpointer, GraphError, HistoryCheckpointer, WorkflowState,
};
use tempfile::tempdir;

fn checkpoint(thread_id: &str, step: u64, prompt: &str) -> Checkpoint<WorkflowState> {
    Checkpoint::new(thread_id, WorkflowState::new(prompt), step, "query_executor")
}

#[tokio::test]
async fn file_checkpointer_appends_and_loads_latest() {
    let dir = tempdir().unwrap();
    let checkpointer = FileCheckpointer::new(dir.path());

    checkpointer.save(&checkpoint("thread/1", 0, "one")).await.unwrap();
    checkpointer.save(&checkpoint("thread/1", 1, "two")).await.unwrap();

    let loaded: Checkpoint<WorkflowState> = checkpointer.load("thread/1").await.unwrap().unwrap();
    assert_eq!(loaded.state.original_prompt, "two");
    assert_eq!(loaded.step, 1);
    assert!(dir.path().join("thread_1.jsonl").exists());
}

#[tokio::test]
async fn file_checkpointer_lists_metadata() {
    let dir = tempdir().unwrap();
    let checkpointer = FileCheckpointer::new(dir.path());

    checkpointer.save(&checkpoint("thread-2", 0, "one")).await.unwrap();
    checkpointer.save(&checkpoint("thread-2", 1, "two")).await.unwrap();

    let history = <FileCheckpointer as HistoryCheckpointer<WorkflowState>>::list_checkpoints(
        &checkpointer,
        "thread-2",
    )
    .await
    .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].seq, 1);
    assert_eq!(history[1].seq, 2);
    assert_eq!(history[1].node, "query_executor");
}

#[tokio::test]
async fn file_checkpointer_compare_and_save_survives_reopen() {
    let dir = tempdir().unwrap();
    let first = FileCheckpointer::new(dir.path());
    first
        .compare_and_save(&checkpoint("t", 0, "one"), None)
        .await
        .expect("initial save");

    let reopened = FileCheckpointer::new(dir.path());
    let err = Checkpointer::<WorkflowState>::compare_and_save(
        &reopened,
        &checkpoint("t", 0, "again"),
        None,
    )
    .await
    .expect_err("existing thread conflicts");
    assert!(matches!(err, GraphError::Conflict { found: Some(0), .. }));

    reopened
        .compare_and_save(&checkpoint("t", 1, "two"), Some(0))
        .await
        .expect("versioned save");
}

#[tokio::test]
async fn file_checkpointer_delete_thread_removes_file() {
    let dir = tempdir().unwrap();
    let checkpointer = FileCheckpointer::new(dir.path());
    checkpointer.save(&checkpoint("gone", 0, "x")).await.unwrap();

    Checkpointer::<WorkflowState>::delete_thread(&checkpointer, "gone")
        .await
        .unwrap();
    let loaded: Option<Checkpoint<WorkflowState>> = checkpointer.load("gone").await.unwrap();
    assert!(loaded.is_none());
    assert!(!dir.path().join("gone.jsonl").exists());
}
