use procura_graph::{
    Checkpoint, Checkpointer, GraphError, HistoryCheckpointer, StepName, WorkflowState,
};
use serde_json::json;

use procura_checkpoint_sqlite::SqliteCheckpointer;

async fn checkpointer() -> SqliteCheckpointer {
    SqliteCheckpointer::builder("sqlite::memory:")
        .max_connections(1)
        .build()
        .await
        .expect("sqlite checkpointer should build")
}

fn state(prompt: &str) -> WorkflowState {
    let mut state = WorkflowState::new(prompt);
    state.record_output(StepName::MaterialResolver, json!({"status": "resolved"}));
    state
}

#[tokio::test]
async fn checkpointer_trait_round_trip_save_and_load() {
    let checkpointer = checkpointer().await;
    let checkpoint = Checkpoint::new("thread-1", state("spend of tea"), 3, "material_resolver");

    checkpointer
        .save(&checkpoint)
        .await
        .expect("checkpoint should save");

    let loaded: Checkpoint<WorkflowState> = checkpointer
        .load("thread-1")
        .await
        .expect("checkpoint should load")
        .expect("checkpoint should exist");

    assert_eq!(loaded.thread_id, "thread-1");
    assert_eq!(loaded.step, 3);
    assert_eq!(loaded.node, "material_resolver");
    assert_eq!(loaded.state, checkpoint.state);
    assert_eq!(loaded.created_at, checkpoint.created_at);
}

#[tokio::test]
async fn load_missing_thread_returns_none() {
    let checkpointer = checkpointer().await;
    let loaded: Option<Checkpoint<WorkflowState>> = checkpointer
        .load("missing")
        .await
        .expect("load should succeed");
    assert!(loaded.is_none());
}

#[tokio::test]
async fn compare_and_save_detects_stale_versions() {
    let checkpointer = checkpointer().await;

    checkpointer
        .compare_and_save(&Checkpoint::new("t", state("a"), 0, "material_resolver"), None)
        .await
        .expect("first save on empty thread");
    checkpointer
        .compare_and_save(&Checkpoint::new("t", state("b"), 1, "location_resolver"), Some(0))
        .await
        .expect("save on current version");

    let err = checkpointer
        .compare_and_save(&Checkpoint::new("t", state("stale"), 1, "location_resolver"), Some(0))
        .await
        .expect_err("stale save must conflict");
    match err {
        GraphError::Conflict {
            thread_id,
            expected,
            found,
        } => {
            assert_eq!(thread_id, "t");
            assert_eq!(expected, Some(0));
            assert_eq!(found, Some(1));
        }
        other => panic!("unexpected error: {other}"),
    }

    let loaded: Checkpoint<WorkflowState> = checkpointer
        .load("t")
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(loaded.state.original_prompt, "b");
}

#[tokio::test]
async fn concurrent_writers_on_one_version_only_one_wins() {
    let checkpointer = checkpointer().await;
    checkpointer
        .compare_and_save(&Checkpoint::new("race", state("base"), 0, "material_resolver"), None)
        .await
        .expect("base save");

    let attempts = (0..4).map(|i| {
        let checkpointer = checkpointer.clone();
        async move {
            checkpointer
                .compare_and_save(
                    &Checkpoint::new("race", state(&format!("writer {i}")), 1, "location_resolver"),
                    Some(0),
                )
                .await
        }
    });
    let results = futures::future::join_all(attempts).await;

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    let history = <SqliteCheckpointer as HistoryCheckpointer<WorkflowState>>::list_checkpoints(
        &checkpointer,
        "race",
    )
    .await
    .expect("history");
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn history_lists_in_order_and_delete_retires_thread() {
    let checkpointer = checkpointer().await;
    for (step, node) in ["material_resolver", "location_resolver", "query_executor"]
        .into_iter()
        .enumerate()
    {
        checkpointer
            .save(&Checkpoint::new("h", state("x"), step as u64, node))
            .await
            .expect("save");
    }

    let history = <SqliteCheckpointer as HistoryCheckpointer<WorkflowState>>::list_checkpoints(
        &checkpointer,
        "h",
    )
    .await
    .expect("history");
    assert_eq!(
        history.iter().map(|meta| meta.seq).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(history[2].node, "query_executor");

    Checkpointer::<WorkflowState>::delete_thread(&checkpointer, "h")
        .await
        .expect("delete");
    let loaded: Option<Checkpoint<WorkflowState>> = checkpointer.load("h").await.expect("load");
    assert!(loaded.is_none());
}
