use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use procura_core::{
    AnalyticsQueryCapability, AnalyticsResponse, ExtractionCapability, HierarchyLevel,
    HierarchyLookupCapability, ProcuraError,
};
use procura_graph::{
    Checkpointer, Decision, ExecutionConfig, FileCheckpointer, GraphError, HierarchyChoice,
    HistoryCheckpointer, InMemoryCheckpointer, StepName, Supervisor, TurnOutcome, WorkflowEngine,
    WorkflowEvent, WorkflowState,
};
use tempfile::tempdir;

const PROMPT: &str = "What is the total spend of tea in India in 2024?";
const SUMMARY: &str = "Your 2024 tea spend in India was EUR 1,234.50.";

struct ScriptedLlm {
    material: &'static str,
    location: &'static str,
}

#[async_trait::async_trait]
impl ExtractionCapability for ScriptedLlm {
    async fn invoke(&self, prompt: &str) -> Result<String, ProcuraError> {
        if prompt.contains("Next step:") {
            // Leave routing to the fixed-order fallback.
            return Err(ProcuraError::unavailable("decision"));
        }
        if prompt.contains("Material: <material or None>") {
            return Ok(self.material.to_string());
        }
        if prompt.contains("location: <location or None>") {
            return Ok(self.location.to_string());
        }
        Ok(SUMMARY.to_string())
    }
}

struct MapLookup(HashMap<&'static str, &'static str>);

#[async_trait::async_trait]
impl HierarchyLookupCapability for MapLookup {
    async fn lookup(&self, entity_name: &str) -> HierarchyLevel {
        self.0
            .get(entity_name)
            .map(|raw| HierarchyLevel::from_raw(raw))
            .unwrap_or(HierarchyLevel::NotIdentified)
    }
}

#[derive(Default)]
struct RecordingAnalytics {
    queries: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl AnalyticsQueryCapability for RecordingAnalytics {
    async fn invoke(&self, query: &str) -> Result<AnalyticsResponse, ProcuraError> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(AnalyticsResponse::from_answer("Total spend: 1,234.50"))
    }
}

struct Harness {
    engine: WorkflowEngine,
    analytics: Arc<RecordingAnalytics>,
}

fn harness(checkpointer: Arc<dyn Checkpointer<WorkflowState>>) -> Harness {
    harness_with(checkpointer, "Material: tea\nHierarchy: None", ExecutionConfig::default())
}

fn harness_with(
    checkpointer: Arc<dyn Checkpointer<WorkflowState>>,
    material_reply: &'static str,
    config: ExecutionConfig,
) -> Harness {
    let analytics = Arc::new(RecordingAnalytics::default());
    let engine = WorkflowEngine::builder()
        .extraction(Arc::new(ScriptedLlm {
            material: material_reply,
            location: "location: India\nhierarchy: None",
        }))
        .material_lookup(Arc::new(MapLookup(HashMap::from([("tea", "multiple")]))))
        .location_lookup(Arc::new(MapLookup(HashMap::from([("India", "country_name")]))))
        .analytics(analytics.clone())
        .checkpointer(checkpointer)
        .execution_config(config)
        .build()
        .expect("all steps registered");
    Harness { engine, analytics }
}

fn in_memory() -> Arc<InMemoryCheckpointer<WorkflowState>> {
    Arc::new(InMemoryCheckpointer::default())
}

#[tokio::test]
async fn tea_in_india_suspends_then_completes() {
    let h = harness(in_memory());

    let outcome = h.engine.handle_turn("t1", PROMPT).await.expect("first turn");
    let TurnOutcome::Suspended { state, clarification } = outcome else {
        panic!("expected material clarification");
    };
    assert!(clarification.message.contains("'tea'"));
    assert_eq!(
        state.pending.as_ref().map(|pending| pending.step),
        Some(StepName::MaterialResolver)
    );
    assert_eq!(clarification.conversation_so_far, state.messages);
    assert!(h.analytics.queries.lock().unwrap().is_empty());

    let outcome = h.engine.handle_turn("t1", "category").await.expect("resume turn");
    let TurnOutcome::Completed { state, answer } = outcome else {
        panic!("expected completion");
    };
    assert_eq!(answer, SUMMARY);
    assert_eq!(
        state.material_hierarchy,
        Some(HierarchyChoice::Confirmed("category".into()))
    );
    let combined = state.combined_prompt.clone().expect("combined prompt");
    assert!(combined.contains("Hierarchy level for tea: 'category'"));
    assert!(combined.contains("Hierarchy level for India: 'country_name'"));
    assert_eq!(h.analytics.queries.lock().unwrap().as_slice(), [combined]);
    assert_eq!(state.completed_steps(), StepName::ORDER.to_vec());
    assert_eq!(Supervisor::new(None).decide(&state).await, Decision::Terminal);

    let persisted = h.engine.state("t1").await.unwrap().expect("persisted");
    assert_eq!(persisted, state);
}

#[tokio::test]
async fn skip_leaves_material_hierarchy_absent() {
    let h = harness(in_memory());
    h.engine.handle_turn("t1", PROMPT).await.expect("first turn");

    let outcome = h.engine.resume("t1", "skip").await.expect("resume");
    let state = outcome.state();
    assert!(!outcome.is_suspended());
    assert_eq!(state.material_hierarchy, Some(HierarchyChoice::Skipped));
    assert_eq!(
        state.material_hierarchy.as_ref().and_then(HierarchyChoice::confirmed),
        None
    );
    let combined = state.combined_prompt.as_deref().unwrap_or_default();
    assert!(!combined.contains("for tea"));
    assert!(combined.contains("Hierarchy level for India: 'country_name'"));
}

#[tokio::test]
async fn empty_resume_asks_again_without_progress() {
    let checkpointer = in_memory();
    let h = harness(checkpointer.clone());
    let first = h.engine.handle_turn("t1", PROMPT).await.expect("first turn");
    let before = checkpointer.list_checkpoints("t1").await.unwrap().len();

    let again = h.engine.handle_turn("t1", "   ").await.expect("empty resume");
    assert!(again.is_suspended());
    assert_eq!(again.content(), first.content());
    assert_eq!(checkpointer.list_checkpoints("t1").await.unwrap().len(), before);
}

#[tokio::test]
async fn resume_survives_process_restart() {
    let dir = tempdir().unwrap();
    {
        let h = harness(Arc::new(FileCheckpointer::new(dir.path())));
        let outcome = h.engine.handle_turn("durable", PROMPT).await.expect("first turn");
        assert!(outcome.is_suspended());
    }

    let h = harness(Arc::new(FileCheckpointer::new(dir.path())));
    let outcome = h.engine.handle_turn("durable", "category").await.expect("resume");
    assert_eq!(outcome.content(), SUMMARY);
    assert_eq!(h.analytics.queries.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn resume_without_pending_clarification_is_rejected() {
    let h = harness(in_memory());
    let err = h.engine.resume("nobody", "category").await.expect_err("no pending");
    assert!(matches!(err, GraphError::InvalidResume { .. }));
}

#[tokio::test]
async fn new_request_after_completion_runs_every_step_again() {
    let h = harness_with(
        in_memory(),
        "Material: tea\nHierarchy: category",
        ExecutionConfig::default(),
    );
    let first = h.engine.handle_turn("t1", PROMPT).await.expect("first request");
    assert_eq!(first.content(), SUMMARY);

    let second = h
        .engine
        .handle_turn("t1", "And what about 2023?")
        .await
        .expect("second request");
    let state = second.state();
    assert!(state.is_terminated());
    assert!(state.original_prompt.ends_with("\nAnd what about 2023?"));
    assert_eq!(h.analytics.queries.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn max_steps_bounds_a_turn() {
    let h = harness_with(
        in_memory(),
        "Material: tea\nHierarchy: category",
        ExecutionConfig { max_steps: 2 },
    );
    let err = h.engine.handle_turn("t1", PROMPT).await.expect_err("limit hit");
    assert!(matches!(err, GraphError::MaxStepsExceeded { max: 2, reached: 2 }));
}

#[tokio::test]
async fn clear_thread_forgets_state() {
    let h = harness(in_memory());
    h.engine.handle_turn("t1", PROMPT).await.expect("first turn");
    h.engine.clear_thread("t1").await.expect("clear");
    assert!(h.engine.state("t1").await.unwrap().is_none());

    // A cleared thread starts over instead of resuming.
    let outcome = h.engine.handle_turn("t1", "category").await.expect("fresh turn");
    assert_eq!(outcome.state().original_prompt, "category");
}

#[tokio::test]
async fn stream_turn_reports_steps_messages_and_suspension() {
    let h = harness(in_memory());
    let engine = Arc::new(h.engine);

    let events: Vec<WorkflowEvent> = engine.stream_turn("t1", PROMPT).collect().await;

    assert_eq!(
        events.first(),
        Some(&WorkflowEvent::StepStarted {
            step: StepName::MaterialResolver
        })
    );
    assert!(events
        .iter()
        .any(|event| matches!(event, WorkflowEvent::Message { message } if message.content.contains("'tea'"))));
    assert!(matches!(events.last(), Some(WorkflowEvent::Suspended { .. })));

    let events: Vec<WorkflowEvent> = engine.stream_turn("t1", "category").collect().await;
    assert_eq!(
        events.last(),
        Some(&WorkflowEvent::Completed {
            answer: SUMMARY.to_string()
        })
    );
    assert!(events.contains(&WorkflowEvent::StepCompleted {
        step: StepName::QueryExecutor
    }));
}

#[tokio::test]
async fn builder_requires_every_step() {
    let err = WorkflowEngine::builder()
        .material_lookup(Arc::new(MapLookup(HashMap::new())))
        .build()
        .err()
        .expect("missing steps");
    assert!(matches!(err, GraphError::MissingStep { step } if step == "location_resolver"));
}

#[derive(Default)]
struct SlowAnalytics {
    completed: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait::async_trait]
impl AnalyticsQueryCapability for SlowAnalytics {
    async fn invoke(&self, _query: &str) -> Result<AnalyticsResponse, ProcuraError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(AnalyticsResponse::from_answer("Total spend: 1,234.50"))
    }
}

fn slow_engine(analytics: Arc<SlowAnalytics>) -> Arc<WorkflowEngine> {
    Arc::new(
        WorkflowEngine::builder()
            .extraction(Arc::new(ScriptedLlm {
                material: "Material: tea\nHierarchy: None",
                location: "location: India\nhierarchy: None",
            }))
            .material_lookup(Arc::new(MapLookup(HashMap::from([("tea", "category")]))))
            .location_lookup(Arc::new(MapLookup(HashMap::from([("India", "country_name")]))))
            .analytics(analytics)
            .build()
            .expect("all steps registered"),
    )
}

#[tokio::test]
async fn dropping_a_turn_stream_aborts_the_turn() {
    let analytics = Arc::new(SlowAnalytics::default());
    let engine = slow_engine(analytics.clone());

    let mut events = engine.stream_turn("t1", PROMPT);
    while let Some(event) = events.next().await {
        if event
            == (WorkflowEvent::StepStarted {
                step: StepName::QueryExecutor,
            })
        {
            break;
        }
    }
    drop(events);

    let outcome = engine.handle_turn("t1", PROMPT).await.expect("next turn");
    assert_eq!(outcome.content(), SUMMARY);
    assert_eq!(analytics.completed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn turns_of_one_thread_do_not_overlap() {
    let analytics = Arc::new(SlowAnalytics::default());
    let engine = slow_engine(analytics.clone());

    let (first, second) = futures::join!(
        engine.handle_turn("t1", PROMPT),
        engine.handle_turn("t1", PROMPT)
    );

    assert_eq!(first.expect("first turn").content(), SUMMARY);
    assert_eq!(second.expect("second turn").content(), SUMMARY);
    assert_eq!(analytics.completed.load(Ordering::SeqCst), 2);
    assert_eq!(analytics.max_in_flight.load(Ordering::SeqCst), 1);
}
