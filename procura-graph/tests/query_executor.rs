use std::sync::{Arc, Mutex};

use procura_core::{AnalyticsQueryCapability, AnalyticsResponse, Message, ProcuraError};
use procura_graph::{QueryExecutor, StepName, StepOutcome, ValidationConfig, WorkflowState, WorkflowStep};

#[derive(Default)]
struct RecordingAnalytics {
    queries: Mutex<Vec<String>>,
    fail: bool,
    answer: Option<&'static str>,
}

#[async_trait::async_trait]
impl AnalyticsQueryCapability for RecordingAnalytics {
    async fn invoke(&self, query: &str) -> Result<AnalyticsResponse, ProcuraError> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(ProcuraError::AnalyticsFailed("warehouse offline".into()));
        }
        Ok(AnalyticsResponse {
            messages: vec![
                Message::user(query),
                Message::assistant(self.answer.unwrap_or_default()),
            ],
        })
    }
}

fn state_with(prompt: Option<&str>) -> WorkflowState {
    let mut state = WorkflowState::new("spend of tea");
    state.combined_prompt = prompt.map(str::to_string);
    state
}

fn into_state(outcome: StepOutcome) -> WorkflowState {
    match outcome {
        StepOutcome::Continue(state) => state,
        other => panic!("expected Continue, got {other:?}"),
    }
}

#[tokio::test]
async fn answer_is_logged_and_recorded() {
    let analytics = Arc::new(RecordingAnalytics {
        answer: Some("Total spend: 693,986,110.05"),
        ..Default::default()
    });
    let executor = QueryExecutor::new(analytics.clone());
    let prompt = "What is the total spend of tea?\nHierarchy level for tea: 'category'";

    let state = into_state(executor.run(state_with(Some(prompt))).await);

    assert_eq!(analytics.queries.lock().unwrap().as_slice(), [prompt.to_string()]);
    assert_eq!(state.last_assistant_message(), Some("Total spend: 693,986,110.05"));
    let output = &state.worker_outputs["query_executor"];
    assert_eq!(output["combined_prompt"], prompt);
    assert_eq!(output["response_content"], "Total spend: 693,986,110.05");
    assert!(output["timestamp"].is_string());
}

#[tokio::test]
async fn invalid_prompts_never_reach_the_capability() {
    let analytics = Arc::new(RecordingAnalytics::default());
    let executor = QueryExecutor::new(analytics.clone());

    for (prompt, expected) in [
        (None, "Error: Missing combined_prompt for the analytics query."),
        (Some("   "), "Error: Empty combined_prompt for the analytics query."),
        (Some("tea?"), "Error: Combined prompt too short for meaningful analysis."),
    ] {
        let state = into_state(executor.run(state_with(prompt)).await);
        assert_eq!(state.last_assistant_message(), Some(expected));
        assert_eq!(state.worker_outputs["query_executor"]["status"], "invalid");
        assert!(state.worker_outputs.contains_key("query_executor_error"));
        assert!(state.has_run(StepName::QueryExecutor));
    }
    assert!(analytics.queries.lock().unwrap().is_empty());
}

#[tokio::test]
async fn min_length_is_configurable() {
    let analytics = Arc::new(RecordingAnalytics {
        answer: Some("ok"),
        ..Default::default()
    });
    let executor = QueryExecutor::new(analytics.clone())
        .with_validation(ValidationConfig { min_prompt_length: 3 });
    let state = into_state(executor.run(state_with(Some("tea?"))).await);
    assert_eq!(state.worker_outputs["query_executor"]["status"], "completed");
}

#[tokio::test]
async fn capability_error_becomes_structured_entry() {
    let executor = QueryExecutor::new(Arc::new(RecordingAnalytics {
        fail: true,
        ..Default::default()
    }));
    let state = into_state(
        executor
            .run(state_with(Some("What is the total spend of tea?")))
            .await,
    );

    let error = state.worker_outputs["query_executor_error"]
        .as_str()
        .expect("error entry is a string");
    assert!(error.starts_with("ERROR: "));
    assert!(error.contains("warehouse offline"));
    assert_eq!(state.worker_outputs["query_executor"]["status"], "failed");
    assert!(state
        .last_assistant_message()
        .unwrap_or_default()
        .contains("warehouse offline"));
}

#[tokio::test]
async fn blank_answer_is_a_failure() {
    let executor = QueryExecutor::new(Arc::new(RecordingAnalytics {
        answer: Some("  "),
        ..Default::default()
    }));
    let state = into_state(
        executor
            .run(state_with(Some("What is the total spend of tea?")))
            .await,
    );
    assert_eq!(state.worker_outputs["query_executor"]["status"], "failed");
}
