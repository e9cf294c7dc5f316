use procura_core::{Message, Role};
use procura_graph::{HierarchyChoice, StepName, WorkflowState};
use serde_json::json;

#[test]
fn step_names_parse_loosely() {
    assert_eq!(StepName::parse("material_resolver"), Some(StepName::MaterialResolver));
    assert_eq!(StepName::parse(" 'query_executor' "), Some(StepName::QueryExecutor));
    assert_eq!(StepName::parse("\"Summarizer\"."), Some(StepName::Summarizer));
    assert_eq!(StepName::parse("location"), None);
    assert_eq!(StepName::QueryExecutor.error_key(), "query_executor_error");
}

#[test]
fn worker_outputs_drive_has_run() {
    let mut state = WorkflowState::new("spend on tea");
    assert!(state.completed_steps().is_empty());
    state.record_output(StepName::MaterialResolver, json!({"status": "resolved"}));
    state.record_error(StepName::QueryExecutor, "boom");
    assert!(state.has_run(StepName::MaterialResolver));
    assert!(!state.has_run(StepName::QueryExecutor));
    assert_eq!(state.completed_steps(), vec![StepName::MaterialResolver]);
    assert_eq!(
        state.worker_outputs.get("query_executor_error"),
        Some(&json!("ERROR: boom"))
    );
}

#[test]
fn begin_request_appends_prompt_once() {
    let mut state = WorkflowState::default();
    state.begin_request("What is the spend of tea?");
    state.begin_request("What is the spend of tea?");
    assert_eq!(state.original_prompt, "What is the spend of tea?");
    assert_eq!(state.messages, vec![Message::user("What is the spend of tea?")]);

    state.begin_request("Only for 2024");
    assert_eq!(state.original_prompt, "What is the spend of tea?\nOnly for 2024");
}

#[test]
fn begin_request_after_termination_resets_request_fields() {
    let mut state = WorkflowState::new("spend of tea");
    state.material = Some("tea".into());
    state.material_hierarchy = Some(HierarchyChoice::Confirmed("category".into()));
    state.combined_prompt = Some("spend of tea\nHierarchy level for tea: 'category'".into());
    state.next_step = Some(StepName::Summarizer);
    for step in StepName::ORDER {
        state.record_output(step, json!({"status": "completed"}));
    }
    state.add_message(Message::assistant("Tea spend was 10 EUR"));
    assert!(state.is_terminated());

    state.begin_request("and coffee?");

    assert!(!state.is_terminated());
    assert!(state.worker_outputs.is_empty());
    assert_eq!(state.material, None);
    assert_eq!(state.material_hierarchy, None);
    assert_eq!(state.combined_prompt, None);
    assert_eq!(state.next_step, None);
    assert_eq!(state.original_prompt, "spend of tea\nand coffee?");
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[1].role, Role::User);
}

#[test]
fn hierarchy_choice_serializes_tagged() {
    let confirmed = serde_json::to_value(HierarchyChoice::Confirmed("category".into()))
        .expect("serialize confirmed");
    let skipped = serde_json::to_value(HierarchyChoice::Skipped).expect("serialize skipped");
    assert_eq!(confirmed, json!({"confirmed": "category"}));
    assert_eq!(skipped, json!("skipped"));
    assert_eq!(HierarchyChoice::Skipped.confirmed(), None);
}
