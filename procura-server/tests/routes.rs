use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use http_body_util::BodyExt;
use procura_core::{
    AnalyticsQueryCapability, AnalyticsResponse, ExtractionCapability, HierarchyLevel,
    HierarchyLookupCapability, InMemoryTranscript, ProcuraError,
};
use procura_graph::WorkflowEngine;
use procura_server::{
    agent_router, gateway_router, GatewayConfig, LocalServingEndpoint, StreamingGateway,
};
use serde_json::{json, Value};
use tower::ServiceExt;

const SUMMARY: &str = "Tea spend in India for 2024 was EUR 1,234.50.";

struct ScriptedLlm;

#[async_trait::async_trait]
impl ExtractionCapability for ScriptedLlm {
    async fn invoke(&self, prompt: &str) -> Result<String, ProcuraError> {
        if prompt.contains("Next step:") {
            return Err(ProcuraError::unavailable("decision"));
        }
        if prompt.contains("Material: <material or None>") {
            return Ok("Material: tea\nHierarchy: None".into());
        }
        if prompt.contains("location: <location or None>") {
            return Ok("location: India\nhierarchy: None".into());
        }
        Ok(SUMMARY.into())
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

struct FixedAnalytics;

#[async_trait::async_trait]
impl AnalyticsQueryCapability for FixedAnalytics {
    async fn invoke(&self, _query: &str) -> Result<AnalyticsResponse, ProcuraError> {
        Ok(AnalyticsResponse::from_answer("Total spend: 1,234.50"))
    }
}

fn engine() -> Arc<WorkflowEngine> {
    Arc::new(
        WorkflowEngine::builder()
            .extraction(Arc::new(ScriptedLlm))
            .material_lookup(Arc::new(MapLookup(HashMap::from([("tea", "multiple")]))))
            .location_lookup(Arc::new(MapLookup(HashMap::from([("India", "country_name")]))))
            .analytics(Arc::new(FixedAnalytics))
            .build()
            .expect("engine"),
    )
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

fn invocation(thread_id: &str, content: &str, stream: bool) -> Value {
    json!({
        "messages": [{"role": "user", "content": content}],
        "stream": stream,
        "custom_inputs": {"thread_id": thread_id}
    })
}

#[tokio::test]
async fn capabilities_advertise_streaming() {
    let response = agent_router(engine())
        .oneshot(
            Request::builder()
                .uri("/capabilities")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
    assert_eq!(body, json!({"streaming": true, "traces": false}));
}

#[tokio::test]
async fn invocations_suspend_then_answer() {
    let router = agent_router(engine());
    let prompt = "What is the total spend of tea in India in 2024?";

    let response = router
        .clone()
        .oneshot(json_request(Method::POST, "/invocations", invocation("t1", prompt, false)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
    assert_eq!(body["custom_outputs"]["suspended"], json!(true));
    let question = body["messages"][0]["content"].as_str().expect("content");
    assert!(question.contains("'tea'"));

    let response = router
        .oneshot(json_request(Method::POST, "/invocations", invocation("t1", "category", false)))
        .await
        .expect("response");
    let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
    assert_eq!(body["custom_outputs"]["suspended"], json!(false));
    assert_eq!(body["messages"][0]["content"], json!(SUMMARY));
}

#[tokio::test]
async fn streaming_invocation_ends_with_done_marker() {
    let response = agent_router(engine())
        .oneshot(json_request(
            Method::POST,
            "/invocations",
            invocation("t1", "What is the total spend of tea in India in 2024?", true),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    let text = body_text(response).await;
    assert!(text.contains(r#""role":"assistant""#));
    assert!(text.contains("data: [DONE]"));
}

#[tokio::test]
async fn invocation_without_thread_is_rejected() {
    let response = agent_router(engine())
        .oneshot(json_request(
            Method::POST,
            "/invocations",
            json!({"messages": [{"role": "user", "content": "hi there"}]}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deleting_a_thread_forgets_pending_clarification() {
    let engine = engine();
    let router = agent_router(engine.clone());
    router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/invocations",
            invocation("t1", "What is the total spend of tea in India in 2024?", false),
        ))
        .await
        .expect("response");
    assert!(engine.state("t1").await.expect("state").is_some());

    let response = router
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/threads/t1")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(engine.state("t1").await.expect("state").is_none());
}

fn local_gateway() -> Arc<StreamingGateway> {
    Arc::new(StreamingGateway::new(
        Arc::new(LocalServingEndpoint::new(engine())),
        Arc::new(InMemoryTranscript::new()),
        GatewayConfig::default(),
    ))
}

#[tokio::test]
async fn chat_streams_message_and_done_events() {
    let response = gateway_router(local_gateway())
        .oneshot(json_request(
            Method::POST,
            "/chat",
            json!({
                "thread_id": "t1",
                "content": "What is the total spend of tea in India in 2024?",
                "include_history": false
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(text.contains("event: message"));
    assert!(text.contains("appears in multiple material hierarchies"));
    assert!(text.contains(r#""streamed":true"#));
    assert!(text.trim_end().ends_with("data: {}"));
}

#[tokio::test]
async fn chat_rejects_blank_content() {
    let response = gateway_router(local_gateway())
        .oneshot(json_request(
            Method::POST,
            "/chat",
            json!({"thread_id": "t1", "content": "   "}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deleting_a_session_returns_no_content() {
    let response = gateway_router(local_gateway())
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/sessions/t1")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
