use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use procura_core::{Message, Role};
use procura_graph::{TurnOutcome, WorkflowEngine, WorkflowEvent};

use crate::capability::EndpointCapabilities;
use crate::gateway::{ChatRequest, StreamingGateway};
use crate::sse::{error_frame, message_frame, stream_terminator, to_sse_event};

const BODY_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: error.into() })).into_response()
}

/// `POST /chat` (SSE) and `DELETE /sessions/:thread_id`.
pub fn gateway_router(gateway: Arc<StreamingGateway>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/sessions/:thread_id", delete(clear_session))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

async fn chat(State(gateway): State<Arc<StreamingGateway>>, Json(request): Json<ChatRequest>) -> Response {
    if request.thread_id.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "thread_id is required");
    }
    if request.content.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "content is required");
    }

    let events = gateway
        .chat(request)
        .map(|event| Ok::<Event, Infallible>(to_sse_event(&event)));
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn clear_session(
    State(gateway): State<Arc<StreamingGateway>>,
    Path(thread_id): Path<String>,
) -> Response {
    match gateway.clear_session(&thread_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => {
            tracing::error!(thread_id = thread_id.as_str(), error = %error, "failed to clear session");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CustomInputs {
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InvocationRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub return_trace: bool,
    #[serde(default)]
    pub custom_inputs: CustomInputs,
}

/// `GET /capabilities`, `POST /invocations` and `DELETE /threads/:thread_id`
/// over an in-process workflow engine.
pub fn agent_router(engine: Arc<WorkflowEngine>) -> Router {
    Router::new()
        .route("/capabilities", get(capabilities))
        .route("/invocations", post(invoke))
        .route("/threads/:thread_id", delete(clear_thread))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn capabilities() -> Json<EndpointCapabilities> {
    Json(EndpointCapabilities {
        streaming: true,
        traces: false,
    })
}

fn invocation_body(thread_id: &str, outcome: &TurnOutcome) -> serde_json::Value {
    json!({
        "messages": [Message::assistant(outcome.content())],
        "custom_outputs": {
            "thread_id": thread_id,
            "suspended": outcome.is_suspended(),
        },
    })
}

fn invocation_events(
    events: impl Stream<Item = WorkflowEvent> + Send + 'static,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    events
        .filter_map(|event| {
            futures::future::ready(match event {
                WorkflowEvent::Completed { answer } => {
                    Some(vec![message_frame("assistant", &answer), stream_terminator()])
                }
                WorkflowEvent::Suspended { clarification } => Some(vec![
                    message_frame("assistant", &clarification.message),
                    stream_terminator(),
                ]),
                WorkflowEvent::Error { message } => {
                    Some(vec![error_frame("WORKFLOW_ERROR", &message)])
                }
                _ => None,
            })
        })
        .flat_map(|frames| stream::iter(frames.into_iter().map(Ok)))
}

async fn invoke(
    State(engine): State<Arc<WorkflowEngine>>,
    Json(request): Json<InvocationRequest>,
) -> Response {
    let Some(thread_id) = request
        .custom_inputs
        .thread_id
        .filter(|thread_id| !thread_id.trim().is_empty())
    else {
        return error_response(StatusCode::BAD_REQUEST, "custom_inputs.thread_id is required");
    };
    let Some(content) = request
        .messages
        .iter()
        .rev()
        .find(|message| message.role == Role::User)
        .map(|message| message.content.clone())
    else {
        return error_response(StatusCode::BAD_REQUEST, "no user message in request");
    };
    if request.return_trace {
        tracing::debug!(thread_id = thread_id.as_str(), "traces are not recorded by this host");
    }

    if request.stream {
        let events = engine.stream_turn(thread_id, content);
        return Sse::new(invocation_events(events)).into_response();
    }

    match engine.handle_turn(&thread_id, &content).await {
        Ok(outcome) => Json(invocation_body(&thread_id, &outcome)).into_response(),
        Err(error) => {
            tracing::error!(thread_id = thread_id.as_str(), error = %error, "invocation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error_code": "WORKFLOW_ERROR", "message": error.to_string() })),
            )
                .into_response()
        }
    }
}

async fn clear_thread(
    State(engine): State<Arc<WorkflowEngine>>,
    Path(thread_id): Path<String>,
) -> Response {
    match engine.clear_thread(&thread_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    }
}
