use axum::response::sse::Event;
use serde_json::{json, Value};

use crate::gateway::GatewayEvent;

fn event(event_type: &str, payload: &Value) -> Event {
    Event::default().event(event_type).data(payload.to_string())
}

pub fn to_sse_event(event_item: &GatewayEvent) -> Event {
    match event_item {
        GatewayEvent::Delta { content } => event(
            "delta",
            &json!({
                "role": "assistant",
                "content": content,
            }),
        ),
        GatewayEvent::Message(reply) => match serde_json::to_value(reply) {
            Ok(payload) => event("message", &payload),
            Err(error) => event("error", &json!({ "message": error.to_string() })),
        },
        GatewayEvent::Done => done_event(),
    }
}

pub fn done_event() -> Event {
    event("done", &json!({}))
}

/// Frame carrying a complete message, as read back by the gateway.
pub fn message_frame(role: &str, content: &str) -> Event {
    Event::default().data(json!({ "role": role, "content": content }).to_string())
}

/// `[DONE]` terminator of an invocation stream.
pub fn stream_terminator() -> Event {
    Event::default().data("[DONE]")
}

pub fn error_frame(error_code: &str, message: &str) -> Event {
    Event::default()
        .event("error")
        .data(json!({ "error_code": error_code, "message": message }).to_string())
}
