//! Reading the serving endpoint's response bodies and stream frames.

use procura_core::{Message, Role};
use serde_json::Value;

pub const NO_CONTENT: &str = "No content found in response";

/// Answer text of a buffered response in any of the accepted shapes:
/// chat completions, agent `messages`, or responses-API `output`.
pub fn extract_content(body: &Value) -> Option<String> {
    if let Some(choice) = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
    {
        return choice
            .pointer("/message/content")
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    if let Some(messages) = body
        .get("messages")
        .and_then(Value::as_array)
        .filter(|messages| !messages.is_empty())
    {
        let answers: Vec<&str> = messages
            .iter()
            .filter(|message| message.get("role").and_then(Value::as_str) == Some("assistant"))
            .filter_map(|message| message.get("content").and_then(Value::as_str))
            .collect();
        return Some(answers.join("\n\n"));
    }

    let item = body
        .get("output")
        .and_then(Value::as_array)
        .and_then(|output| output.first())?;
    if item.get("type").and_then(Value::as_str) != Some("message") {
        return None;
    }
    let parts = item.get("content").and_then(Value::as_array)?;
    Some(
        parts
            .iter()
            .find(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
            .and_then(|part| part.get("text").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string(),
    )
}

pub fn extract_trace_id(body: &Value) -> Option<String> {
    [
        "/databricks_output/trace/info/trace_id",
        "/trace/info/trace_id",
        "/trace_id",
    ]
    .iter()
    .find_map(|pointer| body.pointer(pointer).and_then(Value::as_str))
    .map(str::to_string)
}

/// `<error_code>. <message>` for an error body, with generic stand-ins for
/// missing parts. Bodies that are not JSON are returned as they are.
pub fn error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(fields)) => {
            let code = fields
                .get("error_code")
                .and_then(Value::as_str)
                .unwrap_or("Encountered an error");
            let message = fields
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Error processing response.");
            format!("{code}. {message}")
        }
        _ if body.trim().is_empty() => "Encountered an error. Error processing response.".into(),
        _ => body.trim().to_string(),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamFrame {
    /// Incremental token text.
    Delta(String),
    /// A complete message replacing whatever was accumulated.
    Message(Message),
    Done,
}

/// Decodes one SSE line. Comments, `event:` lines and unknown payloads yield
/// `None`.
pub fn parse_stream_line(line: &str) -> Option<StreamFrame> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(StreamFrame::Done);
    }
    let payload: Value = match serde_json::from_str(data) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::debug!(error = %error, "skipping undecodable stream frame");
            return None;
        }
    };

    if let Some(delta) = payload
        .pointer("/delta/content")
        .or_else(|| payload.pointer("/choices/0/delta/content"))
        .and_then(Value::as_str)
    {
        return Some(StreamFrame::Delta(delta.to_string()));
    }

    let content = payload.get("content").and_then(Value::as_str)?;
    let role = payload
        .get("role")
        .cloned()
        .and_then(|role| serde_json::from_value::<Role>(role).ok())
        .unwrap_or(Role::Assistant);
    Some(StreamFrame::Message(Message::new(role, content)))
}

/// Splits a byte stream into lines across chunk boundaries.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(position) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=position).collect();
            lines.push(
                String::from_utf8_lossy(&line)
                    .trim_end_matches(['\r', '\n'])
                    .to_string(),
            );
        }
        lines
    }

    /// Remaining text after the stream ended without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        (!rest.is_empty()).then_some(rest)
    }
}
