use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Speaker of a chat message.
///
/// Foreign message shapes (`human`/`ai` typed messages) are folded into this
/// set when deserialized, so everything past the boundary sees one form.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "systemmessage")]
    System,
    #[serde(alias = "human", alias = "humanmessage")]
    User,
    #[serde(alias = "ai", alias = "aimessage")]
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Appends `message` unless an entry with the same role and content exists.
///
/// Returns `true` when the message was appended.
pub fn add_message_if_not_exists(messages: &mut Vec<Message>, message: Message) -> bool {
    if messages.iter().any(|existing| existing == &message) {
        return false;
    }
    messages.push(message);
    true
}

/// Drops repeated `(role, content)` pairs, keeping the first occurrence.
pub fn deduplicate_messages(messages: Vec<Message>) -> Vec<Message> {
    let mut seen = HashSet::new();
    messages
        .into_iter()
        .filter(|message| seen.insert((message.role, message.content.clone())))
        .collect()
}

/// Renders a log as `role: content` lines for prompt embedding.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| format!("{}: {}", message.role.as_str(), message.content))
        .collect::<Vec<_>>()
        .join("\n")
}
