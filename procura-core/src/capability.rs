//! Interfaces of the external capabilities the workflow depends on.
//!
//! Each capability is handed to the components that use it as an
//! `Arc<dyn ...>`; an absent extraction capability is modelled as `None` by
//! the caller rather than as a failing implementation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Message, ProcuraError, Role};

/// Free-text completion used for entity extraction, step selection and
/// summarization.
#[async_trait::async_trait]
pub trait ExtractionCapability: Send + Sync + 'static {
    async fn invoke(&self, prompt: &str) -> Result<String, ProcuraError>;
}

pub const MULTIPLE_HIERARCHIES: &str = "multiple";
pub const NO_HIERARCHY_IDENTIFIED: &str = "no hierarchy identified";

/// Result of resolving an entity name against the reporting hierarchy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HierarchyLevel {
    Level(String),
    Multiple,
    NotIdentified,
}

impl HierarchyLevel {
    /// Maps the raw value returned by a lookup function.
    pub fn from_raw(raw: &str) -> Self {
        let value = raw.trim();
        if value.eq_ignore_ascii_case(MULTIPLE_HIERARCHIES) {
            Self::Multiple
        } else if value.is_empty() || value.eq_ignore_ascii_case(NO_HIERARCHY_IDENTIFIED) {
            Self::NotIdentified
        } else {
            Self::Level(value.to_string())
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        !matches!(self, Self::Level(_))
    }
}

impl fmt::Display for HierarchyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Level(level) => f.write_str(level),
            Self::Multiple => f.write_str(MULTIPLE_HIERARCHIES),
            Self::NotIdentified => f.write_str(NO_HIERARCHY_IDENTIFIED),
        }
    }
}

/// Hierarchy lookup never fails outward: lookup errors surface as
/// [`HierarchyLevel::NotIdentified`].
#[async_trait::async_trait]
pub trait HierarchyLookupCapability: Send + Sync + 'static {
    async fn lookup(&self, entity_name: &str) -> HierarchyLevel;
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsResponse {
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl AnalyticsResponse {
    pub fn from_answer(answer: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::new(Role::Assistant, answer)],
        }
    }

    /// Content of the final message, if any non-blank one exists.
    pub fn final_answer(&self) -> Option<&str> {
        self.messages
            .last()
            .map(|message| message.content.as_str())
            .filter(|content| !content.trim().is_empty())
    }
}

#[async_trait::async_trait]
pub trait AnalyticsQueryCapability: Send + Sync + 'static {
    async fn invoke(&self, query: &str) -> Result<AnalyticsResponse, ProcuraError>;
}
