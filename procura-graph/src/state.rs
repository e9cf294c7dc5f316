use std::collections::BTreeMap;
use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use procura_core::{add_message_if_not_exists, Message, Value};

pub trait StateSchema:
    Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static
{
}

/// The four resolution steps, in the order the supervisor falls back to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    MaterialResolver,
    LocationResolver,
    QueryExecutor,
    Summarizer,
}

impl StepName {
    pub const ORDER: [StepName; 4] = [
        StepName::MaterialResolver,
        StepName::LocationResolver,
        StepName::QueryExecutor,
        StepName::Summarizer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::MaterialResolver => "material_resolver",
            StepName::LocationResolver => "location_resolver",
            StepName::QueryExecutor => "query_executor",
            StepName::Summarizer => "summarizer",
        }
    }

    /// Key under which a failed run records its error in `worker_outputs`.
    pub fn error_key(&self) -> String {
        format!("{}_error", self.as_str())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let name = raw
            .trim()
            .trim_matches(|c: char| c == '\'' || c == '"' || c == '`' || c == '.')
            .trim();
        Self::ORDER
            .into_iter()
            .find(|step| step.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a hierarchy resolution once it has settled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyChoice {
    Confirmed(String),
    Skipped,
}

impl HierarchyChoice {
    pub fn confirmed(&self) -> Option<&str> {
        match self {
            HierarchyChoice::Confirmed(level) => Some(level),
            HierarchyChoice::Skipped => None,
        }
    }
}

/// Where a suspended turn must re-enter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suspension {
    pub step: StepName,
    pub message: String,
}

/// Payload surfaced to the caller when the workflow needs input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clarification {
    pub message: String,
    pub conversation_so_far: Vec<Message>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub original_prompt: String,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub material_hierarchy: Option<HierarchyChoice>,
    #[serde(default)]
    pub material_confirmation: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub location_hierarchy: Option<HierarchyChoice>,
    #[serde(default)]
    pub location_confirmation: Option<String>,
    #[serde(default)]
    pub combined_prompt: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub worker_outputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub next_step: Option<StepName>,
    #[serde(default)]
    pub pending: Option<Suspension>,
}

impl StateSchema for WorkflowState {}

impl WorkflowState {
    pub fn new(original_prompt: impl Into<String>) -> Self {
        Self {
            original_prompt: original_prompt.into(),
            ..Self::default()
        }
    }

    pub fn has_run(&self, step: StepName) -> bool {
        self.worker_outputs.contains_key(step.as_str())
    }

    pub fn completed_steps(&self) -> Vec<StepName> {
        StepName::ORDER
            .into_iter()
            .filter(|step| self.has_run(*step))
            .collect()
    }

    pub fn is_terminated(&self) -> bool {
        self.has_run(StepName::Summarizer)
    }

    pub fn record_output(&mut self, step: StepName, output: Value) {
        self.worker_outputs.insert(step.as_str().to_string(), output);
    }

    pub fn record_error(&mut self, step: StepName, error: impl fmt::Display) {
        self.worker_outputs
            .insert(step.error_key(), Value::String(format!("ERROR: {error}")));
    }

    pub fn add_message(&mut self, message: Message) -> bool {
        add_message_if_not_exists(&mut self.messages, message)
    }

    /// Latest non-blank assistant entry in the log.
    pub fn last_assistant_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| {
                message.role == procura_core::Role::Assistant && !message.content.trim().is_empty()
            })
            .map(|message| message.content.as_str())
    }

    /// Folds a new user request into the state.
    ///
    /// A terminated request has its per-request fields cleared first so every
    /// step runs again. The content is appended to `original_prompt` unless
    /// already contained in it.
    pub fn begin_request(&mut self, content: &str) {
        if self.is_terminated() {
            self.reset_request();
        }
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        if self.original_prompt.trim().is_empty() {
            self.original_prompt = content.to_string();
        } else if !self.original_prompt.contains(content) {
            self.original_prompt = format!("{}\n{}", self.original_prompt, content);
        }
        self.add_message(Message::user(content));
    }

    pub fn reset_request(&mut self) {
        self.material = None;
        self.material_hierarchy = None;
        self.material_confirmation = None;
        self.location = None;
        self.location_hierarchy = None;
        self.location_confirmation = None;
        self.combined_prompt = None;
        self.worker_outputs.clear();
        self.next_step = None;
        self.pending = None;
    }

    pub fn clarification(&self) -> Option<Clarification> {
        self.pending.as_ref().map(|pending| Clarification {
            message: pending.message.clone(),
            conversation_so_far: self.messages.clone(),
        })
    }
}
