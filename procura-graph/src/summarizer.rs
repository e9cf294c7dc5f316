use std::sync::Arc;

use serde_json::json;

use procura_core::{ExtractionCapability, Message};

use crate::prompts::{PromptSet, SystemMessages};
use crate::{StepName, StepOutcome, WorkflowState, WorkflowStep};

pub struct Summarizer {
    extraction: Option<Arc<dyn ExtractionCapability>>,
    prompts: PromptSet,
    messages: Arc<SystemMessages>,
}

impl Summarizer {
    pub fn new(extraction: Option<Arc<dyn ExtractionCapability>>) -> Self {
        Self {
            extraction,
            prompts: PromptSet,
            messages: Arc::new(SystemMessages::default()),
        }
    }

    pub fn with_messages(mut self, messages: Arc<SystemMessages>) -> Self {
        self.messages = messages;
        self
    }

    /// Used when no summary can be generated: the raw analytics answer, or a
    /// no-data notice.
    fn placeholder(&self, state: &WorkflowState) -> String {
        state
            .worker_outputs
            .get(StepName::QueryExecutor.as_str())
            .and_then(|output| output.get("response_content"))
            .and_then(|content| content.as_str())
            .filter(|content| !content.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.messages.no_data_summary.clone())
    }

    async fn generate(&self, state: &WorkflowState) -> Option<String> {
        let extraction = self.extraction.as_ref()?;
        match extraction.invoke(&self.prompts.summary(&state.messages)).await {
            Ok(summary) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
            Ok(_) => {
                tracing::warn!("summary came back empty");
                None
            }
            Err(error) => {
                tracing::warn!(error = %error, "summary generation failed");
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl WorkflowStep for Summarizer {
    fn name(&self) -> StepName {
        StepName::Summarizer
    }

    async fn run(&self, mut state: WorkflowState) -> StepOutcome {
        let (summary, status) = match self.generate(&state).await {
            Some(summary) => (summary, "completed"),
            None => (self.placeholder(&state), "placeholder"),
        };

        state.add_message(Message::assistant(summary.clone()));
        state.record_output(
            StepName::Summarizer,
            json!({ "status": status, "summary": summary }),
        );
        StepOutcome::Done(state)
    }
}
