use std::sync::Arc;

use serde_json::json;

use procura_core::{AnalyticsQueryCapability, Message};

use crate::config::ValidationConfig;
use crate::prompts::SystemMessages;
use crate::{StepName, StepOutcome, WorkflowState, WorkflowStep};

/// Sends the combined prompt to the analytics capability.
pub struct QueryExecutor {
    analytics: Arc<dyn AnalyticsQueryCapability>,
    validation: ValidationConfig,
    messages: Arc<SystemMessages>,
}

impl QueryExecutor {
    pub fn new(analytics: Arc<dyn AnalyticsQueryCapability>) -> Self {
        Self {
            analytics,
            validation: ValidationConfig::default(),
            messages: Arc::new(SystemMessages::default()),
        }
    }

    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_messages(mut self, messages: Arc<SystemMessages>) -> Self {
        self.messages = messages;
        self
    }

    fn validate<'a>(&self, combined_prompt: Option<&'a str>) -> Result<&'a str, String> {
        let Some(prompt) = combined_prompt else {
            return Err(self.messages.missing_query.clone());
        };
        let trimmed = prompt.trim();
        if trimmed.is_empty() {
            return Err(self.messages.empty_query.clone());
        }
        if trimmed.chars().count() < self.validation.min_prompt_length {
            return Err(self.messages.short_query.clone());
        }
        Ok(trimmed)
    }

    fn fail(&self, mut state: WorkflowState, status: &str, error: String) -> StepOutcome {
        let step = StepName::QueryExecutor;
        state.add_message(Message::assistant(error.clone()));
        state.record_error(step, &error);
        state.record_output(step, json!({ "status": status, "error": error }));
        StepOutcome::Continue(state)
    }
}

#[async_trait::async_trait]
impl WorkflowStep for QueryExecutor {
    fn name(&self) -> StepName {
        StepName::QueryExecutor
    }

    async fn run(&self, mut state: WorkflowState) -> StepOutcome {
        let query = match self.validate(state.combined_prompt.as_deref()) {
            Ok(query) => query.to_string(),
            Err(error) => {
                tracing::warn!(error = error.as_str(), "analytics query rejected");
                return self.fail(state, "invalid", error);
            }
        };

        let response = match self.analytics.invoke(&query).await {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(error = %error, "analytics query failed");
                let message = SystemMessages::render(
                    &self.messages.analytics_error,
                    &[("error", &error.to_string())],
                );
                return self.fail(state, "failed", message);
            }
        };

        let Some(answer) = response.final_answer().map(str::to_string) else {
            return self.fail(state, "failed", self.messages.analytics_empty.clone());
        };

        state.add_message(Message::assistant(answer.clone()));
        state.record_output(
            StepName::QueryExecutor,
            json!({
                "status": "completed",
                "combined_prompt": query,
                "response_content": answer,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        );
        StepOutcome::Continue(state)
    }
}
