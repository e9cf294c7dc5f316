use std::sync::Arc;

use procura_core::ExtractionCapability;

use crate::prompts::PromptSet;
use crate::{StepName, WorkflowState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Next(StepName),
    Terminal,
}

/// Picks the next step. The decision capability is consulted but never
/// trusted: invalid or repeated answers fall back to fixed order.
pub struct Supervisor {
    extraction: Option<Arc<dyn ExtractionCapability>>,
    prompts: PromptSet,
}

impl Supervisor {
    pub fn new(extraction: Option<Arc<dyn ExtractionCapability>>) -> Self {
        Self {
            extraction,
            prompts: PromptSet,
        }
    }

    /// First step in fixed order that has not run, else the summarizer.
    pub fn fallback(state: &WorkflowState) -> StepName {
        StepName::ORDER
            .into_iter()
            .find(|step| !state.has_run(*step))
            .unwrap_or(StepName::Summarizer)
    }

    pub async fn decide(&self, state: &WorkflowState) -> Decision {
        if state.is_terminated() {
            return Decision::Terminal;
        }
        let fallback = Self::fallback(state);

        let Some(extraction) = self.extraction.as_ref() else {
            return Decision::Next(fallback);
        };

        let answer = match extraction.invoke(&self.prompts.supervisor(state)).await {
            Ok(answer) => answer,
            Err(error) => {
                tracing::debug!(error = %error, fallback = fallback.as_str(), "decision unavailable");
                return Decision::Next(fallback);
            }
        };

        match StepName::parse(&answer) {
            Some(step) if state.has_run(step) => {
                tracing::warn!(
                    chosen = step.as_str(),
                    fallback = fallback.as_str(),
                    "supervisor chose a completed step"
                );
                Decision::Next(fallback)
            }
            Some(step) => Decision::Next(step),
            None => {
                tracing::debug!(answer = answer.as_str(), fallback = fallback.as_str(), "unrecognised decision");
                Decision::Next(fallback)
            }
        }
    }
}
