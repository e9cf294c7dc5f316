use crate::{StepName, WorkflowState};

/// Result of running one resolution step.
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    Continue(WorkflowState),
    /// Halt the turn and ask the caller for input; the step is re-entered on resume.
    Suspend {
        state: WorkflowState,
        message: String,
    },
    /// The workflow is finished after this step.
    Done(WorkflowState),
}

impl StepOutcome {
    pub fn state(&self) -> &WorkflowState {
        match self {
            StepOutcome::Continue(state) | StepOutcome::Done(state) => state,
            StepOutcome::Suspend { state, .. } => state,
        }
    }
}

/// A resolution step never fails outward: capability problems are folded
/// into the returned state.
#[async_trait::async_trait]
pub trait WorkflowStep: Send + Sync + 'static {
    fn name(&self) -> StepName;
    async fn run(&self, state: WorkflowState) -> StepOutcome;
}
