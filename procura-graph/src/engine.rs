use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

use procura_core::{
    AnalyticsQueryCapability, ExtractionCapability, HierarchyLookupCapability, Message,
};

use crate::config::{ExecutionConfig, ValidationConfig};
use crate::prompts::SystemMessages;
use crate::resolver::{HierarchyResolver, ItemKind};
use crate::supervisor::{Decision, Supervisor};
use crate::thread_lock::ThreadLocks;
use crate::{
    Checkpoint, Checkpointer, Clarification, GraphError, InMemoryCheckpointer, QueryExecutor,
    StepName, StepOutcome, Summarizer, Suspension, WorkflowState, WorkflowStep,
};

/// Progress notifications emitted while a turn runs.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    StepStarted { step: StepName },
    StepCompleted { step: StepName },
    Message { message: Message },
    Suspended { clarification: Clarification },
    Completed { answer: String },
    Error { message: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum TurnOutcome {
    Completed {
        state: WorkflowState,
        answer: String,
    },
    Suspended {
        state: WorkflowState,
        clarification: Clarification,
    },
}

impl TurnOutcome {
    pub fn state(&self) -> &WorkflowState {
        match self {
            TurnOutcome::Completed { state, .. } | TurnOutcome::Suspended { state, .. } => state,
        }
    }

    /// Text to show the caller: the final answer or the clarification request.
    pub fn content(&self) -> &str {
        match self {
            TurnOutcome::Completed { answer, .. } => answer,
            TurnOutcome::Suspended { clarification, .. } => &clarification.message,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, TurnOutcome::Suspended { .. })
    }
}

type EventSender<'a> = Option<&'a mpsc::Sender<WorkflowEvent>>;

async fn emit(events: EventSender<'_>, event: WorkflowEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

/// Events of a turn running on a background task. Dropping the stream aborts
/// the turn; whatever it already persisted stays, as checkpoints are only
/// written at step boundaries.
pub struct TurnStream {
    events: ReceiverStream<WorkflowEvent>,
    task: AbortHandle,
}

impl Stream for TurnStream {
    type Item = WorkflowEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().events).poll_next(cx)
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Drives Supervisor and steps for one thread at a time, persisting after
/// every step boundary.
pub struct WorkflowEngine {
    steps: HashMap<StepName, Arc<dyn WorkflowStep>>,
    supervisor: Supervisor,
    checkpointer: Arc<dyn Checkpointer<WorkflowState>>,
    config: ExecutionConfig,
    threads: ThreadLocks,
}

impl WorkflowEngine {
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::default()
    }

    /// Latest persisted state of a thread.
    pub async fn state(&self, thread_id: &str) -> Result<Option<WorkflowState>, GraphError> {
        Ok(self
            .checkpointer
            .load(thread_id)
            .await?
            .map(|checkpoint| checkpoint.state))
    }

    pub async fn clear_thread(&self, thread_id: &str) -> Result<(), GraphError> {
        let _turn = self.threads.lock(thread_id).await;
        tracing::info!(thread_id, "clearing thread");
        self.checkpointer.delete_thread(thread_id).await
    }

    /// Routes a chat turn: resume when a clarification is pending, otherwise
    /// start (or continue) a request.
    pub async fn handle_turn(
        &self,
        thread_id: &str,
        content: &str,
    ) -> Result<TurnOutcome, GraphError> {
        self.handle_turn_with_events(thread_id, content, None).await
    }

    /// Turns of one thread run one after the other; a second turn waits for
    /// the first to finish (or be aborted) before loading state.
    pub async fn handle_turn_with_events(
        &self,
        thread_id: &str,
        content: &str,
        events: EventSender<'_>,
    ) -> Result<TurnOutcome, GraphError> {
        let _turn = self.threads.lock(thread_id).await;
        let (state, version) = self.load(thread_id).await?;
        if state.pending.is_some() {
            return self
                .resume_loaded(thread_id, state, version, content, events)
                .await;
        }

        let mut state = state;
        state.begin_request(content);
        tracing::info!(thread_id, "starting request");
        self.drive(thread_id, state, version, None, events).await
    }

    pub async fn resume(&self, thread_id: &str, input: &str) -> Result<TurnOutcome, GraphError> {
        let _turn = self.threads.lock(thread_id).await;
        let (state, version) = self.load(thread_id).await?;
        self.resume_loaded(thread_id, state, version, input, None)
            .await
    }

    /// Runs a turn on a background task and streams its events.
    pub fn stream_turn(
        self: &Arc<Self>,
        thread_id: impl Into<String>,
        content: impl Into<String>,
    ) -> TurnStream {
        let (tx, rx) = mpsc::channel(64);
        let engine = Arc::clone(self);
        let thread_id = thread_id.into();
        let content = content.into();
        let task = tokio::spawn(async move {
            if let Err(error) = engine
                .handle_turn_with_events(&thread_id, &content, Some(&tx))
                .await
            {
                tracing::error!(thread_id = thread_id.as_str(), error = %error, "turn failed");
                let _ = tx
                    .send(WorkflowEvent::Error {
                        message: error.to_string(),
                    })
                    .await;
            }
        });
        TurnStream {
            events: ReceiverStream::new(rx),
            task: task.abort_handle(),
        }
    }

    async fn load(&self, thread_id: &str) -> Result<(WorkflowState, Option<u64>), GraphError> {
        Ok(match self.checkpointer.load(thread_id).await? {
            Some(checkpoint) => (checkpoint.state, Some(checkpoint.step)),
            None => (WorkflowState::default(), None),
        })
    }

    async fn resume_loaded(
        &self,
        thread_id: &str,
        mut state: WorkflowState,
        version: Option<u64>,
        input: &str,
        events: EventSender<'_>,
    ) -> Result<TurnOutcome, GraphError> {
        let Some(pending) = state.pending.clone() else {
            return Err(GraphError::InvalidResume {
                thread_id: thread_id.to_string(),
            });
        };

        let input = input.trim();
        if input.is_empty() {
            tracing::warn!(thread_id, step = pending.step.as_str(), "empty clarification, asking again");
            let clarification = Clarification {
                message: pending.message,
                conversation_so_far: state.messages.clone(),
            };
            emit(
                events,
                WorkflowEvent::Suspended {
                    clarification: clarification.clone(),
                },
            )
            .await;
            return Ok(TurnOutcome::Suspended {
                state,
                clarification,
            });
        }

        tracing::info!(thread_id, step = pending.step.as_str(), "resuming suspended step");
        state.add_message(Message::user(input));
        if let Some(kind) = ItemKind::for_step(pending.step) {
            kind.set_confirmation(&mut state, Some(input.to_string()));
        }
        state.pending = None;
        self.drive(thread_id, state, version, Some(pending.step), events)
            .await
    }

    async fn drive(
        &self,
        thread_id: &str,
        mut state: WorkflowState,
        mut version: Option<u64>,
        mut resume_at: Option<StepName>,
        events: EventSender<'_>,
    ) -> Result<TurnOutcome, GraphError> {
        let mut steps_taken = 0;
        loop {
            let step_name = match resume_at.take() {
                Some(step) => step,
                None => match self.supervisor.decide(&state).await {
                    Decision::Next(step) => step,
                    Decision::Terminal => return Ok(self.complete(state, events).await),
                },
            };

            if steps_taken >= self.config.max_steps {
                return Err(GraphError::MaxStepsExceeded {
                    max: self.config.max_steps,
                    reached: steps_taken,
                });
            }
            steps_taken += 1;

            let step = self
                .steps
                .get(&step_name)
                .cloned()
                .ok_or_else(|| GraphError::MissingStep {
                    step: step_name.to_string(),
                })?;

            tracing::info!(thread_id, step = step_name.as_str(), "running step");
            state.next_step = Some(step_name);
            emit(events, WorkflowEvent::StepStarted { step: step_name }).await;
            let logged = state.messages.len();

            match step.run(state).await {
                StepOutcome::Continue(next) => {
                    state = next;
                    self.persist(thread_id, &state, step_name, &mut version)
                        .await?;
                    emit_messages(events, &state, logged).await;
                    emit(events, WorkflowEvent::StepCompleted { step: step_name }).await;
                }
                StepOutcome::Done(next) => {
                    state = next;
                    self.persist(thread_id, &state, step_name, &mut version)
                        .await?;
                    emit_messages(events, &state, logged).await;
                    emit(events, WorkflowEvent::StepCompleted { step: step_name }).await;
                    return Ok(self.complete(state, events).await);
                }
                StepOutcome::Suspend { state: mut next, message } => {
                    next.pending = Some(Suspension {
                        step: step_name,
                        message: message.clone(),
                    });
                    self.persist(thread_id, &next, step_name, &mut version)
                        .await?;
                    emit_messages(events, &next, logged).await;
                    tracing::info!(thread_id, step = step_name.as_str(), "suspended for clarification");
                    let clarification = Clarification {
                        message,
                        conversation_so_far: next.messages.clone(),
                    };
                    emit(
                        events,
                        WorkflowEvent::Suspended {
                            clarification: clarification.clone(),
                        },
                    )
                    .await;
                    return Ok(TurnOutcome::Suspended {
                        state: next,
                        clarification,
                    });
                }
            }
        }
    }

    async fn complete(&self, state: WorkflowState, events: EventSender<'_>) -> TurnOutcome {
        let answer = state
            .worker_outputs
            .get(StepName::Summarizer.as_str())
            .and_then(|output| output.get("summary"))
            .and_then(|summary| summary.as_str())
            .or_else(|| state.last_assistant_message())
            .unwrap_or_default()
            .to_string();
        emit(
            events,
            WorkflowEvent::Completed {
                answer: answer.clone(),
            },
        )
        .await;
        TurnOutcome::Completed { state, answer }
    }

    async fn persist(
        &self,
        thread_id: &str,
        state: &WorkflowState,
        node: StepName,
        version: &mut Option<u64>,
    ) -> Result<(), GraphError> {
        let next = version.map_or(0, |current| current + 1);
        let checkpoint = Checkpoint::new(thread_id, state.clone(), next, node.as_str());
        self.checkpointer
            .compare_and_save(&checkpoint, *version)
            .await?;
        *version = Some(next);
        tracing::debug!(thread_id, step = node.as_str(), version = next, "checkpoint saved");
        Ok(())
    }
}

async fn emit_messages(events: EventSender<'_>, state: &WorkflowState, from: usize) {
    for message in state.messages.iter().skip(from) {
        emit(
            events,
            WorkflowEvent::Message {
                message: message.clone(),
            },
        )
        .await;
    }
}

pub struct WorkflowEngineBuilder {
    extraction: Option<Arc<dyn ExtractionCapability>>,
    material_lookup: Option<Arc<dyn HierarchyLookupCapability>>,
    location_lookup: Option<Arc<dyn HierarchyLookupCapability>>,
    analytics: Option<Arc<dyn AnalyticsQueryCapability>>,
    checkpointer: Option<Arc<dyn Checkpointer<WorkflowState>>>,
    steps: HashMap<StepName, Arc<dyn WorkflowStep>>,
    config: ExecutionConfig,
    validation: ValidationConfig,
    messages: Arc<SystemMessages>,
}

impl Default for WorkflowEngineBuilder {
    fn default() -> Self {
        Self {
            extraction: None,
            material_lookup: None,
            location_lookup: None,
            analytics: None,
            checkpointer: None,
            steps: HashMap::new(),
            config: ExecutionConfig::default(),
            validation: ValidationConfig::default(),
            messages: Arc::new(SystemMessages::default()),
        }
    }
}

impl WorkflowEngineBuilder {
    /// Leaving this unset makes every step take its "unavailable" path.
    pub fn extraction(mut self, extraction: Arc<dyn ExtractionCapability>) -> Self {
        self.extraction = Some(extraction);
        self
    }

    pub fn material_lookup(mut self, lookup: Arc<dyn HierarchyLookupCapability>) -> Self {
        self.material_lookup = Some(lookup);
        self
    }

    pub fn location_lookup(mut self, lookup: Arc<dyn HierarchyLookupCapability>) -> Self {
        self.location_lookup = Some(lookup);
        self
    }

    pub fn analytics(mut self, analytics: Arc<dyn AnalyticsQueryCapability>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn checkpointer(mut self, checkpointer: Arc<dyn Checkpointer<WorkflowState>>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Replaces the built-in step registered under the same name.
    pub fn step(mut self, step: Arc<dyn WorkflowStep>) -> Self {
        self.steps.insert(step.name(), step);
        self
    }

    pub fn execution_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn messages(mut self, messages: SystemMessages) -> Self {
        self.messages = Arc::new(messages);
        self
    }

    pub fn build(self) -> Result<WorkflowEngine, GraphError> {
        let mut steps = self.steps;
        let extraction = self.extraction;
        let messages = self.messages;

        for (kind, lookup) in [
            (ItemKind::Material, self.material_lookup),
            (ItemKind::Location, self.location_lookup),
        ] {
            if let (false, Some(lookup)) = (steps.contains_key(&kind.step()), lookup) {
                let resolver = HierarchyResolver::new(kind, extraction.clone(), lookup)
                    .with_messages(Arc::clone(&messages));
                steps.insert(kind.step(), Arc::new(resolver));
            }
        }
        if let (false, Some(analytics)) =
            (steps.contains_key(&StepName::QueryExecutor), self.analytics)
        {
            let executor = QueryExecutor::new(analytics)
                .with_validation(self.validation)
                .with_messages(Arc::clone(&messages));
            steps.insert(StepName::QueryExecutor, Arc::new(executor));
        }
        if !steps.contains_key(&StepName::Summarizer) {
            let summarizer =
                Summarizer::new(extraction.clone()).with_messages(Arc::clone(&messages));
            steps.insert(StepName::Summarizer, Arc::new(summarizer));
        }

        if let Some(missing) = StepName::ORDER
            .into_iter()
            .find(|step| !steps.contains_key(step))
        {
            return Err(GraphError::MissingStep {
                step: missing.to_string(),
            });
        }

        Ok(WorkflowEngine {
            steps,
            supervisor: Supervisor::new(extraction),
            checkpointer: self
                .checkpointer
                .unwrap_or_else(|| Arc::new(InMemoryCheckpointer::default())),
            config: self.config,
            threads: ThreadLocks::default(),
        })
    }
}
