use std::sync::Arc;

use futures::StreamExt;
use procura_core::Message;
use procura_graph::{WorkflowEngine, WorkflowEvent};

use crate::capability::EndpointCapabilities;
use crate::endpoint::{DownstreamReply, DownstreamRequest, FrameStream, ServingEndpoint};
use crate::error::DownstreamError;
use crate::parse::StreamFrame;

/// Serving endpoint backed by an in-process [`WorkflowEngine`].
#[derive(Clone)]
pub struct LocalServingEndpoint {
    engine: Arc<WorkflowEngine>,
    name: String,
}

impl LocalServingEndpoint {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self {
            engine,
            name: "local".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }
}

fn turn_content(request: &DownstreamRequest) -> Result<String, DownstreamError> {
    request
        .latest_user_content()
        .map(str::to_string)
        .ok_or_else(|| DownstreamError::Malformed("request has no user message".into()))
}

/// Maps engine events to stream frames: the answer or clarification request
/// becomes the message followed by the terminator, progress events are dropped.
pub(crate) fn event_frames(event: WorkflowEvent) -> Vec<Result<StreamFrame, DownstreamError>> {
    match event {
        WorkflowEvent::Completed { answer } => vec![
            Ok(StreamFrame::Message(Message::assistant(answer))),
            Ok(StreamFrame::Done),
        ],
        WorkflowEvent::Suspended { clarification } => vec![
            Ok(StreamFrame::Message(Message::assistant(clarification.message))),
            Ok(StreamFrame::Done),
        ],
        WorkflowEvent::Error { message } => vec![Err(DownstreamError::Endpoint(message))],
        WorkflowEvent::StepStarted { .. }
        | WorkflowEvent::StepCompleted { .. }
        | WorkflowEvent::Message { .. } => Vec::new(),
    }
}

#[async_trait::async_trait]
impl ServingEndpoint for LocalServingEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<EndpointCapabilities, DownstreamError> {
        Ok(EndpointCapabilities {
            streaming: true,
            traces: false,
        })
    }

    async fn stream(&self, request: &DownstreamRequest) -> Result<FrameStream, DownstreamError> {
        let content = turn_content(request)?;
        let events = self.engine.stream_turn(request.thread_id.clone(), content);
        Ok(events
            .flat_map(|event| futures::stream::iter(event_frames(event)))
            .boxed())
    }

    async fn invoke(
        &self,
        request: &DownstreamRequest,
        _cache_bust: bool,
    ) -> Result<DownstreamReply, DownstreamError> {
        let content = turn_content(request)?;
        let outcome = self
            .engine
            .handle_turn(&request.thread_id, &content)
            .await
            .map_err(|error| DownstreamError::Endpoint(error.to_string()))?;
        Ok(DownstreamReply {
            content: outcome.content().to_string(),
            trace_id: None,
        })
    }

    async fn clear_thread(&self, thread_id: &str) -> Result<(), DownstreamError> {
        self.engine
            .clear_thread(thread_id)
            .await
            .map_err(|error| DownstreamError::Endpoint(error.to_string()))
    }
}
