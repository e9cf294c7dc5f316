use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use procura_core::{Message, Role, TranscriptMessage, TranscriptStore, TurnMetrics};
use procura_graph::ThreadLocks;

use crate::admission::Admission;
use crate::capability::{CapabilityCache, EndpointCapabilities};
use crate::config::GatewayConfig;
use crate::endpoint::{DownstreamReply, DownstreamRequest, ServingEndpoint};
use crate::error::{DownstreamError, GatewayError};
use crate::parse::StreamFrame;

pub const RATE_LIMITED_MESSAGE: &str =
    "The service is currently experiencing high demand. Please wait a moment and try again.";
pub const FAILURE_PREFIX: &str = "An error occurred while processing your request. ";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ChatRequest {
    pub thread_id: String,
    pub content: String,
    #[serde(default)]
    pub include_history: bool,
}

impl ChatRequest {
    pub fn new(thread_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            content: content.into(),
            include_history: false,
        }
    }

    pub fn with_history(mut self) -> Self {
        self.include_history = true;
        self
    }
}

/// The persisted reply of a turn, as relayed to the caller.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatReply {
    pub message_id: String,
    pub thread_id: String,
    pub role: Role,
    pub content: String,
    #[serde(flatten)]
    pub metrics: TurnMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub is_error: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GatewayEvent {
    /// Token text relayed while the answer streams in.
    Delta { content: String },
    Message(ChatReply),
    Done,
}

/// Admission-controlled relay between chat callers and the serving endpoint.
pub struct StreamingGateway {
    endpoint: Arc<dyn ServingEndpoint>,
    transcript: Arc<dyn TranscriptStore>,
    config: GatewayConfig,
    capabilities: CapabilityCache,
    admission: Admission,
    threads: ThreadLocks,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn failure_content(error: &GatewayError) -> String {
    match error {
        GatewayError::Downstream(error) if error.is_rate_limited() => {
            RATE_LIMITED_MESSAGE.to_string()
        }
        GatewayError::Downstream(DownstreamError::Status { message, .. }) => message.clone(),
        other => format!("{FAILURE_PREFIX}{other}"),
    }
}

impl StreamingGateway {
    pub fn new(
        endpoint: Arc<dyn ServingEndpoint>,
        transcript: Arc<dyn TranscriptStore>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            capabilities: CapabilityCache::new(config.capability_ttl),
            admission: Admission::new(config.max_concurrent_streams, config.max_queue_size),
            threads: ThreadLocks::default(),
            endpoint,
            transcript,
            config,
        }
    }

    pub fn capabilities(&self) -> &CapabilityCache {
        &self.capabilities
    }

    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    pub fn transcript(&self) -> &Arc<dyn TranscriptStore> {
        &self.transcript
    }

    /// Runs one chat turn on a background task. The stream always ends with
    /// a [`GatewayEvent::Message`] (answer or friendly error) and
    /// [`GatewayEvent::Done`]; dropping it abandons the turn.
    pub fn chat(self: &Arc<Self>, request: ChatRequest) -> ReceiverStream<GatewayEvent> {
        let (tx, rx) = mpsc::channel(64);
        let gateway = Arc::clone(self);
        let span = tracing::info_span!("chat_turn", thread_id = request.thread_id.as_str());
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = gateway.run_turn(request, &tx) => {}
                    _ = tx.closed() => {
                        tracing::info!("caller disconnected, abandoning turn");
                    }
                }
            }
            .instrument(span),
        );
        ReceiverStream::new(rx)
    }

    /// Drops the thread's transcript and workflow state.
    pub async fn clear_session(&self, thread_id: &str) -> Result<(), GatewayError> {
        let _turn = self.threads.lock(thread_id).await;
        self.transcript.clear_thread(thread_id).await?;
        self.endpoint.clear_thread(thread_id).await?;
        tracing::info!(thread_id, "session cleared");
        Ok(())
    }

    async fn run_turn(&self, request: ChatRequest, tx: &mpsc::Sender<GatewayEvent>) {
        let _turn = self.threads.lock(&request.thread_id).await;
        let started = Instant::now();

        let mut messages = if request.include_history {
            self.history(&request.thread_id).await
        } else {
            Vec::new()
        };
        messages.push(Message::user(request.content.clone()));
        self.persist(TranscriptMessage::new(
            request.thread_id.clone(),
            Role::User,
            request.content.clone(),
        ))
        .await;

        let mut downstream = DownstreamRequest {
            thread_id: request.thread_id.clone(),
            messages,
            return_trace: false,
        };
        let mut metrics = TurnMetrics::default();

        let result = match self.admission.acquire().await {
            Ok(permit) => {
                let result = self
                    .answer(&mut downstream, tx, started, &mut metrics)
                    .await;
                drop(permit);
                result
            }
            Err(error) => Err(error),
        };
        metrics.total_time_ms = millis(started.elapsed());

        let (content, trace_id, is_error) = match result {
            Ok(reply) => (reply.content, reply.trace_id, false),
            Err(error) => {
                tracing::error!(error = %error, "chat turn failed");
                (failure_content(&error), None, true)
            }
        };

        let stored = TranscriptMessage::new(request.thread_id.clone(), Role::Assistant, content)
            .with_metrics(metrics.clone());
        self.persist(stored.clone()).await;
        tracing::info!(
            total_time_ms = metrics.total_time_ms,
            streamed = metrics.streamed,
            fallback = metrics.fallback,
            "chat turn finished"
        );

        let reply = ChatReply {
            message_id: stored.message_id,
            thread_id: stored.thread_id,
            role: stored.role,
            content: stored.content,
            metrics,
            trace_id,
            is_error,
        };
        let _ = tx.send(GatewayEvent::Message(reply)).await;
        let _ = tx.send(GatewayEvent::Done).await;
    }

    async fn history(&self, thread_id: &str) -> Vec<Message> {
        match self.transcript.load_messages(thread_id).await {
            Ok(messages) => messages
                .iter()
                .map(TranscriptMessage::to_message)
                .collect(),
            Err(error) => {
                tracing::warn!(error = %error, "could not load history, sending the turn alone");
                Vec::new()
            }
        }
    }

    async fn persist(&self, message: TranscriptMessage) {
        if let Err(error) = self.transcript.save_message(&message).await {
            tracing::error!(error = %error, role = message.role.as_str(), "failed to persist message");
        }
    }

    async fn endpoint_capabilities(&self) -> EndpointCapabilities {
        let name = self.endpoint.name();
        if let Some(capabilities) = self.capabilities.get(name).await {
            return capabilities;
        }
        match self.endpoint.probe().await {
            Ok(capabilities) => {
                tracing::info!(
                    endpoint = name,
                    streaming = capabilities.streaming,
                    traces = capabilities.traces,
                    "probed endpoint capabilities"
                );
                self.capabilities.insert(name, capabilities).await;
                capabilities
            }
            Err(error) => {
                tracing::warn!(endpoint = name, error = %error, "capability probe failed, using buffered calls");
                EndpointCapabilities::default()
            }
        }
    }

    async fn answer(
        &self,
        request: &mut DownstreamRequest,
        tx: &mpsc::Sender<GatewayEvent>,
        started: Instant,
        metrics: &mut TurnMetrics,
    ) -> Result<DownstreamReply, GatewayError> {
        let capabilities = self.endpoint_capabilities().await;
        request.return_trace = capabilities.traces;

        let mut cache_bust = false;
        let mut relayed = false;
        if capabilities.streaming {
            match self
                .stream_answer(request, tx, started, metrics, &mut relayed)
                .await
            {
                Ok(reply) => return Ok(reply),
                Err(error) if !error.is_stream_fault() => return Err(error.into()),
                Err(error) => {
                    tracing::warn!(error = %error, "streaming failed, falling back to a buffered call");
                    self.capabilities
                        .demote_streaming(self.endpoint.name())
                        .await;
                    metrics.streamed = false;
                    metrics.fallback = true;
                    metrics.time_to_first_token_ms = None;
                    cache_bust = true;
                }
            }
        }

        let request: &DownstreamRequest = request;
        let reply = self
            .config
            .retry
            .run(
                |attempt| {
                    tracing::debug!(attempt, cache_bust, "buffered downstream call");
                    self.endpoint.invoke(request, cache_bust)
                },
                DownstreamError::classify,
            )
            .await?;

        // Partial deltas already went out; the final message carries the answer.
        if !relayed {
            let _ = tx
                .send(GatewayEvent::Delta {
                    content: reply.content.clone(),
                })
                .await;
        }
        Ok(reply)
    }

    async fn stream_answer(
        &self,
        request: &DownstreamRequest,
        tx: &mpsc::Sender<GatewayEvent>,
        started: Instant,
        metrics: &mut TurnMetrics,
        relayed: &mut bool,
    ) -> Result<DownstreamReply, DownstreamError> {
        metrics.streamed = true;
        let mut frames = self.endpoint.stream(request).await?;
        let mut accumulated = String::new();
        let mut complete: Option<String> = None;
        let mut terminated = false;

        while let Some(frame) = frames.next().await {
            let frame = frame?;
            if metrics.time_to_first_token_ms.is_none() {
                metrics.time_to_first_token_ms = Some(millis(started.elapsed()));
            }
            match frame {
                StreamFrame::Delta(content) => {
                    accumulated.push_str(&content);
                    *relayed = true;
                    let _ = tx.send(GatewayEvent::Delta { content }).await;
                }
                StreamFrame::Message(message) => {
                    if accumulated.is_empty() {
                        *relayed = true;
                        let _ = tx
                            .send(GatewayEvent::Delta {
                                content: message.content.clone(),
                            })
                            .await;
                    }
                    complete = Some(message.content);
                }
                StreamFrame::Done => {
                    terminated = true;
                    break;
                }
            }
        }

        if !terminated {
            return Err(DownstreamError::StreamInterrupted(
                "stream ended before its terminator".into(),
            ));
        }
        let content = complete.unwrap_or(accumulated);
        if content.is_empty() {
            return Err(DownstreamError::StreamInterrupted(
                "stream ended without content".into(),
            ));
        }
        Ok(DownstreamReply {
            content,
            trace_id: None,
        })
    }
}
