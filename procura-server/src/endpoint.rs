use futures::stream::BoxStream;
use procura_core::Message;
use serde::Serialize;

use crate::capability::EndpointCapabilities;
use crate::error::DownstreamError;
use crate::parse::StreamFrame;

/// One logical chat turn as sent to the serving endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DownstreamRequest {
    pub thread_id: String,
    pub messages: Vec<Message>,
    pub return_trace: bool,
}

impl DownstreamRequest {
    /// Content of the newest user message.
    pub fn latest_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == procura_core::Role::User)
            .map(|message| message.content.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DownstreamReply {
    pub content: String,
    pub trace_id: Option<String>,
}

pub type FrameStream = BoxStream<'static, Result<StreamFrame, DownstreamError>>;

/// The serving capability hosting the workflow engine.
#[async_trait::async_trait]
pub trait ServingEndpoint: Send + Sync + 'static {
    /// Cache key for this endpoint's capabilities.
    fn name(&self) -> &str;

    async fn probe(&self) -> Result<EndpointCapabilities, DownstreamError>;

    /// Opens a streaming call. Errors before the first frame and errors
    /// inside the stream are both reported as `DownstreamError`.
    async fn stream(&self, request: &DownstreamRequest) -> Result<FrameStream, DownstreamError>;

    /// One buffered call. `cache_bust` asks for a fresh, uncached response.
    async fn invoke(
        &self,
        request: &DownstreamRequest,
        cache_bust: bool,
    ) -> Result<DownstreamReply, DownstreamError>;

    async fn clear_thread(&self, thread_id: &str) -> Result<(), DownstreamError>;
}
