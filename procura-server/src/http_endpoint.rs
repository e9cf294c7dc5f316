use std::fmt;
use std::time::Duration;

use futures::{stream, Stream, StreamExt};
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use url::Url;

use procura_core::ProcuraError;

use crate::capability::EndpointCapabilities;
use crate::endpoint::{DownstreamReply, DownstreamRequest, FrameStream, ServingEndpoint};
use crate::error::{parse_retry_after, DownstreamError};
use crate::parse::{
    error_message, extract_content, extract_trace_id, parse_stream_line, LineBuffer, StreamFrame,
    NO_CONTENT,
};

/// Serving endpoint reached over HTTP (`/capabilities`, `/invocations`,
/// `/threads/:id`).
#[derive(Clone)]
pub struct HttpServingEndpoint {
    http: Client,
    base: Url,
    name: String,
    api_key: Option<SecretString>,
    request_timeout: Duration,
}

impl fmt::Debug for HttpServingEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServingEndpoint")
            .field("base", &self.base.as_str())
            .field("name", &self.name)
            .field(
                "api_key",
                &if self.api_key.is_some() { "<redacted>" } else { "<none>" },
            )
            .finish()
    }
}

impl HttpServingEndpoint {
    pub fn builder(base_url: impl Into<String>) -> HttpServingEndpointBuilder {
        HttpServingEndpointBuilder {
            base_url: base_url.into(),
            name: None,
            api_key: None,
            connect_timeout: Duration::from_secs(8),
            read_timeout: Duration::from_secs(30),
        }
    }

    fn url(&self, path: &str) -> Result<Url, DownstreamError> {
        self.base
            .join(path)
            .map_err(|error| DownstreamError::Endpoint(error.to_string()))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }

    fn body(request: &DownstreamRequest, stream: bool) -> Value {
        json!({
            "messages": request.messages,
            "stream": stream,
            "return_trace": request.return_trace,
            "custom_inputs": { "thread_id": request.thread_id },
        })
    }
}

async fn check_status(response: Response) -> Result<Response, DownstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().await.unwrap_or_default();
    Err(DownstreamError::Status {
        status: status.as_u16(),
        message: error_message(&body),
        retry_after,
    })
}

fn decode_frames<S, B>(bytes: S) -> FrameStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = (Box::pin(bytes), LineBuffer::default(), Vec::new(), false);
    stream::unfold(state, |(mut bytes, mut buffer, mut ready, mut finished)| async move {
        loop {
            if !ready.is_empty() {
                let frame = ready.remove(0);
                return Some((frame, (bytes, buffer, ready, finished)));
            }
            if finished {
                return None;
            }
            let lines = match bytes.next().await {
                Some(Ok(chunk)) => buffer.push(chunk.as_ref()),
                Some(Err(error)) => {
                    ready.push(Err(DownstreamError::StreamInterrupted(error.to_string())));
                    finished = true;
                    continue;
                }
                None => {
                    finished = true;
                    buffer.finish().into_iter().collect()
                }
            };
            for line in lines {
                match parse_stream_line(&line) {
                    Some(StreamFrame::Done) => {
                        ready.push(Ok(StreamFrame::Done));
                        finished = true;
                        break;
                    }
                    Some(frame) => ready.push(Ok(frame)),
                    None => {}
                }
            }
        }
    })
    .boxed()
}

#[async_trait::async_trait]
impl ServingEndpoint for HttpServingEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<EndpointCapabilities, DownstreamError> {
        let response = self
            .authorized(self.http.get(self.url("capabilities")?))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(DownstreamError::transport)?;
        check_status(response)
            .await?
            .json()
            .await
            .map_err(|error| DownstreamError::Malformed(error.to_string()))
    }

    async fn stream(&self, request: &DownstreamRequest) -> Result<FrameStream, DownstreamError> {
        let response = self
            .authorized(self.http.post(self.url("invocations")?))
            .header(ACCEPT, "text/event-stream")
            .json(&Self::body(request, true))
            .send()
            .await
            .map_err(DownstreamError::transport)?;
        let response = check_status(response).await?;
        Ok(decode_frames(response.bytes_stream()))
    }

    async fn invoke(
        &self,
        request: &DownstreamRequest,
        cache_bust: bool,
    ) -> Result<DownstreamReply, DownstreamError> {
        let mut url = self.url("invocations")?;
        if cache_bust {
            url.query_pairs_mut()
                .append_pair("nocache", &uuid::Uuid::new_v4().to_string());
        }
        tracing::debug!(url = %url, "buffered invocation");

        let response = self
            .authorized(self.http.post(url))
            .timeout(self.request_timeout)
            .json(&Self::body(request, false))
            .send()
            .await
            .map_err(DownstreamError::transport)?;
        let body: Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|error| DownstreamError::Malformed(error.to_string()))?;

        Ok(DownstreamReply {
            content: extract_content(&body).unwrap_or_else(|| NO_CONTENT.to_string()),
            trace_id: request
                .return_trace
                .then(|| extract_trace_id(&body))
                .flatten(),
        })
    }

    async fn clear_thread(&self, thread_id: &str) -> Result<(), DownstreamError> {
        let mut url = self.url("threads/")?;
        url.path_segments_mut()
            .map_err(|_| DownstreamError::Endpoint("endpoint url cannot be a base".into()))?
            .pop_if_empty()
            .push(thread_id);
        let response = self
            .authorized(self.http.delete(url))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(DownstreamError::transport)?;
        check_status(response).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct HttpServingEndpointBuilder {
    base_url: String,
    name: Option<String>,
    api_key: Option<SecretString>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl fmt::Debug for HttpServingEndpointBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServingEndpointBuilder")
            .field("base_url", &self.base_url)
            .field("name", &self.name)
            .field(
                "api_key",
                &if self.api_key.is_some() { "<redacted>" } else { "<none>" },
            )
            .finish()
    }
}

impl HttpServingEndpointBuilder {
    /// Capability-cache key; defaults to the base url.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.trim().is_empty()).then(|| SecretString::new(api_key));
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Idle limit between stream chunks; buffered calls use it as their
    /// whole-request timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<HttpServingEndpoint, ProcuraError> {
        let raw = self.base_url.trim();
        let mut base = Url::parse(raw).map_err(|error| {
            ProcuraError::InvalidConfig(format!("invalid serving endpoint url '{raw}': {error}"))
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        if base.scheme() == "https" && self.api_key.is_none() {
            tracing::warn!(endpoint = %base, "https serving endpoint configured without an api key");
        }

        let http = Client::builder()
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
            .build()
            .map_err(|error| ProcuraError::InvalidConfig(error.to_string()))?;

        Ok(HttpServingEndpoint {
            http,
            name: self.name.unwrap_or_else(|| base.to_string()),
            base,
            api_key: self.api_key,
            request_timeout: self.read_timeout,
        })
    }
}
