use std::time::Duration;

use procura_core::retry::RetryDecision;
use thiserror::Error;

/// Failure talking to the serving endpoint.
#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("transport error: {message}")]
    Transport { message: String, timeout: bool },
    #[error("{message}")]
    Status {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("serving endpoint failed: {0}")]
    Endpoint(String),
}

impl DownstreamError {
    pub fn transport(error: reqwest::Error) -> Self {
        Self::Transport {
            timeout: error.is_timeout(),
            message: error.to_string(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Status { status: 429, .. })
    }

    /// Whether a failed stream says something about the endpoint's streaming
    /// support. Workflow failures reported by the endpoint itself do not.
    pub fn is_stream_fault(&self) -> bool {
        !matches!(self, Self::Endpoint(_))
    }

    /// Retry classification: transport failures, 408, 429 and 5xx are
    /// retried; other statuses and malformed bodies are final.
    pub fn classify(&self) -> RetryDecision {
        match self {
            Self::Transport { .. } | Self::StreamInterrupted(_) => RetryDecision::Retry,
            Self::Status {
                status: 429,
                retry_after: Some(wait),
                ..
            } => RetryDecision::RetryAfter(*wait),
            Self::Status { status, .. } if *status == 408 || *status == 429 || *status >= 500 => {
                RetryDecision::Retry
            }
            Self::Status { .. } | Self::Malformed(_) | Self::Endpoint(_) => RetryDecision::Stop,
        }
    }
}

/// Parses a `Retry-After` header given in whole seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("admission queue is full ({capacity} waiting)")]
    QueueFull { capacity: usize },
    #[error("admission closed")]
    Closed,
    #[error(transparent)]
    Downstream(#[from] DownstreamError),
    #[error(transparent)]
    Core(#[from] procura_core::ProcuraError),
}
