//! Streaming chat gateway in front of a workflow serving endpoint, and the
//! HTTP host that serves the workflow engine itself.

mod admission;
mod capability;
mod config;
mod endpoint;
mod error;
mod gateway;
mod http_endpoint;
mod local_endpoint;
pub mod parse;
pub mod routes;
pub mod sse;

pub use admission::{Admission, AdmissionPermit};
pub use capability::{CapabilityCache, EndpointCapabilities};
pub use config::GatewayConfig;
pub use endpoint::{DownstreamReply, DownstreamRequest, FrameStream, ServingEndpoint};
pub use error::{parse_retry_after, DownstreamError, GatewayError};
pub use gateway::{
    ChatReply, ChatRequest, GatewayEvent, StreamingGateway, FAILURE_PREFIX, RATE_LIMITED_MESSAGE,
};
pub use http_endpoint::{HttpServingEndpoint, HttpServingEndpointBuilder};
pub use local_endpoint::LocalServingEndpoint;
pub use routes::{agent_router, gateway_router};
pub use procura_graph::ThreadLocks;
