use std::time::Duration;

use procura_core::retry::{Jitter, RetryPolicy};

#[derive(Clone, Debug, PartialEq)]
pub struct GatewayConfig {
    /// Simultaneous in-flight downstream calls.
    pub max_concurrent_streams: usize,
    /// Requests allowed to wait for a slot before new ones are turned away.
    pub max_queue_size: usize,
    pub retry: RetryPolicy,
    pub capability_ttl: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 10,
            max_queue_size: 100,
            retry: RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_secs(1),
                exponent_base: 4,
                max_delay: Duration::from_secs(60),
                max_elapsed: Duration::from_secs(120),
                jitter: Jitter::Full,
            },
            capability_ttl: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(8),
            read_timeout: Duration::from_secs(30),
        }
    }
}
