use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::ProcuraError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Jitter {
    None,
    /// Uniformly random delay between zero and the computed backoff.
    Full,
}

/// Classification of a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    /// Retry, but wait at least this long (server-supplied) before backing off.
    RetryAfter(Duration),
    Stop,
}

/// Exponential backoff bounded by attempt count and total wall-clock time.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub exponent_base: u32,
    pub max_delay: Duration,
    pub max_elapsed: Duration,
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            exponent_base: 4,
            max_delay: Duration::from_secs(60),
            max_elapsed: Duration::from_secs(120),
            jitter: Jitter::Full,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Un-jittered delay after the `failures`-th failed attempt (1-based).
    pub fn backoff_delay(&self, failures: usize) -> Duration {
        let exponent = u32::try_from(failures.saturating_sub(1)).unwrap_or(u32::MAX);
        let multiplier = self.exponent_base.max(1).saturating_pow(exponent);
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        match self.jitter {
            Jitter::None => delay,
            Jitter::Full => {
                let ceiling = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                if ceiling == 0 {
                    return delay;
                }
                Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
            }
        }
    }

    /// Runs `operation` until it succeeds, `classify` says stop, or the
    /// attempt/time budget runs out. The last error is returned unchanged.
    pub async fn run<T, E, F, Fut, C>(&self, mut operation: F, classify: C) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> RetryDecision,
        E: Display,
    {
        let started = Instant::now();
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match operation(attempt).await {
                Ok(output) => return Ok(output),
                Err(error) => error,
            };

            let decision = classify(&error);
            if decision == RetryDecision::Stop {
                return Err(error);
            }
            if attempt >= max_attempts {
                tracing::warn!(attempt, error = %error, "retry attempts exhausted");
                return Err(error);
            }

            let mut delay = self.jittered(self.backoff_delay(attempt));
            if let RetryDecision::RetryAfter(wait) = decision {
                delay = delay.saturating_add(wait);
            }
            if started.elapsed().saturating_add(delay) > self.max_elapsed {
                tracing::warn!(attempt, error = %error, "retry time budget exhausted");
                return Err(error);
            }

            tracing::info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "retrying after failure"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

pub fn is_retryable(error: &ProcuraError) -> bool {
    matches!(
        error,
        ProcuraError::LlmProvider(_) | ProcuraError::AnalyticsFailed(_) | ProcuraError::Timeout(_)
    )
}

pub fn classify(error: &ProcuraError) -> RetryDecision {
    if is_retryable(error) {
        RetryDecision::Retry
    } else {
        RetryDecision::Stop
    }
}
