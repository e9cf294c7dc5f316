use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::GatewayError;

/// Bounded FIFO queue in front of a fixed number of downstream slots.
///
/// Waiters are served in arrival order (tokio's semaphore is fair). Dropping
/// a pending [`Admission::acquire`] future leaves the queue without taking a
/// slot.
#[derive(Clone, Debug)]
pub struct Admission {
    slots: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    max_waiting: usize,
}

pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

struct WaitingGuard(Arc<AtomicUsize>);

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Admission {
    pub fn new(max_concurrent: usize, max_waiting: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent.max(1))),
            waiting: Arc::new(AtomicUsize::new(0)),
            max_waiting,
        }
    }

    pub async fn acquire(&self) -> Result<AdmissionPermit, GatewayError> {
        if let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() {
            return Ok(AdmissionPermit { _permit: permit });
        }

        let queued = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _guard = WaitingGuard(Arc::clone(&self.waiting));
        if queued >= self.max_waiting {
            tracing::warn!(waiting = queued, "admission queue full");
            return Err(GatewayError::QueueFull {
                capacity: self.max_waiting,
            });
        }

        tracing::debug!(position = queued + 1, "waiting for a downstream slot");
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::Closed)?;
        Ok(AdmissionPermit { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}
