use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Process-wide cap on rows talking to the backend at the same time.
///
/// Cloning shares the same counter; build one at startup and hand clones to
/// whoever needs it.
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

/// A held slot. The slot goes back to the gate when this is dropped, which
/// covers normal return, early `?`, panics and task cancellation alike.
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.limit - self.available()
    }

    /// Waits for a free slot. Fails only if the semaphore was closed.
    pub async fn acquire(&self) -> Result<GatePermit, AcquireError> {
        let permit = self.semaphore.clone().acquire_owned().await?;
        Ok(GatePermit { _permit: permit })
    }
}
