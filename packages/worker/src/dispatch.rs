//! Process-wide admission control for sandboxed executions.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Bounded pool admitting at most N concurrently in-flight execution-engine
/// invocations across all submissions. Queued callers are served in FIFO
/// order with no per-submission priority; the engine's hard timeout
/// guarantees permits keep turning over.
#[derive(Clone)]
pub struct Dispatcher {
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Run one unit of work under a permit.
    pub async fn run<F, T>(&self, work: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is never closed, so acquire cannot fail.
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("dispatcher semaphore closed");
        work.await
    }
}
