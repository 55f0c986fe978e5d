//! Handle for a submitted warehouse job.
//!
//! # Invariants
//! - `wait` never blocks longer than the given timeout.
//! - A timed-out job is cancelled exactly once before `wait` returns.

use super::{QueryOutcome, WarehouseError, WarehouseResult};
use log::warn;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

type Canceller = Box<dyn FnOnce() + Send>;

/// Pending job; resolves to a `QueryOutcome` or a `WarehouseError`.
pub struct QueryJob {
    job_id: String,
    receiver: Receiver<WarehouseResult<QueryOutcome>>,
    canceller: Option<Canceller>,
}

impl QueryJob {
    /// Wraps a job whose result will arrive on `receiver`.
    pub fn new(
        job_id: impl Into<String>,
        receiver: Receiver<WarehouseResult<QueryOutcome>>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            receiver,
            canceller: None,
        }
    }

    /// Registers the action run when a wait times out.
    pub fn with_canceller(mut self, canceller: impl FnOnce() + Send + 'static) -> Self {
        self.canceller = Some(Box::new(canceller));
        self
    }

    /// Builds an already-finished job, for synchronous implementations.
    pub fn completed(job_id: impl Into<String>, result: WarehouseResult<QueryOutcome>) -> Self {
        let (sender, receiver) = std::sync::mpsc::channel();
        let _ = sender.send(result);
        Self::new(job_id, receiver)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Blocks until the job completes or `timeout` elapses.
    ///
    /// # Errors
    /// - The job's own error when it failed.
    /// - `Timeout` after cancelling the job when the bound elapses.
    /// - `JobLost` when the worker dropped its result channel.
    pub fn wait(mut self, timeout: Duration) -> WarehouseResult<QueryOutcome> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "event=job_wait module=warehouse status=timeout job_id={} waited_ms={}",
                    self.job_id,
                    timeout.as_millis()
                );
                if let Some(cancel) = self.canceller.take() {
                    cancel();
                }
                Err(WarehouseError::Timeout {
                    job_id: self.job_id,
                    waited: timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(WarehouseError::JobLost {
                job_id: self.job_id,
            }),
        }
    }
}

impl std::fmt::Debug for QueryJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryJob")
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}
