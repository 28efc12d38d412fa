//! Execution strategies.
//!
//! Both strategies run the same attempt loop over the same job and differ
//! only in the host resources they consume: `Threaded` holds one OS thread
//! per worker, `EventLoop` multiplexes every in-flight target on a single
//! thread. The choice is a tagged enum picked from the policy.

mod event_loop;
mod threaded;

pub use event_loop::EventLoopExecutor;
pub use threaded::ThreadedExecutor;

use crate::engine::DispatchError;
use crate::operation::TargetOperation;
use crate::outcome::OperationResult;
use crate::progress::{ProgressEvent, ProgressSender};
use crate::retry::AttemptPlan;
use crate::target::Target;
use tokio_util::sync::CancellationToken;

/// Everything an executor needs for one batch, borrowed for its duration.
pub struct BatchJob<'a> {
    pub targets: &'a [Target],
    pub operation: &'a dyn TargetOperation,
    pub plan: &'a AttemptPlan,
    pub limit: usize,
    pub cancel: &'a CancellationToken,
    pub progress: Option<&'a ProgressSender>,
}

impl BatchJob<'_> {
    /// Forwards a finished target to the progress channel, if any.
    ///
    /// A consumer that went away does not affect the batch.
    pub(crate) fn report(&self, result: &OperationResult) {
        if let Some(tx) = self.progress {
            let _ = tx.send(ProgressEvent::target(result));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Executor {
    Threaded(ThreadedExecutor),
    EventLoop(EventLoopExecutor),
}

impl Executor {
    pub fn select(use_async_client: bool) -> Self {
        if use_async_client {
            Executor::EventLoop(EventLoopExecutor)
        } else {
            Executor::Threaded(ThreadedExecutor)
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Executor::Threaded(_) => "threaded",
            Executor::EventLoop(_) => "event-loop",
        }
    }

    /// Runs the job to completion on the calling thread.
    ///
    /// Must not be called from inside an async runtime.
    pub fn run(&self, job: &BatchJob<'_>) -> Result<Vec<OperationResult>, DispatchError> {
        match self {
            Executor::Threaded(e) => e.run(job),
            Executor::EventLoop(e) => e.run(job),
        }
    }
}
