//! Batch entry point.
//!
//! `Dispatcher` snapshots a validated policy; everything a batch reads from
//! the policy comes from that snapshot, so edits made while a batch runs only
//! affect the next one.

use crate::executor::{BatchJob, Executor};
use crate::operation::TargetOperation;
use crate::outcome::BatchResult;
use crate::policy::{DispatchPolicy, PolicyError};
use crate::pool;
use crate::progress::{ProgressEvent, ProgressSender};
use crate::retry::AttemptPlan;
use crate::target::Target;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid dispatch policy: {0}")]
    Policy(#[from] PolicyError),
    #[error("failed to start executor runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("dispatch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    policy: DispatchPolicy,
    plan: AttemptPlan,
    executor: Executor,
}

impl Dispatcher {
    pub fn new(policy: DispatchPolicy) -> Result<Self, PolicyError> {
        policy.validate()?;
        let plan = AttemptPlan::from_policy(&policy);
        let executor = Executor::select(policy.use_async_client);
        Ok(Self { policy, plan, executor })
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    pub fn executor(&self) -> Executor {
        self.executor
    }

    pub fn worker_limit(&self, target_count: usize) -> usize {
        pool::worker_limit(target_count, &self.policy)
    }

    /// Runs `operation` over every target and blocks until the batch is done.
    ///
    /// Never fails because of a target: each one ends up in the result as a
    /// success or a classified failure. When `progress` is set, one `target`
    /// event is sent per completion followed by exactly one `complete` event.
    pub fn run_blocking(
        &self,
        targets: &[Target],
        operation: &dyn TargetOperation,
        cancel: &CancellationToken,
        progress: Option<&ProgressSender>,
    ) -> Result<BatchResult, DispatchError> {
        let limit = self.worker_limit(targets.len());
        let started = Instant::now();
        info!(
            operation = operation.kind(),
            executor = self.executor.name(),
            targets = targets.len(),
            limit,
            "dispatch started"
        );

        let job = BatchJob {
            targets,
            operation,
            plan: &self.plan,
            limit,
            cancel,
            progress,
        };
        let batch = BatchResult::from_results(self.executor.run(&job)?);

        if let Some(tx) = progress {
            let _ = tx.send(ProgressEvent::complete(&batch));
        }
        info!(
            operation = operation.kind(),
            succeeded = batch.succeeded_count,
            failed = batch.failed_count,
            cancelled = cancel.is_cancelled(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dispatch finished"
        );
        Ok(batch)
    }

    /// Async form of [`run_blocking`](Self::run_blocking) for callers living
    /// on a runtime; the batch runs on the blocking pool.
    pub async fn run(
        &self,
        targets: Vec<Target>,
        operation: Arc<dyn TargetOperation>,
        cancel: CancellationToken,
        progress: Option<ProgressSender>,
    ) -> Result<BatchResult, DispatchError> {
        let dispatcher = self.clone();
        tokio::task::spawn_blocking(move || {
            dispatcher.run_blocking(&targets, operation.as_ref(), &cancel, progress.as_ref())
        })
        .await?
    }
}

/// One-shot helper: validate `policy`, then run the batch.
pub fn dispatch(
    targets: &[Target],
    operation: &dyn TargetOperation,
    policy: &DispatchPolicy,
) -> Result<BatchResult, DispatchError> {
    Dispatcher::new(policy.clone())?.run_blocking(targets, operation, &CancellationToken::new(), None)
}
