//! Per-target attempt loop shared by both executors.
//!
//! Each attempt runs under the policy timeout. Retryable failures are retried
//! immediately (no backoff) until the attempt budget is spent; the shared
//! cancellation token is checked before every attempt and raced against the
//! attempt in flight.

use crate::operation::TargetOperation;
use crate::outcome::{AttemptError, FailureKind, OperationResult, Outcome};
use crate::policy::DispatchPolicy;
use crate::target::Target;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Immutable per-batch view of the policy fields the attempt loop needs.
#[derive(Debug, Clone)]
pub struct AttemptPlan {
    pub timeout: Duration,
    pub max_attempts: u32,
    retryable: Vec<FailureKind>,
}

impl AttemptPlan {
    pub fn from_policy(policy: &DispatchPolicy) -> Self {
        Self {
            timeout: policy.timeout(),
            max_attempts: policy.attempts_per_target(),
            retryable: policy
                .retryable_kinds
                .iter()
                .copied()
                .filter(|k| *k != FailureKind::Cancelled)
                .collect(),
        }
    }

    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        self.retryable.contains(&kind)
    }
}

pub(crate) async fn run_target(
    op: &dyn TargetOperation,
    index: usize,
    target: &Target,
    plan: &AttemptPlan,
    cancel: &CancellationToken,
) -> OperationResult {
    let started = Instant::now();
    let mut attempts = 0u32;

    let outcome = loop {
        if cancel.is_cancelled() {
            let detail = if attempts == 0 { "batch cancelled before start" } else { "batch cancelled before retry" };
            break Outcome::failure(FailureKind::Cancelled, detail);
        }
        attempts += 1;

        let raced = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = tokio::time::timeout(plan.timeout, guarded(op, target, plan.timeout)) => Some(r),
        };
        let err = match raced {
            None => break Outcome::failure(FailureKind::Cancelled, "batch cancelled while in flight"),
            Some(Ok(Ok(payload))) => break Outcome::Success { payload },
            Some(Ok(Err(err))) => err,
            Some(Err(_)) => {
                op.attempt_timed_out(target);
                AttemptError::timeout(format!("no response within {:.1}s", plan.timeout.as_secs_f64()))
            }
        };

        if plan.is_retryable(err.kind) && attempts < plan.max_attempts {
            debug!(address = %target.address, attempt = attempts, kind = %err.kind, "retrying: {}", err.detail);
            continue;
        }
        break err.into();
    };

    OperationResult {
        index,
        address: target.address.clone(),
        outcome,
        attempts,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

/// A panicking operation is one misbehaving device, not a dead worker.
async fn guarded(
    op: &dyn TargetOperation,
    target: &Target,
    budget: Duration,
) -> Result<serde_json::Value, AttemptError> {
    match AssertUnwindSafe(op.execute(target, budget)).catch_unwind().await {
        Ok(r) => r,
        Err(_) => Err(AttemptError::protocol(format!("{} operation panicked", op.kind()))),
    }
}
