//! The unit of work applied to each target of a batch.

use crate::outcome::AttemptError;
use crate::target::Target;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// One kind of per-target work (probe, poll, API call, artifact push).
///
/// The engine calls `execute` once per attempt and enforces `budget` itself;
/// implementations may also pass it down to their transport. Failures must
/// be classified so the engine can decide whether to retry.
#[async_trait]
pub trait TargetOperation: Send + Sync {
    /// Short name used in logs (`ping`, `poll`, ...)
    fn kind(&self) -> &str;

    async fn execute(&self, target: &Target, budget: Duration) -> Result<Value, AttemptError>;

    /// Called when the engine abandons an attempt at the end of its budget;
    /// `execute` never returns for that attempt.
    fn attempt_timed_out(&self, _target: &Target) {}
}
