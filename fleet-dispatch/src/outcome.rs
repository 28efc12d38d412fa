//! Failure taxonomy, per-target results and batch aggregation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Classification of a failed attempt.
///
/// Whether a kind is retried is decided by the policy (`retryable_kinds`),
/// not by the kind itself, so new transports can widen or narrow the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FailureKind {
    /// Refused, unreachable, DNS failure
    #[serde(rename = "connect_error")]
    Connect,
    /// No response within the attempt budget
    #[serde(rename = "timeout")]
    Timeout,
    /// Malformed or unexpected response
    #[serde(rename = "protocol_error")]
    Protocol,
    /// The device answered with a defined error (4xx, bad credentials, `success: false`)
    #[serde(rename = "application_error")]
    Application,
    /// Batch aborted before this target completed
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Connect => "connect_error",
            FailureKind::Timeout => "timeout",
            FailureKind::Protocol => "protocol_error",
            FailureKind::Application => "application_error",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by one attempt of a `TargetOperation`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct AttemptError {
    pub kind: FailureKind,
    pub detail: String,
}

impl AttemptError {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self { kind, detail: detail.into() }
    }

    pub fn connect(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Connect, detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, detail)
    }

    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Protocol, detail)
    }

    pub fn application(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Application, detail)
    }
}

/// Final outcome of one target within a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Success { payload: Value },
    Failure { kind: FailureKind, detail: String },
}

impl Outcome {
    pub fn failure(kind: FailureKind, detail: impl Into<String>) -> Self {
        Outcome::Failure { kind, detail: detail.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { kind, .. } => Some(*kind),
        }
    }

    /// `success` or the failure kind name, used for logs and comparisons
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "success",
            Outcome::Failure { kind, .. } => kind.as_str(),
        }
    }
}

impl From<AttemptError> for Outcome {
    fn from(err: AttemptError) -> Self {
        Outcome::Failure { kind: err.kind, detail: err.detail }
    }
}

/// Result of one target, created once per batch and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Position of the target in the submitted list
    pub index: usize,
    pub address: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn payload(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Success { payload } => Some(payload),
            Outcome::Failure { .. } => None,
        }
    }
}

/// Complete accounting of a batch, results in submission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub results: Vec<OperationResult>,
    pub succeeded_count: usize,
    pub failed_count: usize,
}

impl BatchResult {
    pub fn from_results(mut results: Vec<OperationResult>) -> Self {
        results.sort_by_key(|r| r.index);
        let succeeded_count = results.iter().filter(|r| r.is_success()).count();
        let failed_count = results.len() - succeeded_count;
        Self { results, succeeded_count, failed_count }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, address: &str) -> Option<&OperationResult> {
        self.results.iter().find(|r| r.address == address)
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(index: usize, outcome: Outcome) -> OperationResult {
        OperationResult { index, address: format!("10.0.0.{index}"), outcome, attempts: 1, elapsed_ms: 3 }
    }

    #[test]
    fn test_batch_result_sorts_and_counts() {
        let batch = BatchResult::from_results(vec![
            result(2, Outcome::failure(FailureKind::Timeout, "slow")),
            result(0, Outcome::Success { payload: json!({"ok": true}) }),
            result(1, Outcome::failure(FailureKind::Application, "401: unauthorized")),
        ]);
        assert_eq!(batch.results.iter().map(|r| r.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(batch.succeeded_count, 1);
        assert_eq!(batch.failed_count, 2);
        assert_eq!(batch.failures().count(), 2);
    }

    #[test]
    fn test_result_wire_shape() {
        let r = result(4, Outcome::failure(FailureKind::Connect, "Connection refused"));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "failure");
        assert_eq!(v["kind"], "connect_error");
        assert_eq!(v["detail"], "Connection refused");
        assert_eq!(v["address"], "10.0.0.4");

        let back: OperationResult = serde_json::from_value(v).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_attempt_error_display() {
        let e = AttemptError::timeout("Connection timed out");
        assert_eq!(e.to_string(), "timeout: Connection timed out");
        assert_eq!(Outcome::from(e).label(), "timeout");
    }
}
