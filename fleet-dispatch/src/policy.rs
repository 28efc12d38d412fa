//! Dispatch policy: the process-wide knobs every batch snapshots at start.

use crate::outcome::FailureKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MAX_CONNECTION_TIMEOUT_SECS: f64 = 60.0;
pub const MAX_CONNECTION_RETRIES: u32 = 10;
pub const DEFAULT_STREAMING_THRESHOLD: usize = 50;

/// Formula used to derive the worker budget from the batch size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerFormula {
    #[default]
    Sqrt,
    Cpu,
    Linear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchPolicy {
    /// Hard ceiling on concurrent targets, whatever the formula
    pub max_workers: usize,
    pub max_workers_formula: WorkerFormula,
    /// Used by the `cpu` formula only
    pub max_workers_per_cpu: usize,
    /// Per-attempt budget, in seconds
    pub connection_timeout: f64,
    /// Additional attempts after a retryable failure
    pub connection_retries: u32,
    /// `true` selects the event-loop executor, `false` the worker threads
    pub use_async_client: bool,
    /// Batches larger than this are always streamed
    pub streaming_threshold: usize,
    /// Failure kinds retried within a batch
    pub retryable_kinds: Vec<FailureKind>,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_workers: 16,
            max_workers_formula: WorkerFormula::Sqrt,
            max_workers_per_cpu: 4,
            connection_timeout: 2.0,
            connection_retries: 1,
            use_async_client: false,
            streaming_threshold: DEFAULT_STREAMING_THRESHOLD,
            retryable_kinds: vec![FailureKind::Connect, FailureKind::Timeout],
        }
    }
}

/// Configuration rejected before any batch starts
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("max_workers must be at least 1")]
    ZeroWorkers,
    #[error("max_workers_per_cpu must be at least 1")]
    ZeroWorkersPerCpu,
    #[error("connection_timeout must be within (0, 60] seconds, got {0}")]
    InvalidTimeout(f64),
    #[error("connection_retries must be at most 10, got {0}")]
    TooManyRetries(u32),
    #[error("streaming_threshold must be at least 1")]
    ZeroStreamingThreshold,
    #[error("cancelled attempts are never retried")]
    RetryOnCancelled,
}

impl DispatchPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_workers == 0 {
            return Err(PolicyError::ZeroWorkers);
        }
        if self.max_workers_per_cpu == 0 {
            return Err(PolicyError::ZeroWorkersPerCpu);
        }
        if !self.connection_timeout.is_finite()
            || self.connection_timeout <= 0.0
            || self.connection_timeout > MAX_CONNECTION_TIMEOUT_SECS
        {
            return Err(PolicyError::InvalidTimeout(self.connection_timeout));
        }
        if self.connection_retries > MAX_CONNECTION_RETRIES {
            return Err(PolicyError::TooManyRetries(self.connection_retries));
        }
        if self.streaming_threshold == 0 {
            return Err(PolicyError::ZeroStreamingThreshold);
        }
        if self.retryable_kinds.contains(&FailureKind::Cancelled) {
            return Err(PolicyError::RetryOnCancelled);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connection_timeout)
    }

    /// Total attempts per target: the first one plus the retries
    pub fn attempts_per_target(&self) -> u32 {
        1 + self.connection_retries
    }

    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        kind != FailureKind::Cancelled && self.retryable_kinds.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        let p = DispatchPolicy::default();
        assert_eq!(p.validate(), Ok(()));
        assert_eq!(p.attempts_per_target(), 2);
        assert_eq!(p.timeout(), Duration::from_secs(2));
        assert!(p.is_retryable(FailureKind::Timeout));
        assert!(p.is_retryable(FailureKind::Connect));
        assert!(!p.is_retryable(FailureKind::Application));
        assert!(!p.is_retryable(FailureKind::Protocol));
    }

    #[test]
    fn test_misconfiguration_is_rejected() {
        let p = DispatchPolicy { max_workers: 0, ..Default::default() };
        assert_eq!(p.validate(), Err(PolicyError::ZeroWorkers));

        let p = DispatchPolicy { connection_timeout: 0.0, ..Default::default() };
        assert_eq!(p.validate(), Err(PolicyError::InvalidTimeout(0.0)));

        let p = DispatchPolicy { connection_timeout: f64::NAN, ..Default::default() };
        assert!(matches!(p.validate(), Err(PolicyError::InvalidTimeout(_))));

        let p = DispatchPolicy { connection_retries: 11, ..Default::default() };
        assert_eq!(p.validate(), Err(PolicyError::TooManyRetries(11)));

        let p = DispatchPolicy { retryable_kinds: vec![FailureKind::Cancelled], ..Default::default() };
        assert_eq!(p.validate(), Err(PolicyError::RetryOnCancelled));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let p: DispatchPolicy = serde_json::from_str(r#"{"max_workers": 32, "max_workers_formula": "cpu"}"#).unwrap();
        assert_eq!(p.max_workers, 32);
        assert_eq!(p.max_workers_formula, WorkerFormula::Cpu);
        assert_eq!(p.connection_retries, 1);
        assert_eq!(p.streaming_threshold, 50);
    }
}
