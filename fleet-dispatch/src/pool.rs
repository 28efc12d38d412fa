//! Worker budget sizing.
//!
//! Small batches should not pay for workers they cannot use, large ones must
//! not open thousands of simultaneous connections. `max_workers` caps every
//! formula.

use crate::policy::{DispatchPolicy, WorkerFormula};
use std::thread;

/// Number of logical CPUs on this host, 1 when it cannot be determined.
pub fn cpu_count() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Worker limit for a batch of `target_count` targets on this host.
pub fn worker_limit(target_count: usize, policy: &DispatchPolicy) -> usize {
    worker_limit_for(target_count, policy, cpu_count())
}

/// Pure form of [`worker_limit`], with the CPU count supplied by the caller.
///
/// Always within `1..=max(target_count, 1)` and never above `max_workers`.
pub fn worker_limit_for(target_count: usize, policy: &DispatchPolicy, cpus: usize) -> usize {
    let ceiling = policy.max_workers.max(1);
    let wanted = match policy.max_workers_formula {
        WorkerFormula::Sqrt => ceil_sqrt(target_count),
        WorkerFormula::Cpu => cpus.max(1).saturating_mul(policy.max_workers_per_cpu),
        WorkerFormula::Linear => target_count,
    };
    wanted.clamp(1, ceiling).min(target_count.max(1))
}

fn ceil_sqrt(n: usize) -> usize {
    if n < 2 {
        return n;
    }
    let mut root = (n as f64).sqrt() as usize;
    // float rounding on large inputs
    while root * root > n {
        root -= 1;
    }
    while root * root < n {
        root += 1;
    }
    root
}
