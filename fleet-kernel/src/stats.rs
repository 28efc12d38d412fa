/*!
STATS - Compteurs de dispatch et santé du processus

RÔLE : Compteurs en mémoire (connexions actives, requêtes, timeouts,
erreurs, lots) servis par `GET /system/health`. Aucun export externe.
FONCTIONNEMENT : `Instrumented` enveloppe une opération et compte chaque
tentative, quel que soit l'exécuteur qui la lance.
*/

use async_trait::async_trait;
use fleet_dispatch::{AttemptError, FailureKind, Target, TargetOperation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub memory_usage_mb: f32,
    pub roster_size: usize,
    pub reachability_tracked: usize,
    pub active_batches: usize,
    pub batches_total: u64,
    pub connections_active: u64,
    pub requests_total: u64,
    pub timeouts_total: u64,
    pub errors_total: u64,
}

#[derive(Debug, Default)]
struct Counters {
    connections_active: AtomicU64,
    requests_total: AtomicU64,
    timeouts_total: AtomicU64,
    errors_total: AtomicU64,
    batches_total: AtomicU64,
}

#[derive(Clone)]
pub struct DispatchStats {
    start_time: Instant,
    counters: Arc<Counters>,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self { start_time: Instant::now(), counters: Arc::new(Counters::default()) }
    }

    pub fn batch_started(&self) {
        self.counters.batches_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn instrument(&self, inner: Arc<dyn TargetOperation>) -> Arc<dyn TargetOperation> {
        Arc::new(Instrumented { inner, counters: self.counters.clone() })
    }

    pub fn get_health(&self, roster_size: usize, reachability_tracked: usize, active_batches: usize) -> KernelHealth {
        let c = &self.counters;
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            memory_usage_mb: get_memory_usage_mb(),
            roster_size,
            reachability_tracked,
            active_batches,
            batches_total: c.batches_total.load(Ordering::Relaxed),
            connections_active: c.connections_active.load(Ordering::Relaxed),
            requests_total: c.requests_total.load(Ordering::Relaxed),
            timeouts_total: c.timeouts_total.load(Ordering::Relaxed),
            errors_total: c.errors_total.load(Ordering::Relaxed),
        }
    }
}

impl Default for DispatchStats {
    fn default() -> Self {
        Self::new()
    }
}

struct Instrumented {
    inner: Arc<dyn TargetOperation>,
    counters: Arc<Counters>,
}

/// Rend la connexion active même si la tentative est abandonnée en vol
struct ActiveGuard<'a>(&'a AtomicU64);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl TargetOperation for Instrumented {
    fn kind(&self) -> &str {
        self.inner.kind()
    }

    async fn execute(&self, target: &Target, budget: Duration) -> Result<Value, AttemptError> {
        let c = &self.counters;
        c.requests_total.fetch_add(1, Ordering::Relaxed);
        c.connections_active.fetch_add(1, Ordering::Relaxed);
        let _active = ActiveGuard(&c.connections_active);

        let result = self.inner.execute(target, budget).await;
        if let Err(e) = &result {
            match e.kind {
                FailureKind::Timeout => c.timeouts_total.fetch_add(1, Ordering::Relaxed),
                _ => c.errors_total.fetch_add(1, Ordering::Relaxed),
            };
        }
        result
    }

    // le délai moteur abandonne `execute` avant qu'il ne rende quoi que ce soit
    fn attempt_timed_out(&self, target: &Target) {
        self.counters.timeouts_total.fetch_add(1, Ordering::Relaxed);
        self.inner.attempt_timed_out(target);
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = kb {
                return kb as f32 / 1024.0; // KB -> MB
            }
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_dispatch::{CancellationToken, Credentials, DispatchPolicy, Dispatcher};

    struct Fixed(Result<Value, AttemptError>);

    #[async_trait]
    impl TargetOperation for Fixed {
        fn kind(&self) -> &str {
            "fixed"
        }

        async fn execute(&self, _: &Target, _: Duration) -> Result<Value, AttemptError> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_counts_attempts_by_outcome() {
        let stats = DispatchStats::new();
        let t = Target::new("10.0.0.1", 8080, Credentials::default());
        let ok = stats.instrument(Arc::new(Fixed(Ok(Value::Null))));
        let slow = stats.instrument(Arc::new(Fixed(Err(AttemptError::timeout("late")))));
        let bad = stats.instrument(Arc::new(Fixed(Err(AttemptError::application("401: denied")))));

        ok.execute(&t, Duration::from_secs(1)).await.unwrap();
        slow.execute(&t, Duration::from_secs(1)).await.unwrap_err();
        slow.execute(&t, Duration::from_secs(1)).await.unwrap_err();
        bad.execute(&t, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(ok.kind(), "fixed");

        let h = stats.get_health(3, 2, 0);
        assert_eq!(h.requests_total, 4);
        assert_eq!(h.timeouts_total, 2);
        assert_eq!(h.errors_total, 1);
        assert_eq!(h.connections_active, 0);
        assert_eq!(h.roster_size, 3);
    }

    struct Hang;

    #[async_trait]
    impl TargetOperation for Hang {
        fn kind(&self) -> &str {
            "hang"
        }

        async fn execute(&self, _: &Target, budget: Duration) -> Result<Value, AttemptError> {
            tokio::time::sleep(budget * 20).await;
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_engine_enforced_timeouts_are_counted() {
        let stats = DispatchStats::new();
        let policy = DispatchPolicy { connection_timeout: 0.1, connection_retries: 1, ..DispatchPolicy::default() };
        let targets = vec![Target::new("10.0.0.1", 8080, Credentials::default())];
        let op = stats.instrument(Arc::new(Hang));

        let batch = Dispatcher::new(policy)
            .unwrap()
            .run_blocking(&targets, op.as_ref(), &CancellationToken::new(), None)
            .unwrap();
        assert_eq!(batch.results[0].outcome.failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(batch.results[0].attempts, 2);

        let h = stats.get_health(1, 0, 0);
        assert_eq!(h.requests_total, 2);
        assert_eq!(h.timeouts_total, 2);
        assert_eq!(h.errors_total, 0);
        assert_eq!(h.connections_active, 0);
    }
}
