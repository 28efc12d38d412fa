use super::BatchJob;
use crate::engine::DispatchError;
use crate::outcome::OperationResult;
use crate::retry::run_target;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

/// Fixed pool of `limit` OS threads, each pulling the next target in input
/// order and blocking on it until it completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadedExecutor;

impl ThreadedExecutor {
    pub fn run(&self, job: &BatchJob<'_>) -> Result<Vec<OperationResult>, DispatchError> {
        let total = job.targets.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let workers = job.limit.clamp(1, total);

        // Every worker drives its blocking calls through its own single-thread
        // clock/IO driver; built up front so a failure rejects the batch
        // before any target is touched.
        let runtimes = (0..workers)
            .map(|_| Builder::new_current_thread().enable_all().build())
            .collect::<Result<Vec<Runtime>, _>>()
            .map_err(DispatchError::Runtime)?;

        let next = AtomicUsize::new(0);
        let collected = Mutex::new(Vec::with_capacity(total));

        thread::scope(|scope| {
            for (worker, runtime) in runtimes.into_iter().enumerate() {
                let next = &next;
                let collected = &collected;
                scope.spawn(move || {
                    let mut done = 0usize;
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(target) = job.targets.get(index) else { break };
                        let result = runtime.block_on(run_target(job.operation, index, target, job.plan, job.cancel));
                        job.report(&result);
                        collected.lock().push(result);
                        done += 1;
                    }
                    debug!(worker, done, "dispatch worker drained");
                });
            }
        });

        Ok(collected.into_inner())
    }
}
