use super::BatchJob;
use crate::engine::DispatchError;
use crate::outcome::OperationResult;
use crate::retry::run_target;
use futures::stream::{self, StreamExt};
use tokio::runtime::Builder;

/// Single-threaded cooperative scheduler keeping up to `limit` targets in
/// flight; admission follows input order, completions come back as they land.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventLoopExecutor;

impl EventLoopExecutor {
    pub fn run(&self, job: &BatchJob<'_>) -> Result<Vec<OperationResult>, DispatchError> {
        if job.targets.is_empty() {
            return Ok(Vec::new());
        }
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(DispatchError::Runtime)?;

        let results = runtime.block_on(
            stream::iter(job.targets.iter().enumerate())
                .map(|(index, target)| run_target(job.operation, index, target, job.plan, job.cancel))
                .buffer_unordered(job.limit.max(1))
                .inspect(|result| job.report(result))
                .collect::<Vec<_>>(),
        );
        Ok(results)
    }
}
