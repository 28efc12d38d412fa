//! Fleet dispatch core
//!
//! Applies one operation to many devices at once:
//! - Worker budget derived from batch size and host CPUs (`pool`)
//! - Per-attempt timeout and immediate retries on connectivity failures (`retry`)
//! - Thread-bound or event-loop execution with identical results (`executor`)
//! - Aggregate or streamed (NDJSON) delivery (`progress`)
//! - Edge-triggered online/offline tracking fed by probe results (`reachability`)

pub mod engine;
pub mod executor;
pub mod operation;
pub mod outcome;
pub mod policy;
pub mod pool;
pub mod progress;
pub mod reachability;
pub mod retry;
pub mod target;

pub use engine::{dispatch, DispatchError, Dispatcher};
pub use executor::Executor;
pub use operation::TargetOperation;
pub use outcome::{AttemptError, BatchResult, FailureKind, OperationResult, Outcome};
pub use policy::{DispatchPolicy, PolicyError, WorkerFormula};
pub use pool::worker_limit;
pub use progress::{DeliveryMode, NdjsonDecoder, ProgressEvent, ProgressReceiver, ProgressSender};
pub use reachability::{Reachability, ReachabilityTable, ReachabilityView, Transition};
pub use target::{Credentials, Target, TargetState};

pub use tokio_util::sync::CancellationToken;
