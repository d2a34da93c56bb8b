//! STRATA Runtime
//!
//! Drives a view DAG to completion: table reference mapping, a bounded
//! worker pool, per-job bookkeeping and the run controller with its
//! skip-cascade, fail-fast and resumable-cache policies.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod executor;
pub mod mapping;
pub mod monitor;

pub use engine::{ExecutionEngine, RunConfig, RunError};
pub use executor::{Completion, Executor, JobKind, JobOutcome};
pub use mapping::make_table_reference_mapping;
pub use monitor::{Job, JobStatus, Monitor, NullObserver, ProgressRow, RunObserver, RunReport};
