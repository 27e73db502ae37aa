//! Batch orchestrator for extraction jobs.
//!
//! The orchestrator drains a FIFO queue of jobs into runners:
//! - **Scheduling**: a single loop owns the queue and the concurrency controller
//! - **Execution**: one task per job, reporting back over a channel
//! - **Recovery**: state is persisted after every mutation and rehydrated at start

mod config;
mod handle;
mod runner;
mod service;
mod types;

pub use config::BatchConfig;
pub use handle::OrchestratorHandle;
pub use service::{create_orchestrator, Orchestrator};
pub use types::{
    ConcurrencySnapshot, EnqueueItem, EnqueueOutcome, EnqueueRequest, JobError,
    OrchestratorError, OrchestratorStatus,
};
