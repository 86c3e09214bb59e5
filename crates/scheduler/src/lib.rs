//! Concurrent job scheduler: intake queue, admission control, per-job
//! execution and the folder drivers that feed the queue.

pub mod admission;
pub mod config;
mod dispatcher;
mod executor;
mod folder;
mod intake;
pub mod job;
pub mod preferences;
pub mod scheduler;

use thiserror::Error;
use transq_core::{JobId, JobState};

pub use admission::{AdmissionController, RunningSnapshot, SlotGuard};
pub use config::SchedulerConfig;
pub use job::{JobHandle, JobSnapshot};
pub use preferences::SharedPreferences;
pub use scheduler::Scheduler;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("intake is shutting down, submission rejected")]
    SubmissionRejected,
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    #[error("invalid job: {0}")]
    InvalidJob(String),
    #[error("job {job} cannot move from {from} to {to}")]
    InvalidTransition {
        job: JobId,
        from: JobState,
        to: JobState,
    },
}
