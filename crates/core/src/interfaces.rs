//! Collaborators the scheduler consumes but does not implement.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::gate::PauseGate;
use crate::policy::ConcurrencyPolicy;
use crate::types::{JobId, JobSpec};

/// How an encoder process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failed { code: Option<i32>, reason: String },
    /// The process was killed because the cancellation handle fired.
    Terminated,
}

impl ExitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn encoder: {0}")]
    Spawn(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no hardware encoder available")]
    NoHardwareEncoder,
    #[error("capability probe failed: {0}")]
    Failed(String),
}

/// Encoder progress as reported by the running process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub frame: u64,
    pub fps: f64,
    pub out_time_secs: f64,
    pub speed: Option<f64>,
    pub percent: Option<f64>,
}

/// Per-job lifecycle callbacks, implemented by the embedding UI.
///
/// Calls arrive on scheduler-owned tasks. Implementations that drive a
/// single-threaded UI must marshal onto their own thread.
pub trait JobObserver: Send + Sync {
    fn on_queued(&self, _job: &JobId) {}
    fn on_start(&self, job: &JobId);
    fn on_pause(&self, job: &JobId);
    fn on_resume(&self, job: &JobId);
    fn on_finish(&self, job: &JobId);
    fn on_fail(&self, job: &JobId, reason: &str);
    fn on_remove(&self, job: &JobId);
    fn on_progress(&self, _job: &JobId, _progress: &Progress) {}
}

/// Observer that ignores every callback.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl JobObserver for NoopObserver {
    fn on_start(&self, _job: &JobId) {}
    fn on_pause(&self, _job: &JobId) {}
    fn on_resume(&self, _job: &JobId) {}
    fn on_finish(&self, _job: &JobId) {}
    fn on_fail(&self, _job: &JobId, _reason: &str) {}
    fn on_remove(&self, _job: &JobId) {}
}

/// A weak reference that observes nothing.
pub fn detached_observer() -> Weak<dyn JobObserver> {
    Weak::<NoopObserver>::new()
}

/// Forwards progress from a runner to the job's observer, if it is still alive.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    observer: Weak<dyn JobObserver>,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, observer: Weak<dyn JobObserver>) -> Self {
        Self { job_id, observer }
    }

    pub fn report(&self, progress: &Progress) {
        if let Some(observer) = self.observer.upgrade() {
            observer.on_progress(&self.job_id, progress);
        }
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

/// One encode handed to an [`EncoderProcessRunner`].
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub job_id: JobId,
    pub spec: JobSpec,
    pub progress: ProgressReporter,
}

/// Spawns and supervises the external encoder for one job.
///
/// Implementations must terminate promptly once `cancel` fires and must not
/// make forward progress while `gate` is closed.
#[async_trait::async_trait]
pub trait EncoderProcessRunner: Send + Sync {
    async fn run(
        &self,
        request: &EncodeRequest,
        cancel: CancellationToken,
        gate: PauseGate,
    ) -> Result<ExitStatus, RunnerError>;
}

/// Reports how many hardware encode sessions the device supports.
#[async_trait::async_trait]
pub trait HardwareCapabilityProbe: Send + Sync {
    async fn max_concurrent_sessions(&self) -> Result<usize, ProbeError>;
}

/// Probe for hosts configured without hardware encoding.
#[derive(Debug, Default)]
pub struct NoHardware;

#[async_trait::async_trait]
impl HardwareCapabilityProbe for NoHardware {
    async fn max_concurrent_sessions(&self) -> Result<usize, ProbeError> {
        Err(ProbeError::NoHardwareEncoder)
    }
}

/// Supplies the current concurrency policy snapshot.
pub trait PreferencesSource: Send + Sync {
    fn concurrency_policy(&self) -> ConcurrencyPolicy;
}

impl PreferencesSource for ConcurrencyPolicy {
    fn concurrency_policy(&self) -> ConcurrencyPolicy {
        self.clone()
    }
}

impl<T: PreferencesSource + ?Sized> PreferencesSource for Arc<T> {
    fn concurrency_policy(&self) -> ConcurrencyPolicy {
        (**self).concurrency_policy()
    }
}
