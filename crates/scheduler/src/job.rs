use std::path::PathBuf;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use transq_core::{
    CodecFamily, JobId, JobKind, JobObserver, JobOrigin, JobSpec, JobState, PauseGate,
    ProgressReporter,
};

use crate::SchedulerError;

/// Shared record of one submitted job.
///
/// The spec is fixed at submission; state, cancellation and the pause gate
/// are the mutable parts driven by the scheduler.
pub struct JobHandle {
    id: JobId,
    seq: u64,
    spec: JobSpec,
    submitted_at: DateTime<Utc>,
    state: watch::Sender<JobState>,
    cancel: CancellationToken,
    gate: PauseGate,
    observer: Weak<dyn JobObserver>,
    failure: Mutex<Option<String>>,
}

/// Point-in-time view of a job, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub codec: CodecFamily,
    pub input: PathBuf,
    pub output: PathBuf,
    pub origin: JobOrigin,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub failure: Option<String>,
}

impl JobHandle {
    pub(crate) fn new(seq: u64, spec: JobSpec, observer: Weak<dyn JobObserver>) -> Self {
        let (state, _) = watch::channel(JobState::Queued);
        Self {
            id: JobId::new(),
            seq,
            spec,
            submitted_at: Utc::now(),
            state,
            cancel: CancellationToken::new(),
            gate: PauseGate::new(),
            observer,
            failure: Mutex::new(None),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn gate(&self) -> &PauseGate {
        &self.gate
    }

    pub(crate) fn observer(&self) -> Weak<dyn JobObserver> {
        self.observer.clone()
    }

    pub(crate) fn progress_reporter(&self) -> ProgressReporter {
        ProgressReporter::new(self.id, self.observer.clone())
    }

    pub(crate) fn set_failure(&self, reason: impl Into<String>) {
        *self.failure.lock() = Some(reason.into());
    }

    /// Move to `next` along a lifecycle edge.
    ///
    /// `Ok(true)` when the state changed, `Ok(false)` when re-entering the
    /// terminal state the job is already in.
    pub(crate) fn transition(&self, next: JobState) -> Result<bool, SchedulerError> {
        let mut outcome = Ok(false);
        self.state.send_if_modified(|current| {
            if !current.can_transition_to(next) {
                outcome = Err(SchedulerError::InvalidTransition {
                    job: self.id,
                    from: *current,
                    to: next,
                });
                return false;
            }
            if *current == next {
                return false;
            }
            debug!(job_id = %self.id, from = %current, to = %next, "job state change");
            *current = next;
            outcome = Ok(true);
            true
        });
        outcome
    }

    /// Move between `Running` and `Paused`, flipping the pause gate under the
    /// same state lock so the two never disagree.
    ///
    /// `Ok(false)` when the job is already in the requested state.
    pub(crate) fn set_paused(&self, paused: bool) -> Result<bool, SchedulerError> {
        let (from, to) = if paused {
            (JobState::Running, JobState::Paused)
        } else {
            (JobState::Paused, JobState::Running)
        };
        let mut outcome = Ok(false);
        self.state.send_if_modified(|current| {
            if *current == to {
                return false;
            }
            if *current != from {
                outcome = Err(SchedulerError::InvalidTransition {
                    job: self.id,
                    from: *current,
                    to,
                });
                return false;
            }
            debug!(job_id = %self.id, from = %current, to = %to, "job state change");
            *current = to;
            if paused {
                self.gate.close();
            } else {
                self.gate.open();
            }
            outcome = Ok(true);
            true
        });
        outcome
    }

    /// Enter `Stopping` if the job is still live. Returns the state seen before.
    pub(crate) fn begin_stop(&self) -> JobState {
        let mut previous = JobState::Removed;
        self.state.send_if_modified(|current| {
            previous = *current;
            if current.can_transition_to(JobState::Stopping) {
                debug!(job_id = %self.id, from = %current, "job stopping");
                *current = JobState::Stopping;
                true
            } else {
                false
            }
        });
        previous
    }

    /// Run `f` against the observer if the UI still holds it.
    pub(crate) fn notify(&self, f: impl FnOnce(&dyn JobObserver, &JobId)) {
        if let Some(observer) = self.observer.upgrade() {
            f(observer.as_ref(), &self.id);
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            kind: self.spec.kind,
            codec: self.spec.codec,
            input: self.spec.input.clone(),
            output: self.spec.output.clone(),
            origin: self.spec.origin,
            state: self.state(),
            submitted_at: self.submitted_at,
            failure: self.failure.lock().clone(),
        }
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("kind", &self.spec.kind)
            .field("codec", &self.spec.codec)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

pub type SharedJob = Arc<JobHandle>;
