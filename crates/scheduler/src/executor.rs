//! Drives one admitted job from `Running` to a terminal state.

use std::sync::Arc;

use tracing::{info, warn};
use transq_core::{EncodeRequest, ExitStatus, JobKind, JobState};

use crate::admission::SlotGuard;
use crate::folder;
use crate::job::{JobHandle, SharedJob};
use crate::scheduler::Shared;

/// How a job's work ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    Succeeded,
    Failed(String),
    Stopped,
}

pub(crate) async fn execute(shared: Arc<Shared>, job: SharedJob, slot: SlotGuard) {
    match job.spec().kind {
        JobKind::Standard => encode(&shared, &job, slot).await,
        JobKind::Folder => folder::expand(&shared, &job, slot).await,
        JobKind::WatchFolder => folder::watch(&shared, &job, slot).await,
    }
}

/// Enter `Running`. Gives the slot back and retires the job if a stop got there first.
pub(crate) fn start(shared: &Shared, job: &JobHandle, slot: SlotGuard) -> Option<SlotGuard> {
    match job.transition(JobState::Running) {
        Ok(_) => {
            info!(job_id = %job.id(), kind = job.spec().kind.as_str(), codec = %job.spec().codec, "job started");
            job.notify(|o, id| o.on_start(id));
            Some(slot)
        }
        Err(_) => {
            slot.release();
            shared.retire(job);
            None
        }
    }
}

async fn encode(shared: &Shared, job: &JobHandle, slot: SlotGuard) {
    let Some(slot) = start(shared, job, slot) else {
        return;
    };

    let request = EncodeRequest {
        job_id: job.id(),
        spec: job.spec().clone(),
        progress: job.progress_reporter(),
    };
    let runner = Arc::clone(&shared.runner);
    let cancel = job.cancel_token().clone();
    let gate = job.gate().clone();
    let mut task = tokio::spawn(async move { runner.run(&request, cancel, gate).await });

    let joined = tokio::select! {
        joined = &mut task => Some(joined),
        _ = job.cancel_token().cancelled() => {
            if tokio::time::timeout(shared.config.stop_grace, &mut task).await.is_err() {
                warn!(job_id = %job.id(), "encoder ignored cancellation, aborting");
                task.abort();
            }
            None
        }
    };

    let outcome = match joined {
        _ if job.cancel_token().is_cancelled() => Outcome::Stopped,
        None => Outcome::Stopped,
        Some(Ok(Ok(ExitStatus::Success))) => Outcome::Succeeded,
        Some(Ok(Ok(ExitStatus::Failed { reason, .. }))) => Outcome::Failed(reason),
        Some(Ok(Ok(ExitStatus::Terminated))) => {
            Outcome::Failed("encoder terminated unexpectedly".to_string())
        }
        Some(Ok(Err(e))) => Outcome::Failed(e.to_string()),
        Some(Err(e)) if e.is_panic() => Outcome::Failed("encoder runner panicked".to_string()),
        Some(Err(e)) => Outcome::Failed(e.to_string()),
    };
    finish(shared, job, slot, outcome).await;
}

/// Settle the job's final state and give its slot back before notifying.
pub(crate) async fn finish(shared: &Shared, job: &JobHandle, slot: SlotGuard, outcome: Outcome) {
    let id = job.id();
    match outcome {
        Outcome::Succeeded => loop {
            // Success observed while paused is held until the job is resumed.
            tokio::select! {
                _ = job.gate().wait_open() => {}
                _ = job.cancel_token().cancelled() => {}
            }
            match job.transition(JobState::Finished) {
                Ok(_) => {
                    slot.release();
                    info!(job_id = %id, "job finished");
                    job.notify(|o, id| o.on_finish(id));
                    return;
                }
                // Paused always closes the gate, so the next wait blocks until resume.
                Err(_) if job.state() == JobState::Paused => continue,
                Err(_) => {
                    slot.release();
                    shared.retire(job);
                    return;
                }
            }
        },
        Outcome::Failed(reason) => {
            job.set_failure(reason.clone());
            if job.transition(JobState::Failed).is_ok() {
                slot.release();
                warn!(job_id = %id, %reason, "job failed");
                job.notify(|o, id| o.on_fail(id, &reason));
            } else {
                slot.release();
                shared.retire(job);
            }
        }
        Outcome::Stopped => {
            slot.release();
            shared.retire(job);
        }
    }
}
