//! Single consumer of the intake queue.
//!
//! Jobs are handed to admission strictly in submission order: the job at
//! the head waits for its slot before the next one is looked at.

use std::sync::Arc;

use tracing::{debug, info};
use transq_core::JobState;

use crate::executor;
use crate::scheduler::Shared;

pub(crate) async fn run(shared: Arc<Shared>) {
    info!("intake dispatcher started");

    while let Some(job) = shared.intake.pop().await {
        let id = job.id();
        let slot = tokio::select! {
            slot = shared.admission.await_slot(id, job.spec()) => Some(slot),
            _ = job.cancel_token().cancelled() => None,
            _ = shared.shutdown.cancelled() => None,
        };

        let Some(slot) = slot else {
            debug!(job_id = %id, "job stopped while waiting for a slot");
            job.begin_stop();
            shared.retire(&job);
            continue;
        };

        if let Err(e) = job.transition(JobState::Admitted) {
            debug!(job_id = %id, error = %e, "job stopped before admission");
            slot.release();
            shared.retire(&job);
            continue;
        }
        debug!(job_id = %id, "job admitted");
        shared
            .tasks
            .spawn(executor::execute(Arc::clone(&shared), job, slot));
    }

    info!("intake dispatcher stopped");
}
