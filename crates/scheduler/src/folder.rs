//! Folder drivers: one-shot expansion and continuous watching.
//!
//! Both enqueue one standard child job per discovered file. Children go
//! through the intake like any other submission and are not stopped when
//! their driver is.

use std::path::PathBuf;

use tracing::{debug, info, warn};
use transq_core::JobId;
use transq_scanner::{DiscoveryTracker, MediaEntry, WalkOptions, walk_media_dir};

use crate::SchedulerError;
use crate::admission::SlotGuard;
use crate::executor::{self, Outcome};
use crate::job::JobHandle;
use crate::scheduler::Shared;

/// Enqueue every eligible file under the folder once, then finish.
pub(crate) async fn expand(shared: &Shared, job: &JobHandle, slot: SlotGuard) {
    let Some(slot) = executor::start(shared, job, slot) else {
        return;
    };
    let spec = job.spec();

    let scan = tokio::select! {
        scan = scan_dir(spec.input.clone(), walk_options(job)) => scan,
        _ = job.cancel_token().cancelled() => {
            return executor::finish(shared, job, slot, Outcome::Stopped).await;
        }
    };

    let outcome = match scan {
        Ok(entries) => {
            info!(job_id = %job.id(), files = entries.len(), "expanding folder");
            match enqueue_children(shared, job, entries.iter().map(|e| e.path.clone())) {
                Ok(_) if job.cancel_token().is_cancelled() => Outcome::Stopped,
                Ok(_) => Outcome::Succeeded,
                Err(e) => Outcome::Failed(e.to_string()),
            }
        }
        Err(e) => Outcome::Failed(format!("cannot read {}: {e}", spec.input.display())),
    };
    executor::finish(shared, job, slot, outcome).await;
}

/// Poll the folder until stopped, enqueueing each file once it is stable.
pub(crate) async fn watch(shared: &Shared, job: &JobHandle, slot: SlotGuard) {
    let Some(slot) = executor::start(shared, job, slot) else {
        return;
    };
    let spec = job.spec();
    let cancel = job.cancel_token();
    let options = walk_options(job);
    let mut tracker = DiscoveryTracker::new();
    info!(job_id = %job.id(), dir = %spec.input.display(), "watching folder");

    loop {
        tokio::select! {
            _ = job.gate().wait_open() => {}
            _ = cancel.cancelled() => break,
        }

        match scan_dir(spec.input.clone(), options.clone()).await {
            Ok(entries) => {
                let ready = tracker.observe(&entries);
                if let Err(e) = enqueue_children(shared, job, ready.into_iter()) {
                    warn!(job_id = %job.id(), error = %e, "intake closed, watch folder stopping");
                    break;
                }
            }
            // The folder may be temporarily unmounted; keep polling.
            Err(e) => warn!(job_id = %job.id(), dir = %spec.input.display(), error = %e, "watch folder scan failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(shared.config.watch_poll_interval) => {}
            _ = cancel.cancelled() => break,
        }
    }

    info!(
        job_id = %job.id(),
        dispatched = tracker.dispatched_count(),
        "watch folder stopped"
    );
    // A watch only ends by being stopped.
    executor::finish(shared, job, slot, Outcome::Stopped).await;
}

fn walk_options(job: &JobHandle) -> WalkOptions {
    let spec = job.spec();
    WalkOptions {
        recursive: spec.recursive,
        exclude: Some(spec.output.clone()),
    }
}

async fn scan_dir(root: PathBuf, options: WalkOptions) -> std::io::Result<Vec<MediaEntry>> {
    tokio::task::spawn_blocking(move || walk_media_dir(&root, &options))
        .await
        .map_err(std::io::Error::other)?
}

fn enqueue_children(
    shared: &Shared,
    job: &JobHandle,
    files: impl Iterator<Item = PathBuf>,
) -> Result<Vec<JobId>, SchedulerError> {
    let mut children = Vec::new();
    for file in files {
        if job.cancel_token().is_cancelled() {
            break;
        }
        let child = shared.submit(job.spec().child_for(job.id(), &file), job.observer())?;
        debug!(job_id = %job.id(), child_id = %child, file = %file.display(), "child job queued");
        children.push(child);
    }
    Ok(children)
}
