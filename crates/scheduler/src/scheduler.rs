use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use transq_core::{
    EncoderProcessRunner, HardwareCapabilityProbe, JobId, JobObserver, JobSpec, JobState,
    PreferencesSource,
};

use crate::admission::{AdmissionController, RunningSnapshot};
use crate::config::SchedulerConfig;
use crate::dispatcher;
use crate::intake::IntakeQueue;
use crate::job::{JobHandle, JobSnapshot, SharedJob};
use crate::SchedulerError;

/// Removed ids remembered so a late stop is a no-op instead of `JobNotFound`.
const REMOVED_HISTORY: usize = 4096;

#[derive(Debug)]
struct Registry {
    live: HashMap<JobId, SharedJob>,
    removed: HashSet<JobId>,
    /// Removal order, oldest first. Bounds `removed` to `removed_cap`.
    removed_order: VecDeque<JobId>,
    removed_cap: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_history(REMOVED_HISTORY)
    }
}

impl Registry {
    fn with_history(removed_cap: usize) -> Self {
        Self {
            live: HashMap::new(),
            removed: HashSet::new(),
            removed_order: VecDeque::new(),
            removed_cap,
        }
    }

    fn forget(&mut self, id: JobId) {
        self.live.remove(&id);
        if self.removed.insert(id) {
            self.removed_order.push_back(id);
        }
        while self.removed_order.len() > self.removed_cap {
            if let Some(oldest) = self.removed_order.pop_front() {
                self.removed.remove(&oldest);
            }
        }
    }
}

/// State shared by the facade, the dispatcher and every executor task.
pub(crate) struct Shared {
    pub(crate) config: SchedulerConfig,
    pub(crate) runner: Arc<dyn EncoderProcessRunner>,
    pub(crate) admission: Arc<AdmissionController>,
    pub(crate) intake: IntakeQueue,
    pub(crate) tasks: TaskTracker,
    pub(crate) shutdown: CancellationToken,
    registry: Mutex<Registry>,
    next_seq: AtomicU64,
}

impl Shared {
    pub(crate) fn submit(
        &self,
        spec: JobSpec,
        observer: Weak<dyn JobObserver>,
    ) -> Result<JobId, SchedulerError> {
        spec.validate()
            .map_err(|e| SchedulerError::InvalidJob(e.to_string()))?;
        if self.intake.is_closed() {
            return Err(SchedulerError::SubmissionRejected);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let job = Arc::new(JobHandle::new(seq, spec, observer));
        let id = job.id();
        self.registry.lock().live.insert(id, Arc::clone(&job));

        info!(
            job_id = %id,
            kind = job.spec().kind.as_str(),
            codec = %job.spec().codec,
            input = %job.spec().input.display(),
            "job queued"
        );
        job.notify(|o, id| o.on_queued(id));

        if let Err(e) = self.intake.submit(Arc::clone(&job)) {
            // Closed between the check and the push.
            job.begin_stop();
            self.retire(&job);
            return Err(e);
        }
        Ok(id)
    }

    pub(crate) fn job(&self, id: JobId) -> Option<SharedJob> {
        self.registry.lock().live.get(&id).cloned()
    }

    fn lookup(&self, id: JobId) -> Result<Option<SharedJob>, SchedulerError> {
        let registry = self.registry.lock();
        match registry.live.get(&id) {
            Some(job) => Ok(Some(Arc::clone(job))),
            None if registry.removed.contains(&id) => Ok(None),
            None => Err(SchedulerError::JobNotFound(id)),
        }
    }

    /// Move a stopping or terminal job to `Removed` and forget it.
    ///
    /// Only the call that performs the transition notifies the observer.
    pub(crate) fn retire(&self, job: &JobHandle) -> bool {
        match job.transition(JobState::Removed) {
            Ok(true) => {
                let id = job.id();
                self.registry.lock().forget(id);
                info!(job_id = %id, "job removed");
                job.notify(|o, id| o.on_remove(id));
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(job_id = %job.id(), error = %e, "cannot remove job");
                false
            }
        }
    }

    fn sorted_jobs(&self) -> Vec<SharedJob> {
        let mut jobs: Vec<_> = self.registry.lock().live.values().cloned().collect();
        jobs.sort_by_key(|job| job.seq());
        jobs
    }
}

/// Entry point for submitting and controlling transcoding jobs.
///
/// Owns the intake queue, the admission controller and the dispatcher
/// task. Must be created inside a tokio runtime.
pub struct Scheduler {
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Start the scheduler.
    ///
    /// The hardware probe is queried once; when it fails, hardware encodes
    /// are limited to a single session.
    pub async fn start(
        config: SchedulerConfig,
        runner: Arc<dyn EncoderProcessRunner>,
        probe: &dyn HardwareCapabilityProbe,
        prefs: Arc<dyn PreferencesSource>,
    ) -> Self {
        let hardware_sessions = match probe.max_concurrent_sessions().await {
            Ok(sessions) => {
                info!(sessions, "hardware encoder sessions probed");
                sessions
            }
            Err(e) => {
                warn!(error = %e, "hardware probe unavailable, allowing one hardware session");
                1
            }
        };

        let shared = Arc::new(Shared {
            config,
            runner,
            admission: Arc::new(AdmissionController::new(prefs, hardware_sessions)),
            intake: IntakeQueue::new(),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            registry: Mutex::new(Registry::default()),
            next_seq: AtomicU64::new(0),
        });
        let dispatcher = tokio::spawn(dispatcher::run(Arc::clone(&shared)));
        info!("scheduler started");

        Self {
            shared,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Queue a job. The observer is held weakly and may go away at any time.
    pub fn submit(
        &self,
        spec: JobSpec,
        observer: Weak<dyn JobObserver>,
    ) -> Result<JobId, SchedulerError> {
        self.shared.submit(spec, observer)
    }

    pub fn request_pause(&self, id: JobId) -> Result<(), SchedulerError> {
        let job = self
            .shared
            .job(id)
            .ok_or(SchedulerError::JobNotFound(id))?;
        if !job.set_paused(true)? {
            return Ok(());
        }
        info!(job_id = %id, "job paused");
        job.notify(|o, id| o.on_pause(id));
        Ok(())
    }

    pub fn request_resume(&self, id: JobId) -> Result<(), SchedulerError> {
        let job = self
            .shared
            .job(id)
            .ok_or(SchedulerError::JobNotFound(id))?;
        if !job.set_paused(false)? {
            return Ok(());
        }
        info!(job_id = %id, "job resumed");
        job.notify(|o, id| o.on_resume(id));
        Ok(())
    }

    /// Stop a job and wait, bounded by the stop grace, until it is removed.
    ///
    /// Stopping a job that is already stopping or removed is a no-op.
    pub async fn request_stop(&self, id: JobId) -> Result<(), SchedulerError> {
        let Some(job) = self.shared.lookup(id)? else {
            return Ok(());
        };

        match job.begin_stop() {
            JobState::Removed => return Ok(()),
            JobState::Finished | JobState::Failed => {
                self.shared.retire(&job);
                return Ok(());
            }
            JobState::Queued => {
                info!(job_id = %id, "stopping queued job");
                job.cancel_token().cancel();
                // Still in the queue: nobody else will see it. Otherwise the
                // dispatcher holds it and retires it on cancellation.
                if self.shared.intake.remove(id).is_some() {
                    self.shared.retire(&job);
                }
            }
            JobState::Stopping => {}
            JobState::Admitted | JobState::Running | JobState::Paused => {
                info!(job_id = %id, "stopping job");
                job.cancel_token().cancel();
            }
        }

        let mut state = job.subscribe();
        let removed = tokio::time::timeout(
            self.shared.config.stop_grace,
            state.wait_for(|s| *s == JobState::Removed),
        )
        .await
        .is_ok();
        if !removed {
            warn!(job_id = %id, "job still stopping after grace period");
        }
        Ok(())
    }

    pub fn is_intake_empty(&self) -> bool {
        self.shared.intake.is_empty()
    }

    pub fn intake_len(&self) -> usize {
        self.shared.intake.len()
    }

    /// Remove every job still waiting in the intake queue.
    ///
    /// A job already picked by the dispatcher and waiting for a slot is not
    /// part of the queue and stays.
    pub fn drain_intake(&self) -> Vec<JobId> {
        let drained = self.shared.intake.drain();
        for job in &drained {
            job.begin_stop();
            job.cancel_token().cancel();
            self.shared.retire(job);
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "intake drained");
        }
        drained.iter().map(|job| job.id()).collect()
    }

    pub fn job(&self, id: JobId) -> Option<JobSnapshot> {
        self.shared.job(id).map(|job| job.snapshot())
    }

    /// Live jobs in submission order.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.shared
            .sorted_jobs()
            .iter()
            .map(|job| job.snapshot())
            .collect()
    }

    pub fn subscribe(&self, id: JobId) -> Option<watch::Receiver<JobState>> {
        self.shared.job(id).map(|job| job.subscribe())
    }

    pub fn running(&self) -> RunningSnapshot {
        self.shared.admission.snapshot()
    }

    pub fn hardware_sessions(&self) -> usize {
        self.shared.admission.hardware_sessions()
    }

    /// Re-evaluate waiting jobs against the current preferences.
    pub fn policy_changed(&self) {
        self.shared.admission.policy_changed();
    }

    /// Remove finished and failed jobs from the registry. Returns how many.
    pub fn prune_terminal(&self) -> usize {
        let done: Vec<_> = self
            .shared
            .sorted_jobs()
            .into_iter()
            .filter(|job| matches!(job.state(), JobState::Finished | JobState::Failed))
            .collect();
        done.iter().filter(|job| self.shared.retire(job)).count()
    }

    /// Stop accepting work, stop every job and wait for all tasks to end.
    pub async fn shutdown(&self) {
        info!("scheduler shutting down");
        self.shared.shutdown.cancel();
        for job in self.shared.intake.close() {
            job.begin_stop();
            job.cancel_token().cancel();
            self.shared.retire(&job);
        }

        let active: Vec<JobId> = self
            .shared
            .sorted_jobs()
            .iter()
            .filter(|job| !job.state().is_terminal())
            .map(|job| job.id())
            .collect();
        for result in join_all(active.into_iter().map(|id| self.request_stop(id))).await {
            if let Err(e) = result {
                warn!(error = %e, "stop during shutdown failed");
            }
        }

        self.shared.tasks.close();
        self.shared.tasks.wait().await;
        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatcher task failed");
            }
        }
        info!("scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        self.shared.intake.close();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("admission", &self.shared.admission)
            .field("queued", &self.shared.intake.len())
            .finish_non_exhaustive()
    }
}
