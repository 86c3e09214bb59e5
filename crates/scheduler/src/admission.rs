//! Admission control: decides when a queued job may take a slot.
//!
//! All slot accounting lives behind one lock. Waiters re-evaluate the
//! policy every time a slot is released or the preferences change.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info};
use transq_core::{CodecFamily, ConcurrencyPolicy, JobId, JobKind, JobSpec, PreferencesSource};

/// What a job counts against while admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotClass {
    Encode(CodecFamily),
    /// Folder drivers only enqueue children, so they count against nothing.
    Driver,
}

impl SlotClass {
    fn of(spec: &JobSpec) -> Self {
        if spec.kind.is_driver() {
            Self::Driver
        } else {
            Self::Encode(spec.codec)
        }
    }
}

/// Counts of admitted jobs by category.
#[derive(Debug, Default)]
pub struct RunningSet {
    by_codec: HashMap<CodecFamily, usize>,
    hardware: usize,
    total: usize,
    drivers: usize,
    admitted: HashMap<JobId, SlotClass>,
    admissions: u64,
    releases: u64,
}

impl RunningSet {
    /// Encodes holding a slot, hardware included.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn hardware(&self) -> usize {
        self.hardware
    }

    pub fn software(&self) -> usize {
        self.total - self.hardware
    }

    pub fn count(&self, codec: CodecFamily) -> usize {
        self.by_codec.get(&codec).copied().unwrap_or(0)
    }

    pub fn contains(&self, job: &JobId) -> bool {
        self.admitted.contains_key(job)
    }

    fn insert(&mut self, job: JobId, class: SlotClass) {
        match class {
            SlotClass::Encode(codec) => {
                *self.by_codec.entry(codec).or_default() += 1;
                if codec.is_hardware() {
                    self.hardware += 1;
                }
                self.total += 1;
            }
            SlotClass::Driver => self.drivers += 1,
        }
        self.admitted.insert(job, class);
        self.admissions += 1;
    }

    fn remove(&mut self, job: &JobId) -> bool {
        let Some(class) = self.admitted.remove(job) else {
            return false;
        };
        match class {
            SlotClass::Encode(codec) => {
                if let Some(n) = self.by_codec.get_mut(&codec) {
                    *n = n.saturating_sub(1);
                    if *n == 0 {
                        self.by_codec.remove(&codec);
                    }
                }
                if codec.is_hardware() {
                    self.hardware = self.hardware.saturating_sub(1);
                }
                self.total = self.total.saturating_sub(1);
            }
            SlotClass::Driver => self.drivers = self.drivers.saturating_sub(1),
        }
        self.releases += 1;
        true
    }

    fn snapshot(&self) -> RunningSnapshot {
        RunningSnapshot {
            total: self.total,
            hardware: self.hardware,
            drivers: self.drivers,
            by_codec: self.by_codec.iter().map(|(c, n)| (*c, *n)).collect(),
            admissions: self.admissions,
            releases: self.releases,
        }
    }
}

/// Serializable view of the running set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunningSnapshot {
    pub total: usize,
    pub hardware: usize,
    pub drivers: usize,
    pub by_codec: BTreeMap<CodecFamily, usize>,
    /// Slots handed out since start.
    pub admissions: u64,
    /// Slots given back since start.
    pub releases: u64,
}

/// Whether `spec` may start given what is already running.
pub fn admits(
    policy: &ConcurrencyPolicy,
    hardware_sessions: usize,
    running: &RunningSet,
    spec: &JobSpec,
) -> bool {
    let watch_exclusive = !policy.watch_folder_concurrent
        && (spec.kind == JobKind::WatchFolder || spec.origin.is_watch_folder());

    if spec.kind.is_driver() {
        return !watch_exclusive || running.total() == 0;
    }

    let exclusive = policy.hardware_exclusive();
    let fits = if spec.codec.is_hardware() {
        running.hardware() < policy.hardware_ceiling(hardware_sessions)
            && (!exclusive || running.software() == 0)
    } else {
        let under_ceiling = match policy.codec_ceiling(spec.codec) {
            Some(ceiling) => running.count(spec.codec) < ceiling,
            None => policy
                .global_limit
                .ceiling()
                .is_none_or(|ceiling| running.total() < ceiling),
        };
        under_ceiling && (!exclusive || running.hardware() == 0)
    };

    fits && (!watch_exclusive || running.total() == 0)
}

/// Gatekeeper between the intake queue and execution.
pub struct AdmissionController {
    prefs: Arc<dyn PreferencesSource>,
    hardware_sessions: usize,
    running: Mutex<RunningSet>,
    changed: Notify,
}

impl AdmissionController {
    /// `hardware_sessions` is the probed session count used for `Auto` limits.
    pub fn new(prefs: Arc<dyn PreferencesSource>, hardware_sessions: usize) -> Self {
        Self {
            prefs,
            hardware_sessions: hardware_sessions.max(1),
            running: Mutex::new(RunningSet::default()),
            changed: Notify::new(),
        }
    }

    pub fn hardware_sessions(&self) -> usize {
        self.hardware_sessions
    }

    /// Admit `job` immediately if the current policy allows it.
    pub fn try_admit(self: &Arc<Self>, job: JobId, spec: &JobSpec) -> Option<SlotGuard> {
        let policy = self.prefs.concurrency_policy();
        let mut running = self.running.lock();
        if running.contains(&job) || !admits(&policy, self.hardware_sessions, &running, spec) {
            return None;
        }
        running.insert(job, SlotClass::of(spec));
        debug!(
            job_id = %job,
            codec = %spec.codec,
            total = running.total(),
            hardware = running.hardware(),
            "slot granted"
        );
        Some(SlotGuard {
            controller: Arc::clone(self),
            job,
            released: false,
        })
    }

    /// Wait until `job` can be admitted.
    ///
    /// Cancel-safe: dropping the future before it completes leaves no slot held.
    pub async fn await_slot(self: &Arc<Self>, job: JobId, spec: &JobSpec) -> SlotGuard {
        let mut logged = false;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed.
            notified.as_mut().enable();

            if let Some(slot) = self.try_admit(job, spec) {
                return slot;
            }
            if !logged {
                info!(job_id = %job, codec = %spec.codec, "waiting for a free slot");
                logged = true;
            }
            notified.await;
        }
    }

    /// Return `job`'s slot. Returns false if it held none.
    pub fn release(&self, job: JobId) -> bool {
        let released = self.running.lock().remove(&job);
        if released {
            debug!(job_id = %job, "slot released");
            self.changed.notify_waiters();
        }
        released
    }

    /// Wake waiters so they re-read the preferences.
    pub fn policy_changed(&self) {
        info!("concurrency policy changed, re-evaluating waiting jobs");
        self.changed.notify_waiters();
    }

    pub fn snapshot(&self) -> RunningSnapshot {
        self.running.lock().snapshot()
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("hardware_sessions", &self.hardware_sessions)
            .field("running", &self.snapshot())
            .finish_non_exhaustive()
    }
}

/// A held admission slot. Dropping it gives the slot back.
#[must_use = "dropping the guard releases the slot"]
pub struct SlotGuard {
    controller: Arc<AdmissionController>,
    job: JobId,
    released: bool,
}

impl SlotGuard {
    pub fn job_id(&self) -> JobId {
        self.job
    }

    pub fn release(mut self) -> bool {
        self.released = true;
        self.controller.release(self.job)
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.released {
            self.controller.release(self.job);
        }
    }
}

impl std::fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGuard").field("job", &self.job).finish()
    }
}
