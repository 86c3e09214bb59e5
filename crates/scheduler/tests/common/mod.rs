#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use transq_core::{
    CodecFamily, ConcurrencyPolicy, EncodeRequest, EncoderProcessRunner, ExitStatus,
    HardwareCapabilityProbe, JobId, JobObserver, JobSpec, JobState, PauseGate, ProbeError,
    Progress, RunnerError,
};
use transq_scheduler::{Scheduler, SchedulerConfig, SharedPreferences};

pub const TICK: Duration = Duration::from_millis(10);

/// Runner that "encodes" by ticking on a timer.
///
/// Inputs named `fail*` fail immediately and `panic*` panic. Anything else
/// ticks until released or until its configured tick count is reached.
#[derive(Default)]
pub struct FakeRunner {
    state: Mutex<RunnerState>,
}

#[derive(Default)]
struct RunnerState {
    ticks: HashMap<PathBuf, u64>,
    finish_after: HashMap<PathBuf, u64>,
    default_ticks: Option<u64>,
    released: HashSet<PathBuf>,
    active: Vec<CodecFamily>,
    max_active: usize,
    max_by_codec: HashMap<CodecFamily, usize>,
    mixed_hardware: bool,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every job not configured otherwise succeeds after `ticks`.
    pub fn finish_all_after(&self, ticks: u64) {
        self.state.lock().default_ticks = Some(ticks);
    }

    pub fn finish_after(&self, name: &str, ticks: u64) {
        self.state.lock().finish_after.insert(media(name), ticks);
    }

    /// Let the job encoding `name` succeed on its next tick.
    pub fn release(&self, name: &str) {
        self.state.lock().released.insert(media(name));
    }

    pub fn ticks(&self, name: &str) -> u64 {
        self.state.lock().ticks.get(&media(name)).copied().unwrap_or(0)
    }

    pub fn max_active(&self) -> usize {
        self.state.lock().max_active
    }

    pub fn max_for(&self, codec: CodecFamily) -> usize {
        self.state.lock().max_by_codec.get(&codec).copied().unwrap_or(0)
    }

    pub fn saw_mixed_hardware(&self) -> bool {
        self.state.lock().mixed_hardware
    }

    fn enter(&self, codec: CodecFamily) {
        let mut s = self.state.lock();
        s.active.push(codec);
        s.max_active = s.max_active.max(s.active.len());
        let same = s.active.iter().filter(|c| **c == codec).count();
        let max = s.max_by_codec.entry(codec).or_default();
        *max = (*max).max(same);
        let hardware = s.active.iter().filter(|c| c.is_hardware()).count();
        if hardware > 0 && hardware < s.active.len() {
            s.mixed_hardware = true;
        }
    }

    fn leave(&self, codec: CodecFamily) {
        let mut s = self.state.lock();
        if let Some(pos) = s.active.iter().position(|c| *c == codec) {
            s.active.remove(pos);
        }
    }

    /// Count one tick for `input`. Returns the tick number and whether it is done.
    fn tick(&self, input: &Path) -> (u64, bool) {
        let mut s = self.state.lock();
        let count = {
            let n = s.ticks.entry(input.to_path_buf()).or_default();
            *n += 1;
            *n
        };
        let target = s.finish_after.get(input).copied().or(s.default_ticks);
        let done = s.released.contains(input) || target.is_some_and(|t| count >= t);
        (count, done)
    }
}

#[async_trait]
impl EncoderProcessRunner for FakeRunner {
    async fn run(
        &self,
        request: &EncodeRequest,
        cancel: CancellationToken,
        gate: PauseGate,
    ) -> Result<ExitStatus, RunnerError> {
        let input = request.spec.input.clone();
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.starts_with("fail") {
            return Ok(ExitStatus::Failed {
                code: Some(1),
                reason: "simulated failure".into(),
            });
        }
        if name.starts_with("panic") {
            panic!("simulated runner panic");
        }

        let codec = request.spec.codec;
        self.enter(codec);
        let status = loop {
            tokio::select! {
                _ = cancel.cancelled() => break ExitStatus::Terminated,
                _ = gate.wait_open() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break ExitStatus::Terminated,
                _ = tokio::time::sleep(TICK) => {}
            }
            if !gate.is_open() {
                continue;
            }
            let (frame, done) = self.tick(&input);
            request.progress.report(&Progress {
                frame,
                ..Progress::default()
            });
            if done {
                break ExitStatus::Success;
            }
        };
        self.leave(codec);
        Ok(status)
    }
}

pub struct FixedProbe(pub Option<usize>);

#[async_trait]
impl HardwareCapabilityProbe for FixedProbe {
    async fn max_concurrent_sessions(&self) -> Result<usize, ProbeError> {
        self.0.ok_or(ProbeError::NoHardwareEncoder)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Queued,
    Start,
    Pause,
    Resume,
    Finish,
    Fail(String),
    Remove,
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(JobId, Event)>>,
    progress: AtomicUsize,
}

impl RecordingObserver {
    pub fn weak(self: &Arc<Self>) -> Weak<dyn JobObserver> {
        let weak: Weak<RecordingObserver> = Arc::downgrade(self);
        weak
    }

    pub fn events_for(&self, job: JobId) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|(id, _)| *id == job)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn count(&self, job: JobId, event: &Event) -> usize {
        self.events_for(job).iter().filter(|e| *e == event).count()
    }

    pub fn starts(&self) -> Vec<JobId> {
        self.events
            .lock()
            .iter()
            .filter(|(_, e)| *e == Event::Start)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn progress_reports(&self) -> usize {
        self.progress.load(Ordering::SeqCst)
    }

    fn push(&self, job: &JobId, event: Event) {
        self.events.lock().push((*job, event));
    }
}

impl JobObserver for RecordingObserver {
    fn on_queued(&self, job: &JobId) {
        self.push(job, Event::Queued);
    }
    fn on_start(&self, job: &JobId) {
        self.push(job, Event::Start);
    }
    fn on_pause(&self, job: &JobId) {
        self.push(job, Event::Pause);
    }
    fn on_resume(&self, job: &JobId) {
        self.push(job, Event::Resume);
    }
    fn on_finish(&self, job: &JobId) {
        self.push(job, Event::Finish);
    }
    fn on_fail(&self, job: &JobId, reason: &str) {
        self.push(job, Event::Fail(reason.to_string()));
    }
    fn on_remove(&self, job: &JobId) {
        self.push(job, Event::Remove);
    }
    fn on_progress(&self, _job: &JobId, _progress: &Progress) {
        self.progress.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub scheduler: Scheduler,
    pub runner: Arc<FakeRunner>,
    pub observer: Arc<RecordingObserver>,
    pub prefs: Arc<SharedPreferences>,
}

pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        stop_grace: Duration::from_secs(1),
        watch_poll_interval: Duration::from_millis(20),
    }
}

pub async fn harness(policy: ConcurrencyPolicy) -> Harness {
    harness_with(policy, &FixedProbe(Some(1))).await
}

pub async fn harness_with(policy: ConcurrencyPolicy, probe: &dyn HardwareCapabilityProbe) -> Harness {
    let runner = FakeRunner::new();
    let prefs = Arc::new(SharedPreferences::new(policy));
    let scheduler = Scheduler::start(test_config(), runner.clone(), probe, prefs.clone()).await;
    Harness {
        scheduler,
        runner,
        observer: Arc::new(RecordingObserver::default()),
        prefs,
    }
}

pub fn media(name: &str) -> PathBuf {
    Path::new("/media").join(name)
}

impl Harness {
    pub fn submit(&self, spec: JobSpec) -> JobId {
        self.scheduler
            .submit(spec, self.observer.weak())
            .expect("submission accepted")
    }

    pub fn encode(&self, name: &str, codec: CodecFamily) -> JobId {
        self.submit(JobSpec::standard(media(name), Path::new("/out").join(name), codec))
    }

    /// Current state, `None` once the job is removed.
    pub fn state(&self, job: JobId) -> Option<JobState> {
        self.scheduler.job(job).map(|j| j.state)
    }

    pub async fn wait_for(&self, job: JobId, state: JobState) {
        let Some(mut rx) = self.scheduler.subscribe(job) else {
            assert_eq!(state, JobState::Removed, "job {job} is gone");
            return;
        };
        let reached = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| *s == state))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        assert!(reached, "job {job} never reached {state}, last {:?}", self.state(job));
    }

    /// Give the scheduler time to make any decision it is going to make.
    pub async fn settle(&self) {
        tokio::time::sleep(TICK * 20).await;
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(TICK).await;
    }
}

/// Fresh directory under the system temp dir.
pub fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("transq_sched_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn write_file(path: &Path, bytes: usize) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, vec![0u8; bytes]).unwrap();
}
