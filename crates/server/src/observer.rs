use std::sync::{Arc, Weak};

use tokio::sync::broadcast;
use transq_core::{JobId, JobObserver, Progress};

use crate::state::ServerEvent;

/// Forwards scheduler callbacks to the SSE broadcast channel.
#[derive(Debug, Clone)]
pub struct EventObserver {
    events: broadcast::Sender<ServerEvent>,
}

impl EventObserver {
    pub fn new(events: broadcast::Sender<ServerEvent>) -> Self {
        Self { events }
    }

    pub fn weak(self: &Arc<Self>) -> Weak<dyn JobObserver> {
        let weak: Weak<EventObserver> = Arc::downgrade(self);
        weak
    }

    fn emit(&self, event: ServerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl JobObserver for EventObserver {
    fn on_queued(&self, job: &JobId) {
        self.emit(ServerEvent::JobQueued { job_id: *job });
    }

    fn on_start(&self, job: &JobId) {
        self.emit(ServerEvent::JobStarted { job_id: *job });
    }

    fn on_pause(&self, job: &JobId) {
        self.emit(ServerEvent::JobPaused { job_id: *job });
    }

    fn on_resume(&self, job: &JobId) {
        self.emit(ServerEvent::JobResumed { job_id: *job });
    }

    fn on_finish(&self, job: &JobId) {
        self.emit(ServerEvent::JobFinished { job_id: *job });
    }

    fn on_fail(&self, job: &JobId, reason: &str) {
        self.emit(ServerEvent::JobFailed {
            job_id: *job,
            reason: reason.to_string(),
        });
    }

    fn on_remove(&self, job: &JobId) {
        self.emit(ServerEvent::JobRemoved { job_id: *job });
    }

    fn on_progress(&self, job: &JobId, progress: &Progress) {
        self.emit(ServerEvent::JobProgress {
            job_id: *job,
            progress: progress.clone(),
        });
    }
}
