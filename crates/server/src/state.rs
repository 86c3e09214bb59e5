use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use transq_core::{JobId, Progress};
use transq_scheduler::{Scheduler, SharedPreferences};

use crate::observer::EventObserver;

/// Server-sent event types.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "job_queued")]
    JobQueued { job_id: JobId },
    #[serde(rename = "job_started")]
    JobStarted { job_id: JobId },
    #[serde(rename = "job_paused")]
    JobPaused { job_id: JobId },
    #[serde(rename = "job_resumed")]
    JobResumed { job_id: JobId },
    #[serde(rename = "job_finished")]
    JobFinished { job_id: JobId },
    #[serde(rename = "job_failed")]
    JobFailed { job_id: JobId, reason: String },
    #[serde(rename = "job_removed")]
    JobRemoved { job_id: JobId },
    #[serde(rename = "job_progress")]
    JobProgress { job_id: JobId, progress: Progress },
    #[serde(rename = "heartbeat")]
    Heartbeat { seq: u64, ts: DateTime<Utc> },
}

impl ServerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JobQueued { .. } => "job_queued",
            Self::JobStarted { .. } => "job_started",
            Self::JobPaused { .. } => "job_paused",
            Self::JobResumed { .. } => "job_resumed",
            Self::JobFinished { .. } => "job_finished",
            Self::JobFailed { .. } => "job_failed",
            Self::JobRemoved { .. } => "job_removed",
            Self::JobProgress { .. } => "job_progress",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub preferences: Arc<SharedPreferences>,
    pub events: tokio::sync::broadcast::Sender<ServerEvent>,
    /// Observer handed to the scheduler for every job submitted over HTTP.
    pub observer: Arc<EventObserver>,
    /// Cancelled when the server shuts down; ends long-lived event streams.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        scheduler: Arc<Scheduler>,
        preferences: Arc<SharedPreferences>,
        events: tokio::sync::broadcast::Sender<ServerEvent>,
    ) -> Self {
        let observer = Arc::new(EventObserver::new(events.clone()));
        Self {
            scheduler,
            preferences,
            events,
            observer,
            shutdown: CancellationToken::new(),
        }
    }
}
