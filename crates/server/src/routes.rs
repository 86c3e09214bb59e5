use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;
use transq_core::error::ApiError;
use transq_core::{CodecFamily, ConcurrencyPolicy, JobId, JobKind, JobSpec, PreferencesSource};
use transq_scheduler::{JobSnapshot, RunningSnapshot};

use crate::error::AppError;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        // Jobs
        .route("/jobs", get(list_jobs).post(submit_job))
        .route("/jobs/prune", post(prune_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/pause", post(pause_job))
        .route("/jobs/{id}/resume", post(resume_job))
        .route("/jobs/{id}/stop", post(stop_job))
        // Intake
        .route("/queue", get(queue_status))
        .route("/queue/drain", post(drain_queue))
        // Admission
        .route("/policy", get(get_policy).put(put_policy))
        .route("/running", get(running))
        .route("/events", get(sse_events))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    queued: usize,
    running: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        queued: state.scheduler.intake_len(),
        running: state.scheduler.running().total,
    })
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SubmitJobRequest {
    #[serde(default = "default_kind")]
    kind: JobKind,
    codec: CodecFamily,
    input: PathBuf,
    output: PathBuf,
    #[serde(default)]
    encoder_args: Vec<String>,
    container: Option<String>,
    #[serde(default)]
    recursive: bool,
}

fn default_kind() -> JobKind {
    JobKind::Standard
}

impl SubmitJobRequest {
    fn into_spec(self) -> JobSpec {
        let spec = match self.kind {
            JobKind::Standard => JobSpec::standard(self.input, self.output, self.codec),
            JobKind::Folder => JobSpec::folder(self.input, self.output, self.codec, self.recursive),
            JobKind::WatchFolder => {
                JobSpec::watch_folder(self.input, self.output, self.codec, self.recursive)
            }
        };
        let spec = JobSpec {
            // Surface a recursive standard job as a validation error.
            recursive: self.recursive,
            ..spec.with_args(self.encoder_args)
        };
        match self.container {
            Some(container) => spec.with_container(container),
            None => spec,
        }
    }
}

#[derive(Serialize)]
struct SubmitJobResponse {
    id: JobId,
}

fn parse_job_id(raw: &str) -> Result<JobId, AppError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid job id: {raw}")).into())
}

async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSnapshot>> {
    Json(state.scheduler.jobs())
}

async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), AppError> {
    let id = state
        .scheduler
        .submit(body.into_spec(), state.observer.weak())?;
    Ok((StatusCode::CREATED, Json(SubmitJobResponse { id })))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, AppError> {
    let id = parse_job_id(&id)?;
    let job = state
        .scheduler
        .job(id)
        .ok_or_else(|| ApiError::NotFound(format!("job not found: {id}")))?;
    Ok(Json(job))
}

async fn pause_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.scheduler.request_pause(parse_job_id(&id)?)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn resume_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.scheduler.request_resume(parse_job_id(&id)?)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn stop_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.scheduler.request_stop(parse_job_id(&id)?).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn prune_jobs(State(state): State<AppState>) -> Json<serde_json::Value> {
    let removed = state.scheduler.prune_terminal();
    Json(serde_json::json!({ "removed": removed }))
}

// ---------------------------------------------------------------------------
// Intake
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct QueueResponse {
    len: usize,
    empty: bool,
}

async fn queue_status(State(state): State<AppState>) -> Json<QueueResponse> {
    Json(QueueResponse {
        len: state.scheduler.intake_len(),
        empty: state.scheduler.is_intake_empty(),
    })
}

#[derive(Serialize)]
struct DrainResponse {
    removed: Vec<JobId>,
}

async fn drain_queue(State(state): State<AppState>) -> Json<DrainResponse> {
    Json(DrainResponse {
        removed: state.scheduler.drain_intake(),
    })
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

async fn get_policy(State(state): State<AppState>) -> Json<ConcurrencyPolicy> {
    Json(state.preferences.concurrency_policy())
}

async fn put_policy(
    State(state): State<AppState>,
    Json(policy): Json<ConcurrencyPolicy>,
) -> Result<Json<ConcurrencyPolicy>, AppError> {
    state
        .preferences
        .set(policy.clone())
        .map_err(ApiError::from)?;
    info!(?policy, "concurrency policy updated");
    state.scheduler.policy_changed();
    Ok(Json(policy))
}

#[derive(Serialize)]
struct RunningResponse {
    #[serde(flatten)]
    running: RunningSnapshot,
    hardware_sessions: usize,
}

async fn running(State(state): State<AppState>) -> Json<RunningResponse> {
    Json(RunningResponse {
        running: state.scheduler.running(),
        hardware_sessions: state.scheduler.hardware_sessions(),
    })
}

// ---------------------------------------------------------------------------
// SSE events
// ---------------------------------------------------------------------------

async fn sse_events(
    State(state): State<AppState>,
) -> axum::response::Sse<
    impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>,
> {
    use axum::response::sse::Event;
    use std::time::Duration;

    let mut rx = state.events.subscribe();
    let shutdown = state.shutdown.clone();

    let stream = async_stream::stream! {
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = rx.recv() => received,
            };
            match received {
                Ok(evt) => {
                    if let Ok(data) = serde_json::to_string(&evt) {
                        yield Ok(Event::default().event(evt.event_type()).data(data));
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    yield Ok(Event::default()
                        .event("error")
                        .data(format!(r#"{{"lagged":{n}}}"#)));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    axum::response::Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
