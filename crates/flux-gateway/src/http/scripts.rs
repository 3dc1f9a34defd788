//! Job management: `/api/scripts`.
//!
//! Every mutation keeps the trigger table in step with the store: create and
//! update re-run `upsert`, delete removes the trigger and the job's
//! environment directory before the row goes.

use axum::{
    extract::{Path, State},
    Json,
};
use flux_core::types::{Job, JobId, JobSpec};
use flux_scheduler::{TriggerOutcome, UpsertOutcome};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{ApiError, ApiResult};
use crate::app::AppState;

/// GET /api/scripts
pub async fn list_scripts(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Job>>> {
    Ok(Json(state.jobs.list()?))
}

/// POST /api/scripts
pub async fn create_script(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<JobSpec>,
) -> ApiResult<Json<Job>> {
    validate(&spec)?;
    let job = state.jobs.create(&spec)?;
    let outcome = state.scheduler.upsert(&job);
    info!(job_id = %job.id, name = %job.name(), ?outcome, "job created");
    Ok(Json(job))
}

/// PUT /api/scripts/{id}
pub async fn update_script(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(spec): Json<JobSpec>,
) -> ApiResult<Json<Job>> {
    validate(&spec)?;
    let job = state.jobs.update(JobId(id), &spec)?;
    let outcome = state.scheduler.upsert(&job);
    if outcome == UpsertOutcome::InvalidCron {
        warn!(job_id = %job.id, cron = %job.spec.cron, "job saved but left unscheduled");
    }
    info!(job_id = %job.id, ?outcome, "job updated");
    Ok(Json(job))
}

/// DELETE /api/scripts/{id}
pub async fn delete_script(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let id = JobId(id);
    existing(&state, id)?;

    state.scheduler.remove(id);
    if let Err(e) = state.scheduler.pipeline().provisioner().discard(id).await {
        warn!(job_id = %id, "could not remove environment: {e}");
    }
    state.jobs.delete(id)?;

    info!(job_id = %id, "job deleted");
    Ok(Json(json!({ "status": "deleted" })))
}

/// POST /api/scripts/{id}/run: start a run now and return immediately.
pub async fn run_script(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let id = JobId(id);
    existing(&state, id)?;

    let status = match state.scheduler.trigger_now(id) {
        TriggerOutcome::Started => "triggered",
        TriggerOutcome::AlreadyRunning => "already_running",
    };
    Ok(Json(json!({ "status": status })))
}

fn existing(state: &AppState, id: JobId) -> ApiResult<Job> {
    state.jobs.get(id)?.ok_or(ApiError::NotFound {
        kind: "job",
        id: id.get(),
    })
}

fn validate(spec: &JobSpec) -> ApiResult<()> {
    if spec.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }
    Ok(())
}
