//! Job Dispatcher control-plane handlers (§4.4, §6) — creation and
//! read-only projections. Assignment and result commit live on the agent
//! plane (`handlers::agent`); this file only ever reaches PENDING or reads.

use axum::{extract::{State, Path, Query}, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, AppResult};
use crate::middleware::auth::UserContext;
use crate::models::job::{Job, JobParameters, JobState};
use crate::models::job_result::JobResult;
use crate::dispatch;
use crate::handlers::accounts::owned_account;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub account_id: Uuid,
    #[serde(flatten)]
    pub parameters: JobParameters,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "Utc::now")]
    pub earliest_execution_time: DateTime<Utc>,
    pub timeout_seconds: i32,
}

/// `POST /api/v1/jobs`
pub async fn create(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<CreateJobRequest>,
) -> AppResult<Json<Job>> {
    owned_account(&state, &user, req.account_id).await?;

    let job = dispatch::create_job(
        &state.pool,
        req.account_id,
        user.user_id,
        req.parameters,
        req.priority,
        req.earliest_execution_time,
        req.timeout_seconds,
    )
    .await?;

    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub account_id: Uuid,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// `GET /api/v1/jobs?accountId=…&state=…&limit=…`
pub async fn list(
    State(state): State<AppState>,
    user: UserContext,
    Query(q): Query<ListJobsQuery>,
) -> AppResult<Json<Vec<Job>>> {
    owned_account(&state, &user, q.account_id).await?;

    let state_filter = q.state.as_deref().map(JobState::parse);
    let limit = q.limit.unwrap_or(50).clamp(1, 200);

    let jobs = dispatch::list_jobs(&state.pool, q.account_id, state_filter, limit).await?;
    Ok(Json(jobs))
}

#[derive(Debug, Serialize)]
pub struct JobWithResult {
    #[serde(flatten)]
    pub job: Job,
    pub result: Option<JobResult>,
}

/// `GET /api/v1/jobs/{jobId}` — the job plus its result, if one has been
/// committed yet (§6).
pub async fn get(
    State(state): State<AppState>,
    user: UserContext,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<JobWithResult>> {
    let job = dispatch::get_job(&state.pool, job_id).await?;
    owned_account(&state, &user, job.account_id).await?;

    let result = JobResult::find_by_job_id(&state.pool, job.id).await?;

    Ok(Json(JobWithResult { job, result }))
}
