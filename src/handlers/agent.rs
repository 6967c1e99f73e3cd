//! Agent Registry + execution-plane handlers — everything under the
//! agent-token-authenticated surface, plus `register` which is bootstrapped
//! by the owning user's session (§4.2, §6).

use axum::{extract::{State, Path, Query}, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::{AppState, AppError, AppResult};
use crate::middleware::auth::{AgentContext, UserContext};
use crate::models::account::Account;
use crate::models::agent::{Agent, ReportedStatus};
use crate::models::agent_token::AgentToken;
use crate::models::audit::{ActorType, AuditEntry};
use crate::models::job::Job;
use crate::models::job_result::SubmitResult;
use crate::{dispatch, oracle};

#[derive(Debug, Deserialize)]
pub struct RegisterAgentRequest {
    pub account_id: Uuid,
    #[serde(default)]
    pub agent_version: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterAgentResponse {
    pub agent_id: Uuid,
    pub agent_token: String,
    pub poll_interval_seconds: u32,
}

/// `register(userId, accountId, agentVersion, platform)` (§4.2). The
/// out-of-scope trust bootstrap is satisfied here by requiring the owning
/// user's own session: only the user who owns `accountId` can
/// mint an agent token for it. Re-registration reuses the existing agent
/// row and rotates its token atomically.
pub async fn register(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<RegisterAgentRequest>,
) -> AppResult<Json<RegisterAgentResponse>> {
    let account = Account::get_by_id(&state.pool, req.account_id)
        .await?
        .ok_or_else(|| AppError::NotFound("account not found".into()))?;

    if account.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    let agent = match Agent::find_live_by_account(&state.pool, account.id).await? {
        Some(existing) => existing,
        None => {
            Agent::create(
                &state.pool,
                account.id,
                req.agent_version.as_deref(),
                req.platform.as_deref(),
            )
            .await?
        }
    };

    let issued = AgentToken::rotate(
        &state.pool,
        agent.id,
        account.id,
        state.config.agent_token_ttl_hours,
    )
    .await?;

    AuditEntry::append(
        &state.pool,
        "agent_registry",
        "AGENT_REGISTERED",
        "agent",
        agent.id,
        ActorType::User,
        Some(user.user_id),
        json!({ "accountId": account.id }),
    )
    .await?;

    tracing::info!("agent {} registered for account {}", agent.id, account.id);

    Ok(Json(RegisterAgentResponse {
        agent_id: agent.id,
        agent_token: issued.raw_token,
        poll_interval_seconds: state.config.default_poll_interval_seconds,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub status: ReportedStatus,
    #[serde(default)]
    pub current_job_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub allowed: bool,
    pub reason: Option<&'static str>,
}

/// `heartbeat(token, reportedStatus, currentJobId?)` (§4.2). Fast path: one
/// state write, one Oracle read, one Audit append — no other side effects.
pub async fn heartbeat(
    State(state): State<AppState>,
    agent: AgentContext,
    Json(req): Json<HeartbeatRequest>,
) -> AppResult<Json<HeartbeatResponse>> {
    Agent::update_heartbeat(&state.pool, agent.agent_id, req.status.to_agent_state()).await?;

    let verdict = oracle::is_execution_allowed(&state.pool, agent.account_id).await?;

    AuditEntry::append(
        &state.pool,
        "agent_registry",
        "HEARTBEAT",
        "agent",
        agent.agent_id,
        ActorType::Agent,
        Some(agent.agent_id),
        json!({ "reportedStatus": req.status, "currentJobId": req.current_job_id, "allowed": verdict.allowed }),
    )
    .await?;

    Ok(Json(HeartbeatResponse {
        allowed: verdict.allowed,
        reason: verdict.reason,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ControlStateQuery {
    pub account_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ControlStateResponse {
    pub execution_allowed: bool,
    pub reason: Option<&'static str>,
}

/// `GET /agent/control-state?accountId=…` — same verdict as heartbeat,
/// callable without a state change (§6).
pub async fn control_state(
    State(state): State<AppState>,
    agent: AgentContext,
    Query(q): Query<ControlStateQuery>,
) -> AppResult<Json<ControlStateResponse>> {
    if agent.account_id != q.account_id {
        return Err(AppError::Forbidden);
    }

    let verdict = oracle::is_execution_allowed(&state.pool, q.account_id).await?;

    Ok(Json(ControlStateResponse {
        execution_allowed: verdict.allowed,
        reason: verdict.reason,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PullJobsQuery {
    pub account_id: Uuid,
    #[serde(default)]
    pub max_batch: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct JobView {
    pub job_id: Uuid,
    #[serde(rename = "type")]
    pub job_type: String,
    pub parameters: serde_json::Value,
    pub earliest_execution_time: DateTime<Utc>,
    pub timeout_seconds: i32,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type,
            parameters: job.parameters,
            earliest_execution_time: job.earliest_execution_time,
            timeout_seconds: job.timeout_seconds,
        }
    }
}

/// `GET /agent/jobs?accountId=…` (§6): pull and assign up to `maxBatch`
/// eligible jobs.
pub async fn pull_jobs(
    State(state): State<AppState>,
    agent: AgentContext,
    Query(q): Query<PullJobsQuery>,
) -> AppResult<Json<serde_json::Value>> {
    if agent.account_id != q.account_id {
        return Err(AppError::Forbidden);
    }

    let max_batch = q.max_batch.unwrap_or(state.config.default_max_batch);
    let jobs = dispatch::pull_jobs(&state.pool, agent.agent_id, q.account_id, max_batch).await?;
    let views: Vec<JobView> = jobs.into_iter().map(JobView::from).collect();

    Ok(Json(json!({ "jobs": views })))
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentEventType {
    ActionStarted,
    ActionCompleted,
    Warning,
    Info,
}

impl AgentEventType {
    fn as_str(self) -> &'static str {
        match self {
            Self::ActionStarted => "ACTION_STARTED",
            Self::ActionCompleted => "ACTION_COMPLETED",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecordEventRequest {
    pub job_id: Uuid,
    pub event_type: AgentEventType,
    #[serde(default)]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// `POST /agent/events` (§4.4). `ACTION_STARTED` drives the
/// ASSIGNED -> EXECUTING transition; every event type is appended to Audit
/// regardless. Events for a job not assigned to the reporting agent are
/// rejected with `FORBIDDEN`.
pub async fn record_event(
    State(state): State<AppState>,
    agent: AgentContext,
    Json(req): Json<RecordEventRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let job = Job::find_by_id(&state.pool, req.job_id)
        .await?
        .ok_or_else(|| AppError::NotFound("job not found".into()))?;

    if job.assigned_agent_id != Some(agent.agent_id) {
        return Err(AppError::Forbidden);
    }

    match req.event_type {
        AgentEventType::ActionStarted => {
            dispatch::record_action_started(&state.pool, req.job_id, agent.agent_id).await?;
        }
        _ => {
            AuditEntry::append(
                &state.pool,
                "dispatch",
                req.event_type.as_str(),
                "job",
                req.job_id,
                ActorType::Agent,
                Some(agent.agent_id),
                json!({ "message": req.message, "timestamp": req.timestamp }),
            )
            .await?;
        }
    }

    Ok(Json(json!({ "accepted": true })))
}

#[derive(Debug, Deserialize)]
pub struct SubmitResultMetadata {
    #[serde(default)]
    pub observed_state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitResultRequest {
    pub status: crate::models::job_result::ResultStatus,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub metadata: Option<SubmitResultMetadata>,
}

/// `POST /agent/jobs/{jobId}/result` (§4.4): idempotent terminal commit.
pub async fn submit_result(
    State(state): State<AppState>,
    agent: AgentContext,
    Path(job_id): Path<Uuid>,
    Json(req): Json<SubmitResultRequest>,
) -> AppResult<Json<Job>> {
    let observed_state = req.metadata.and_then(|m| m.observed_state);

    let job = dispatch::submit_result(
        &state.pool,
        job_id,
        agent.agent_id,
        SubmitResult {
            status: req.status,
            observed_state,
            failure_reason: req.failure_reason,
        },
    )
    .await?;

    Ok(Json(job))
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScreenshotStage {
    Before,
    After,
    Failure,
}

impl ScreenshotStage {
    fn as_str(self) -> &'static str {
        match self {
            Self::Before => "BEFORE",
            Self::After => "AFTER",
            Self::Failure => "FAILURE",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitScreenshotRequest {
    pub job_id: Uuid,
    pub stage: ScreenshotStage,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_base64: Option<String>,
}

/// `POST /agent/screenshots` (§9 Design Notes): stored only as an Audit
/// entry referencing the external blob; the core never inlines image bytes
/// at scale, so a base64 payload is rejected rather than persisted.
pub async fn submit_screenshot(
    State(state): State<AppState>,
    agent: AgentContext,
    Json(req): Json<SubmitScreenshotRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let job = Job::find_by_id(&state.pool, req.job_id)
        .await?
        .ok_or_else(|| AppError::NotFound("job not found".into()))?;

    if job.account_id != agent.account_id {
        return Err(AppError::Forbidden);
    }

    if req.image_base64.is_some() {
        return Err(AppError::ValidationError(
            "inline base64 screenshots are not accepted; upload to object storage and pass imageUrl".into(),
        ));
    }
    let image_url = req
        .image_url
        .ok_or_else(|| AppError::ValidationError("imageUrl is required".into()))?;

    AuditEntry::append(
        &state.pool,
        "observability",
        "SCREENSHOT_CAPTURED",
        "job",
        req.job_id,
        ActorType::Agent,
        Some(agent.agent_id),
        json!({ "stage": req.stage.as_str(), "imageUrl": image_url }),
    )
    .await?;

    Ok(Json(json!({ "accepted": true })))
}

/// `revoke(token)` / explicit deregistration (§4.2, §3): terminates the
/// calling agent and revokes its own token in one request. A deregistered
/// agent's next heartbeat or pull fails authentication — there is no
/// partial-revocation state to reason about.
pub async fn deregister(
    State(state): State<AppState>,
    agent: AgentContext,
) -> AppResult<Json<serde_json::Value>> {
    Agent::terminate(&state.pool, agent.agent_id).await?;
    AgentToken::revoke_all_for_agent(&state.pool, agent.agent_id).await?;

    AuditEntry::append(
        &state.pool,
        "agent_registry",
        "AGENT_DEREGISTERED",
        "agent",
        agent.agent_id,
        ActorType::Agent,
        Some(agent.agent_id),
        json!({ "accountId": agent.account_id }),
    )
    .await?;

    Ok(Json(json!({ "deregistered": true })))
}
