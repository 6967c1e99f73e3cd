//! Job Dispatcher coordination — the operations that span the Job/JobResult
//! models and the Risk Oracle veto, plus the Audit Sink appends that go with
//! them. Model methods stay pure writes (§ design note in each model); this
//! module is where the cross-cutting policy lives, mirroring how the
//! reference server's handlers sit one layer above its model CRUD.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::account::Account;
use crate::models::agent::Agent;
use crate::models::audit::{ActorType, AuditEntry};
use crate::models::job::{Job, JobParameters, JobState};
use crate::models::job_result::{JobResult, SubmitOutcome, SubmitResult};
use crate::models::risk::{Severity, Violation};
use crate::oracle;

/// `createJob` (§4.4): validates the per-type payload, persists the job in
/// PENDING, and appends the creation audit event.
pub async fn create_job(
    pool: &PgPool,
    account_id: Uuid,
    created_by_user_id: Uuid,
    parameters: JobParameters,
    priority: i32,
    earliest_execution_time: DateTime<Utc>,
    timeout_seconds: i32,
) -> Result<Job, AppError> {
    parameters.validate()?;

    if timeout_seconds <= 0 {
        return Err(AppError::ValidationError("timeoutSeconds must be positive".into()));
    }

    Account::get_by_id(pool, account_id)
        .await?
        .ok_or_else(|| AppError::NotFound("account not found".into()))?;

    let job = Job::create(
        pool,
        account_id,
        created_by_user_id,
        &parameters,
        priority,
        earliest_execution_time,
        timeout_seconds,
    )
    .await?;

    AuditEntry::append(
        pool,
        "dispatch",
        "JOB_CREATED",
        "job",
        job.id,
        ActorType::User,
        Some(created_by_user_id),
        serde_json::json!({ "jobType": job.job_type, "accountId": account_id }),
    )
    .await?;

    Ok(job)
}

/// `pullJobs(agentId, accountId, maxBatch)` (§4.4): consults the Risk Oracle
/// first — a vetoed account yields zero jobs, not an error, since polling is
/// the agent's normal idle behavior and a veto is not exceptional from the
/// agent's point of view.
pub async fn pull_jobs(
    pool: &PgPool,
    agent_id: Uuid,
    account_id: Uuid,
    max_batch: i64,
) -> Result<Vec<Job>, AppError> {
    let agent = Agent::find_by_id(pool, agent_id)
        .await?
        .ok_or_else(|| AppError::NotFound("agent not found".into()))?;

    if agent.account_id != account_id || agent.terminated_at.is_some() {
        return Err(AppError::Forbidden);
    }

    if !oracle::is_execution_allowed(pool, account_id).await?.allowed {
        return Ok(Vec::new());
    }

    let jobs = Job::pull_eligible(pool, account_id, agent_id, max_batch).await?;

    for job in &jobs {
        AuditEntry::append(
            pool,
            "dispatch",
            "JOB_ASSIGNED",
            "job",
            job.id,
            ActorType::Agent,
            Some(agent_id),
            serde_json::json!({ "accountId": account_id }),
        )
        .await?;

        oracle::enforce_rate_limit(pool, account_id, &job.job_type, job.id).await?;
    }

    Ok(jobs)
}

/// `recordEvent(ACTION_STARTED)` (§4.4): ASSIGNED -> EXECUTING, scoped to
/// the agent the job was assigned to.
pub async fn record_action_started(
    pool: &PgPool,
    job_id: Uuid,
    agent_id: Uuid,
) -> Result<Job, AppError> {
    let job = Job::transition_to_executing(pool, job_id, agent_id).await?;

    let job = match job {
        Some(job) => job,
        None => {
            let existing = Job::find_by_id(pool, job_id)
                .await?
                .ok_or_else(|| AppError::NotFound("job not found".into()))?;
            return Err(AppError::InvalidState(format!(
                "job {} is {}, cannot start",
                job_id,
                existing.state
            )));
        }
    };

    AuditEntry::append(
        pool,
        "dispatch",
        "JOB_STARTED",
        "job",
        job.id,
        ActorType::Agent,
        Some(agent_id),
        serde_json::json!({}),
    )
    .await?;

    Ok(job)
}

/// `submitResult` (§4.4, §5): idempotent terminal commit. A replayed
/// submission for an already-terminal job returns the existing state rather
/// than erroring. Appends an audit event and, on FAILED with a
/// session-related `failureReason`, flips the account into EXPIRED so the
/// next `isExecutionAllowed` check reflects it without a separate signal.
pub async fn submit_result(
    pool: &PgPool,
    job_id: Uuid,
    agent_id: Uuid,
    data: SubmitResult,
) -> Result<Job, AppError> {
    let status = data.status;
    let failure_reason = data.failure_reason.clone();

    let outcome = JobResult::submit(pool, job_id, agent_id, data).await?;

    let job = match outcome {
        SubmitOutcome::NotFound => {
            return Err(AppError::NotFound("job not found".into()));
        }
        SubmitOutcome::Forbidden => {
            return Err(AppError::Forbidden);
        }
        SubmitOutcome::Committed(job) => {
            AuditEntry::append(
                pool,
                "dispatch",
                "JOB_COMPLETED",
                "job",
                job.id,
                ActorType::Agent,
                Some(agent_id),
                serde_json::json!({ "status": status.as_str(), "failureReason": failure_reason }),
            )
            .await?;

            if is_session_failure(&job.failure_reason) {
                Account::update_validation_status(
                    pool,
                    job.account_id,
                    crate::models::account::ValidationStatus::Expired,
                )
                .await?;

                AuditEntry::append(
                    pool,
                    "account",
                    "SESSION_EXPIRED",
                    "account",
                    job.account_id,
                    ActorType::System,
                    None,
                    serde_json::json!({ "detectedViaJobId": job.id }),
                )
                .await?;

                Violation::record(
                    pool,
                    job.account_id,
                    None,
                    Some(job.id),
                    "SESSION_EXPIRED",
                    Severity::Medium,
                )
                .await?;
            }

            job
        }
        SubmitOutcome::AlreadyCommitted(job) => job,
    };

    Ok(job)
}

fn is_session_failure(failure_reason: &Option<String>) -> bool {
    failure_reason
        .as_deref()
        .map(|reason| reason == "SESSION_EXPIRED")
        .unwrap_or(false)
}

/// Optional reaper backstop (§4.4 Design Notes): jobs stuck in EXECUTING
/// past their timeout plus grace are force-completed as FAILED, reusing the
/// same idempotent commit path an agent would have used, so a late result
/// from a since-reaped job is simply ignored by `submitResult`'s
/// already-terminal branch.
pub async fn reap_stuck_jobs(pool: &PgPool, grace_seconds: i64) -> Result<usize, AppError> {
    let stuck = Job::find_stuck(pool, grace_seconds).await?;
    let mut reaped = 0;

    for job in stuck {
        let agent_id = match job.assigned_agent_id {
            Some(id) => id,
            None => continue,
        };

        let result = JobResult::submit(
            pool,
            job.id,
            agent_id,
            SubmitResult {
                status: crate::models::job_result::ResultStatus::Failed,
                observed_state: None,
                failure_reason: Some("TIMEOUT".into()),
            },
        )
        .await?;

        if let SubmitOutcome::Committed(job) = result {
            AuditEntry::append(
                pool,
                "dispatch",
                "JOB_REAPED",
                "job",
                job.id,
                ActorType::System,
                None,
                serde_json::json!({}),
            )
            .await?;
            reaped += 1;
        }
    }

    Ok(reaped)
}

/// `listJobs`/`getJob` (control plane reads, §6). Thin pass-through kept
/// here rather than in the handler so callers never bypass the module.
pub async fn list_jobs(
    pool: &PgPool,
    account_id: Uuid,
    state_filter: Option<JobState>,
    limit: i64,
) -> Result<Vec<Job>, AppError> {
    Ok(Job::list_by_account(pool, account_id, state_filter, limit).await?)
}

pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Job, AppError> {
    Job::find_by_id(pool, job_id)
        .await?
        .ok_or_else(|| AppError::NotFound("job not found".into()))
}
