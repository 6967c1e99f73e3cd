//! JobResult model — the terminal half of the Job Dispatcher.
//!
//! `submitResult` is the only path that moves a job into a terminal state,
//! and it does so by inserting the result row and updating the job row in
//! one transaction (§5 result-commit atomicity): either both happen or
//! neither does, so a reader never observes a terminal job without its
//! result, nor a result without its job reflecting it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::job::{Job, JobState};

/// JobResult.status (§3): `SUCCESS`/`FAILED` per the data model, plus
/// `SKIPPED` which `submitResult` (§4.4) accepts as a third terminal status
/// alongside the two the result entity itself records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Success,
    Failed,
    Skipped,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }

    pub fn to_job_state(self) -> JobState {
        match self {
            Self::Success => JobState::Completed,
            Self::Failed => JobState::Failed,
            Self::Skipped => JobState::Skipped,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct JobResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub agent_id: Uuid,
    pub status: String,
    pub observed_state: Option<String>,
    pub failure_reason: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitResult {
    pub status: ResultStatus,
    pub observed_state: Option<String>,
    pub failure_reason: Option<String>,
}

/// Outcome of `submitResult`, distinguishing the idempotent replay case, a
/// fresh commit, a missing job, and an ownership mismatch so handlers can
/// pick the right HTTP status (§7 taxonomy items 3 and 4) without a second
/// round-trip.
pub enum SubmitOutcome {
    Committed(Job),
    AlreadyCommitted(Job),
    NotFound,
    Forbidden,
}

impl JobResult {
    pub async fn find_by_job_id(pool: &PgPool, job_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, JobResult>("SELECT * FROM job_results WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    /// `submitResult(jobId, agentId, status, ...)`. Idempotent: a retried
    /// submission for a job that already has a result (and is therefore
    /// already terminal) is a no-op that returns the existing state rather
    /// than erroring, so an agent that times out waiting for the first
    /// response can safely resend.
    ///
    /// Ownership and state are checked inside the same transaction as the
    /// write to avoid a TOCTOU window between the check and the commit.
    pub async fn submit(
        pool: &PgPool,
        job_id: Uuid,
        agent_id: Uuid,
        data: SubmitResult,
    ) -> Result<SubmitOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(job) = job else {
            tx.rollback().await?;
            return Ok(SubmitOutcome::NotFound);
        };

        if job.assigned_agent_id != Some(agent_id) {
            tx.rollback().await?;
            return Ok(SubmitOutcome::Forbidden);
        }

        if job.state().is_terminal() {
            tx.commit().await?;
            return Ok(SubmitOutcome::AlreadyCommitted(job));
        }

        sqlx::query(
            r#"
            INSERT INTO job_results (job_id, agent_id, status, observed_state, failure_reason)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(job_id)
        .bind(agent_id)
        .bind(data.status.as_str())
        .bind(&data.observed_state)
        .bind(&data.failure_reason)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET state = $2, completed_at = NOW(), failure_reason = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(data.status.to_job_state().as_str())
        .bind(&data.failure_reason)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SubmitOutcome::Committed(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_status_maps_to_the_matching_terminal_job_state() {
        assert_eq!(ResultStatus::Success.to_job_state(), JobState::Completed);
        assert_eq!(ResultStatus::Failed.to_job_state(), JobState::Failed);
        assert_eq!(ResultStatus::Skipped.to_job_state(), JobState::Skipped);
    }

    #[test]
    fn result_status_wire_strings_are_screaming_snake_case() {
        assert_eq!(ResultStatus::Success.as_str(), "SUCCESS");
        assert_eq!(ResultStatus::Failed.as_str(), "FAILED");
        assert_eq!(ResultStatus::Skipped.as_str(), "SKIPPED");
    }

    #[test]
    fn submit_result_deserializes_status_from_the_wire_tag() {
        let json = r#"{"status": "SUCCESS", "observed_state": "connected", "failure_reason": null}"#;
        let parsed: SubmitResult = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.status, ResultStatus::Success);
        assert_eq!(parsed.observed_state.as_deref(), Some("connected"));
    }
}
