//! Job model — Job Dispatcher.
//!
//! State machine: `PENDING -> ASSIGNED -> EXECUTING -> {COMPLETED|FAILED|SKIPPED}`.
//! No other edges exist; terminal states are absorbing. The pull/assign CAS
//! (`pull_eligible`) and the agent-reported-event transition
//! (`transition_to_executing`) are the only writers that move a job off
//! PENDING/ASSIGNED; the result commit (see `models::job_result`) is the
//! only writer that moves a job into a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Assigned,
    Executing,
    Completed,
    Failed,
    Skipped,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Assigned => "ASSIGNED",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ASSIGNED" => Self::Assigned,
            "EXECUTING" => Self::Executing,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "SKIPPED" => Self::Skipped,
            _ => Self::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    VisitProfile,
    SendConnectionRequest,
    LikePost,
    CommentPost,
    SendMessage,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VisitProfile => "VISIT_PROFILE",
            Self::SendConnectionRequest => "SEND_CONNECTION_REQUEST",
            Self::LikePost => "LIKE_POST",
            Self::CommentPost => "COMMENT_POST",
            Self::SendMessage => "SEND_MESSAGE",
        }
    }
}

/// Dynamic, per-type job payload (§9 Design Notes). The `type` tag doubles
/// as the wire and storage discriminant, so a job's `parameters` JSON is
/// self-describing and the `job_type` column is a derived, indexable copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobParameters {
    VisitProfile {
        profile_url: String,
    },
    SendConnectionRequest {
        profile_url: String,
        #[serde(default)]
        note_text: Option<String>,
    },
    LikePost {
        post_url: String,
    },
    CommentPost {
        post_url: String,
        message_text: String,
    },
    SendMessage {
        profile_url: String,
        message_text: String,
    },
}

impl JobParameters {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::VisitProfile { .. } => JobType::VisitProfile,
            Self::SendConnectionRequest { .. } => JobType::SendConnectionRequest,
            Self::LikePost { .. } => JobType::LikePost,
            Self::CommentPost { .. } => JobType::CommentPost,
            Self::SendMessage { .. } => JobType::SendMessage,
        }
    }

    /// Per-variant validation at creation (§9).
    pub fn validate(&self) -> Result<(), AppError> {
        let blank = |s: &str| s.trim().is_empty();
        match self {
            Self::VisitProfile { profile_url } if blank(profile_url) => {
                Err(AppError::ValidationError("profileUrl must not be empty".into()))
            }
            Self::SendConnectionRequest { profile_url, .. } if blank(profile_url) => {
                Err(AppError::ValidationError("profileUrl must not be empty".into()))
            }
            Self::LikePost { post_url } if blank(post_url) => {
                Err(AppError::ValidationError("postUrl must not be empty".into()))
            }
            Self::CommentPost { post_url, message_text } if blank(post_url) || blank(message_text) => {
                Err(AppError::ValidationError("postUrl and messageText must not be empty".into()))
            }
            Self::SendMessage { profile_url, message_text } if blank(profile_url) || blank(message_text) => {
                Err(AppError::ValidationError("profileUrl and messageText must not be empty".into()))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Job {
    pub id: Uuid,
    pub account_id: Uuid,
    pub created_by_user_id: Uuid,
    pub assigned_agent_id: Option<Uuid>,
    pub job_type: String,
    pub parameters: serde_json::Value,
    pub state: String,
    pub priority: i32,
    pub earliest_execution_time: DateTime<Utc>,
    pub timeout_seconds: i32,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Job {
    pub fn state(&self) -> JobState {
        JobState::parse(&self.state)
    }

    pub fn parameters(&self) -> Result<JobParameters, serde_json::Error> {
        serde_json::from_value(self.parameters.clone())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateJob {
    pub account_id: Uuid,
    pub parameters: JobParameters,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "Utc::now")]
    pub earliest_execution_time: DateTime<Utc>,
    pub timeout_seconds: i32,
}

impl Job {
    /// `createJob` — persists in state PENDING. Audit emission is the
    /// caller's responsibility (see `dispatch::create_job`), matching the
    /// rest of the codebase's pattern of keeping model methods pure writes.
    pub async fn create(
        pool: &PgPool,
        account_id: Uuid,
        created_by_user_id: Uuid,
        parameters: &JobParameters,
        priority: i32,
        earliest_execution_time: DateTime<Utc>,
        timeout_seconds: i32,
    ) -> Result<Self, sqlx::Error> {
        let parameters_json = serde_json::to_value(parameters).unwrap();
        sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (account_id, created_by_user_id, job_type, parameters, priority, earliest_execution_time, timeout_seconds)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(account_id)
        .bind(created_by_user_id)
        .bind(parameters.job_type().as_str())
        .bind(&parameters_json)
        .bind(priority)
        .bind(earliest_execution_time)
        .bind(timeout_seconds)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_account(
        pool: &PgPool,
        account_id: Uuid,
        state_filter: Option<JobState>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        match state_filter {
            Some(state) => {
                sqlx::query_as::<_, Job>(
                    r#"
                    SELECT * FROM jobs
                    WHERE account_id = $1 AND state = $2
                    ORDER BY created_at DESC
                    LIMIT $3
                    "#,
                )
                .bind(account_id)
                .bind(state.as_str())
                .bind(limit)
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, Job>(
                    r#"
                    SELECT * FROM jobs
                    WHERE account_id = $1
                    ORDER BY created_at DESC
                    LIMIT $2
                    "#,
                )
                .bind(account_id)
                .bind(limit)
                .fetch_all(pool)
                .await
            }
        }
    }

    /// `pullJobs` step 2+3: selects up to `max_batch` PENDING, due jobs for
    /// the account ordered `(priority DESC, createdAt ASC, jobId ASC)` and
    /// atomically transitions each to ASSIGNED in one statement.
    ///
    /// The inner `SELECT ... FOR UPDATE SKIP LOCKED` is what gives the
    /// single-execution guarantee under concurrent pulls: two pullers racing
    /// for the same PENDING row each try to lock it; the loser skips it
    /// instead of blocking, so it either picks a different eligible job or
    /// returns fewer than `max_batch` — it never receives a job the winner
    /// also received.
    ///
    /// Postgres does not guarantee that `UPDATE ... RETURNING` preserves the
    /// inner subquery's `ORDER BY`, so the batch is re-sorted in Rust with
    /// `pull_order` after the fetch — the selection set is decided by SQL,
    /// the observable order by the same comparator the unit tests below
    /// check directly.
    pub async fn pull_eligible(
        pool: &PgPool,
        account_id: Uuid,
        agent_id: Uuid,
        max_batch: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut jobs = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET state = 'ASSIGNED', assigned_agent_id = $2, assigned_at = NOW()
            WHERE id IN (
                SELECT id FROM jobs
                WHERE account_id = $1
                  AND state = 'PENDING'
                  AND earliest_execution_time <= NOW()
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(account_id)
        .bind(agent_id)
        .bind(max_batch)
        .fetch_all(pool)
        .await?;

        jobs.sort_by(pull_order);
        Ok(jobs)
    }

    /// `recordEvent(ACTION_STARTED)`: ASSIGNED -> EXECUTING, only for the
    /// assigned agent. Returns `None` if the job is not currently ASSIGNED
    /// to `agent_id` (illegal transition or ownership mismatch — the caller
    /// distinguishes the two by re-reading the job).
    pub async fn transition_to_executing(
        pool: &PgPool,
        job_id: Uuid,
        agent_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET state = 'EXECUTING', started_at = NOW()
            WHERE id = $1 AND assigned_agent_id = $2 AND state = 'ASSIGNED'
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(agent_id)
        .fetch_optional(pool)
        .await
    }

    /// How many jobs of `job_type` have been assigned to `account_id` since
    /// `since` — feeds `RiskOracle::check_rate_limit` (Open Question iv):
    /// a `RateLimitRule` counts actual occurrences of its action type, not
    /// prior violations of it.
    pub async fn count_assigned_since(
        pool: &PgPool,
        account_id: Uuid,
        job_type: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE account_id = $1 AND job_type = $2 AND assigned_at IS NOT NULL AND assigned_at > $3
            "#,
        )
        .bind(account_id)
        .bind(job_type)
        .bind(since)
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    /// Jobs stuck past `startedAt + timeoutSeconds + grace` (§4.4 optional
    /// reaper backstop).
    pub async fn find_stuck(pool: &PgPool, grace_seconds: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM jobs
            WHERE state = 'EXECUTING'
              AND started_at IS NOT NULL
              AND started_at + (timeout_seconds || ' seconds')::interval + ($1 || ' seconds')::interval < NOW()
            "#,
        )
        .bind(grace_seconds)
        .fetch_all(pool)
        .await
    }
}

/// `pullJobs` eligibility ordering (§4.4, §8): higher `priority` first;
/// ties broken by older `createdAt`; remaining ties broken by `jobId` lex
/// order. Mirrors `pull_eligible`'s SQL `ORDER BY` exactly so a regression
/// in either place is caught by comparing the two, not just by eyeballing
/// a query string.
pub fn pull_order(a: &Job, b: &Job) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with(priority: i32, created_at: DateTime<Utc>, id: Uuid) -> Job {
        Job {
            id,
            account_id: Uuid::new_v4(),
            created_by_user_id: Uuid::new_v4(),
            assigned_agent_id: None,
            job_type: JobType::VisitProfile.as_str().to_string(),
            parameters: serde_json::json!({}),
            state: JobState::Pending.as_str().to_string(),
            priority,
            earliest_execution_time: created_at,
            timeout_seconds: 60,
            created_at,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            failure_reason: None,
        }
    }

    #[test]
    fn pull_order_ranks_higher_priority_first() {
        let t = Utc::now();
        let low = job_with(1, t, Uuid::new_v4());
        let high = job_with(5, t, Uuid::new_v4());
        assert_eq!(pull_order(&high, &low), std::cmp::Ordering::Less);
        assert_eq!(pull_order(&low, &high), std::cmp::Ordering::Greater);
    }

    #[test]
    fn pull_order_breaks_equal_priority_ties_by_older_created_at() {
        let older = job_with(3, Utc::now() - chrono::Duration::seconds(10), Uuid::new_v4());
        let newer = job_with(3, Utc::now(), Uuid::new_v4());
        assert_eq!(pull_order(&older, &newer), std::cmp::Ordering::Less);
        assert_eq!(pull_order(&newer, &older), std::cmp::Ordering::Greater);
    }

    #[test]
    fn pull_order_breaks_remaining_ties_by_job_id_lex_order() {
        let t = Utc::now();
        let a = job_with(3, t, Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap());
        let b = job_with(3, t, Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap());
        assert_eq!(pull_order(&a, &b), std::cmp::Ordering::Less);
        assert_eq!(pull_order(&b, &a), std::cmp::Ordering::Greater);
    }

    #[test]
    fn pull_order_sorts_a_mixed_batch_into_priority_then_age_then_id() {
        let t0 = Utc::now() - chrono::Duration::seconds(20);
        let t1 = Utc::now() - chrono::Duration::seconds(10);
        let id_a = Uuid::parse_str("00000000-0000-0000-0000-00000000000a").unwrap();
        let id_b = Uuid::parse_str("00000000-0000-0000-0000-00000000000b").unwrap();

        let hi_old = job_with(5, t0, id_a);
        let hi_new = job_with(5, t1, id_b);
        let lo = job_with(1, t0, Uuid::new_v4());

        let mut batch = vec![lo.clone(), hi_new.clone(), hi_old.clone()];
        batch.sort_by(pull_order);

        let ids: Vec<Uuid> = batch.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![hi_old.id, hi_new.id, lo.id]);
    }

    #[test]
    fn job_state_parse_round_trips_and_defaults_unknown_to_pending() {
        for state in [
            JobState::Pending,
            JobState::Assigned,
            JobState::Executing,
            JobState::Completed,
            JobState::Failed,
            JobState::Skipped,
        ] {
            assert_eq!(JobState::parse(state.as_str()), state);
        }
        assert_eq!(JobState::parse("not-a-state"), JobState::Pending);
    }

    #[test]
    fn only_the_three_outcome_states_are_terminal() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Assigned.is_terminal());
        assert!(!JobState::Executing.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Skipped.is_terminal());
    }

    #[test]
    fn job_type_matches_its_parameters_variant() {
        let params = JobParameters::LikePost { post_url: "https://example.com/p/1".into() };
        assert_eq!(params.job_type(), JobType::LikePost);
        assert_eq!(params.job_type().as_str(), "LIKE_POST");
    }

    #[test]
    fn blank_required_fields_fail_validation() {
        let params = JobParameters::VisitProfile { profile_url: "   ".into() };
        assert!(params.validate().is_err());
    }

    #[test]
    fn comment_post_requires_both_fields() {
        let missing_message = JobParameters::CommentPost {
            post_url: "https://example.com/p/1".into(),
            message_text: "".into(),
        };
        assert!(missing_message.validate().is_err());

        let ok = JobParameters::CommentPost {
            post_url: "https://example.com/p/1".into(),
            message_text: "nice post".into(),
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn send_connection_request_note_text_is_optional() {
        let params = JobParameters::SendConnectionRequest {
            profile_url: "https://example.com/in/1".into(),
            note_text: None,
        };
        assert!(params.validate().is_ok());
    }

    #[test]
    fn job_parameters_serialize_with_a_type_tag() {
        let params = JobParameters::LikePost { post_url: "https://example.com/p/1".into() };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["type"], "LIKE_POST");
        assert_eq!(value["post_url"], "https://example.com/p/1");
    }
}
