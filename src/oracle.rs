//! Risk Oracle — the sole veto authority over execution (§4.3).
//!
//! `is_execution_allowed` is the one entry point both `dispatch::pull_jobs`
//! and the heartbeat/control-state handlers consult. It never mutates a
//! job; it only ever returns a verdict. Risk scoring itself is delegated to
//! the pure function in `models::risk` so the threshold logic stays
//! testable without a pool.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::account::{Account, HealthStatus, ValidationStatus};
use crate::models::risk::{calculate_risk_score, RiskLevel, RiskScore, Violation};

/// `{allowed, reason}` — the heartbeat/control-state verdict (§6). `reason`
/// is `None` only when `allowed` is true.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: Option<&'static str>,
}

impl Verdict {
    fn allowed() -> Self {
        Self { allowed: true, reason: None }
    }

    fn denied(reason: &'static str) -> Self {
        Self { allowed: false, reason: Some(reason) }
    }
}

/// `isExecutionAllowed(accountId)` (§4.3). Checked in a fixed order:
/// session validity, then risk (suspended health or CRITICAL risk
/// level), then the explicit user pause — first applicable reason wins.
pub async fn is_execution_allowed(pool: &PgPool, account_id: Uuid) -> Result<Verdict, AppError> {
    let account = match Account::get_by_id(pool, account_id).await? {
        Some(account) => account,
        None => return Ok(Verdict::denied("SESSION_INVALID")),
    };

    if matches!(
        account.validation_status(),
        ValidationStatus::Expired | ValidationStatus::Disconnected
    ) {
        return Ok(Verdict::denied("SESSION_INVALID"));
    }

    let risk = current_risk_level(pool, account_id, account.health_status()).await?;
    if account.health_status() == HealthStatus::Suspended || risk == RiskLevel::Critical {
        return Ok(Verdict::denied("RISK_PAUSE"));
    }

    if account.user_paused {
        return Ok(Verdict::denied("USER_PAUSED"));
    }

    Ok(Verdict::allowed())
}

/// Recomputes the risk level fresh from unresolved violations rather than
/// trusting a possibly-stale persisted `risk_scores` row — the veto check is
/// on the hot path for every pull/heartbeat and must reflect violations
/// recorded since the last explicit recalculation (§5 risk verdict freshness).
async fn current_risk_level(
    pool: &PgPool,
    account_id: Uuid,
    health: HealthStatus,
) -> Result<RiskLevel, AppError> {
    let violations = Violation::find_unresolved_in_window(pool, account_id).await?;
    let computed = calculate_risk_score(&violations, health);
    Ok(computed.level)
}

/// `calculateRiskScore(accountId)`: recomputes and persists a new
/// `risk_scores` row, returning it.
pub async fn recalculate_and_persist(
    pool: &PgPool,
    account_id: Uuid,
) -> Result<RiskScore, AppError> {
    let account = Account::get_by_id(pool, account_id)
        .await?
        .ok_or_else(|| AppError::NotFound("account not found".into()))?;

    let violations = Violation::find_unresolved_in_window(pool, account_id).await?;
    let computed = calculate_risk_score(&violations, account.health_status());

    let persisted = RiskScore::persist(pool, account_id, &computed).await?;
    Ok(persisted)
}

/// Returns the most recently persisted score, computing and persisting one
/// on first access for an account with no history yet.
pub async fn current_or_compute(pool: &PgPool, account_id: Uuid) -> Result<RiskScore, AppError> {
    if let Some(existing) = RiskScore::latest_for_account(pool, account_id).await? {
        return Ok(existing);
    }
    recalculate_and_persist(pool, account_id).await
}

/// `checkRateLimit(accountId, actionType)` (Open Question iv, resolved):
/// ties `RateLimitRule` to an actual caller by counting how many jobs of the
/// rule's own action type the account has had assigned within the rule's
/// window. A rule with zero active matches never fires. Returns the first
/// exceeded rule, if any.
pub async fn check_rate_limit(
    pool: &PgPool,
    account_id: Uuid,
    action_type: &str,
) -> Result<Option<crate::models::risk::RateLimitRule>, AppError> {
    use crate::models::job::Job;
    use crate::models::risk::RateLimitRule;
    use chrono::Duration;

    let rules = RateLimitRule::find_active_for_action(pool, action_type).await?;
    for rule in rules {
        let since = chrono::Utc::now() - Duration::seconds(rule.window_duration_seconds as i64);
        let count = Job::count_assigned_since(pool, account_id, action_type, since).await?;
        if count >= rule.max_count as i64 {
            return Ok(Some(rule));
        }
    }
    Ok(None)
}

/// Checks `checkRateLimit` for `action_type` and, if exceeded, records a
/// Violation against the offending rule (§4.3 `recordViolation`). The
/// Oracle stays veto-only here too — it never blocks the assignment that
/// triggered it, only feeds the next `calculateRiskScore`/`isExecutionAllowed`
/// call. Severity scales with how far over the limit the count is.
pub async fn enforce_rate_limit(
    pool: &PgPool,
    account_id: Uuid,
    action_type: &str,
    job_id: Uuid,
) -> Result<(), AppError> {
    use crate::models::risk::Severity;

    if let Some(rule) = check_rate_limit(pool, account_id, action_type).await? {
        Violation::record(
            pool,
            account_id,
            Some(rule.id),
            Some(job_id),
            &format!("RATE_LIMIT_EXCEEDED:{}", action_type),
            Severity::Medium,
        )
        .await?;
    }
    Ok(())
}
