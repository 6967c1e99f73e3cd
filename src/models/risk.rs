//! Risk Oracle models — rate limit rules, violations, and computed scores.
//!
//! The Oracle only ever vetoes (`isExecutionAllowed`); nothing in this
//! module mutates a job. Scoring is a pure function over violations and
//! account health so it can be unit tested without a database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::account::HealthStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "MEDIUM" => Self::Medium,
            "HIGH" => Self::High,
            "CRITICAL" => Self::Critical,
            _ => Self::Low,
        }
    }

    /// Weight contributed to the risk score by one unresolved violation of
    /// this severity (§4.3).
    fn weight(self) -> f32 {
        match self {
            Self::Low => 0.1,
            Self::Medium => 0.3,
            Self::High => 0.6,
            Self::Critical => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// Bucket thresholds from §4.3: <0.3 LOW, <0.6 MEDIUM, <0.8 HIGH, else CRITICAL.
    fn from_score(score: f32) -> Self {
        if score < 0.3 {
            Self::Low
        } else if score < 0.6 {
            Self::Medium
        } else if score < 0.8 {
            Self::High
        } else {
            Self::Critical
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RateLimitRule {
    pub id: Uuid,
    pub action_type: String,
    pub max_count: i32,
    pub window_duration_seconds: i32,
    pub is_active: bool,
}

impl RateLimitRule {
    pub async fn find_active_for_action(
        pool: &PgPool,
        action_type: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, RateLimitRule>(
            "SELECT * FROM rate_limit_rules WHERE action_type = $1 AND is_active = true",
        )
        .bind(action_type)
        .fetch_all(pool)
        .await
    }

    pub async fn list_active(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, RateLimitRule>("SELECT * FROM rate_limit_rules WHERE is_active = true")
            .fetch_all(pool)
            .await
    }

    /// `createRule` (§4.3).
    pub async fn create(
        pool: &PgPool,
        action_type: &str,
        max_count: i32,
        window_duration_seconds: i32,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, RateLimitRule>(
            r#"
            INSERT INTO rate_limit_rules (action_type, max_count, window_duration_seconds)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(action_type)
        .bind(max_count)
        .bind(window_duration_seconds)
        .fetch_one(pool)
        .await
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Violation {
    pub id: Uuid,
    pub account_id: Uuid,
    pub rule_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub violation_type: String,
    pub severity: String,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Violation {
    pub fn severity(&self) -> Severity {
        Severity::parse(&self.severity)
    }

    pub async fn record(
        pool: &PgPool,
        account_id: Uuid,
        rule_id: Option<Uuid>,
        job_id: Option<Uuid>,
        violation_type: &str,
        severity: Severity,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Violation>(
            r#"
            INSERT INTO violations (account_id, rule_id, job_id, violation_type, severity)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(account_id)
        .bind(rule_id)
        .bind(job_id)
        .bind(violation_type)
        .bind(severity.as_str())
        .fetch_one(pool)
        .await
    }

    /// Unresolved violations within the 7-day scoring window (§4.3) — feeds
    /// `calculate_risk_score` only, not the dashboard's violation listing.
    pub async fn find_unresolved_in_window(
        pool: &PgPool,
        account_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Violation>(
            r#"
            SELECT * FROM violations
            WHERE account_id = $1
              AND resolved_at IS NULL
              AND detected_at > NOW() - INTERVAL '7 days'
            "#,
        )
        .bind(account_id)
        .fetch_all(pool)
        .await
    }

    /// All violations for an account, unfiltered by resolution or age —
    /// backs `GET /api/v1/violations` (§6).
    pub async fn find_by_account(pool: &PgPool, account_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Violation>(
            "SELECT * FROM violations WHERE account_id = $1 ORDER BY detected_at DESC",
        )
        .bind(account_id)
        .fetch_all(pool)
        .await
    }

    pub async fn acknowledge(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Violation>(
            "UPDATE violations SET resolved_at = NOW() WHERE id = $1 AND resolved_at IS NULL RETURNING *",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RiskScore {
    pub id: Uuid,
    pub account_id: Uuid,
    pub score: f32,
    pub level: String,
    pub factors: serde_json::Value,
    pub calculated_at: DateTime<Utc>,
}

impl RiskScore {
    pub fn level(&self) -> RiskLevel {
        match self.level.as_str() {
            "MEDIUM" => RiskLevel::Medium,
            "HIGH" => RiskLevel::High,
            "CRITICAL" => RiskLevel::Critical,
            _ => RiskLevel::Low,
        }
    }

    pub async fn latest_for_account(
        pool: &PgPool,
        account_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, RiskScore>(
            "SELECT * FROM risk_scores WHERE account_id = $1 ORDER BY calculated_at DESC LIMIT 1",
        )
        .bind(account_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn persist(
        pool: &PgPool,
        account_id: Uuid,
        computed: &ComputedRisk,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, RiskScore>(
            r#"
            INSERT INTO risk_scores (account_id, score, level, factors)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(account_id)
        .bind(computed.score)
        .bind(computed.level.as_str())
        .bind(&computed.factors)
        .fetch_one(pool)
        .await
    }
}

/// Result of `calculate_risk_score`, not yet persisted.
pub struct ComputedRisk {
    pub score: f32,
    pub level: RiskLevel,
    pub factors: serde_json::Value,
}

/// Pure scoring function (§4.3): sums severity weights over unresolved
/// violations in the 7-day window, adds a fixed penalty for SUSPENDED or
/// DEGRADED account health, clamps to `[0, 1]`, then buckets into a level.
pub fn calculate_risk_score(violations: &[Violation], health: HealthStatus) -> ComputedRisk {
    let violation_weight: f32 = violations.iter().map(|v| v.severity().weight()).sum();

    let health_penalty = match health {
        HealthStatus::Suspended => 0.5,
        HealthStatus::Degraded => 0.2,
        HealthStatus::Healthy => 0.0,
    };

    let score = (violation_weight + health_penalty).clamp(0.0, 1.0);
    let level = RiskLevel::from_score(score);

    let factors = serde_json::json!({
        "violationCount": violations.len(),
        "violationWeight": violation_weight,
        "healthPenalty": health_penalty,
        "health": health.as_str(),
    });

    ComputedRisk { score, level, factors }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(severity: Severity) -> Violation {
        Violation {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            rule_id: None,
            job_id: None,
            violation_type: "TEST".into(),
            severity: severity.as_str().into(),
            detected_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[test]
    fn no_violations_and_healthy_account_is_low_risk() {
        let computed = calculate_risk_score(&[], HealthStatus::Healthy);
        assert_eq!(computed.score, 0.0);
        assert_eq!(computed.level, RiskLevel::Low);
    }

    #[test]
    fn severity_weights_sum_and_clamp_at_one() {
        let violations = vec![
            violation(Severity::Critical),
            violation(Severity::Critical),
            violation(Severity::High),
        ];
        let computed = calculate_risk_score(&violations, HealthStatus::Healthy);
        assert_eq!(computed.score, 1.0);
        assert_eq!(computed.level, RiskLevel::Critical);
    }

    #[test]
    fn suspended_health_plus_medium_violation_crosses_into_critical() {
        let computed = calculate_risk_score(&[violation(Severity::Medium)], HealthStatus::Suspended);
        // 0.3 (medium) + 0.5 (suspended) = 0.8, which buckets to CRITICAL.
        assert_eq!(computed.score, 0.8);
        assert_eq!(computed.level, RiskLevel::Critical);
    }

    #[test]
    fn degraded_health_contributes_a_smaller_penalty() {
        let computed = calculate_risk_score(&[], HealthStatus::Degraded);
        assert_eq!(computed.score, 0.2);
        assert_eq!(computed.level, RiskLevel::Low);
    }

    #[test]
    fn risk_level_bucket_boundaries() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.29), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.3), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.59), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.6), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.79), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.8), RiskLevel::Critical);
    }

    #[test]
    fn severity_parse_round_trips_known_values_and_defaults_unknown_to_low() {
        assert_eq!(Severity::parse("HIGH"), Severity::High);
        assert_eq!(Severity::parse("bogus"), Severity::Low);
    }
}
