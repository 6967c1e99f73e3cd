//! Account model — Account Registry.
//!
//! Owns the one-to-one user<->account binding and records session-validity
//! state and health. The Registry never blocks other subsystems; Risk Oracle
//! is the consumer of `validation_status`/`health_status`/`user_paused`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Connected,
    Expired,
    Disconnected,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "CONNECTED",
            Self::Expired => "EXPIRED",
            Self::Disconnected => "DISCONNECTED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "EXPIRED" => Self::Expired,
            "DISCONNECTED" => Self::Disconnected,
            _ => Self::Connected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Suspended,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::Degraded => "DEGRADED",
            Self::Suspended => "SUSPENDED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "DEGRADED" => Self::Degraded,
            "SUSPENDED" => Self::Suspended,
            _ => Self::Healthy,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    pub profile_url: String,
    pub display_name: Option<String>,
    pub validation_status: String,
    pub health_status: String,
    pub session_valid_at: Option<DateTime<Utc>>,
    pub user_paused: bool,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn validation_status(&self) -> ValidationStatus {
        ValidationStatus::parse(&self.validation_status)
    }

    pub fn health_status(&self) -> HealthStatus {
        HealthStatus::parse(&self.health_status)
    }
}

#[derive(Debug, Deserialize, validator::Validate)]
pub struct CreateAccount {
    #[validate(url, length(min = 1, max = 2048))]
    pub profile_url: String,
    #[validate(length(max = 255))]
    pub display_name: Option<String>,
}

impl Account {
    /// `createAccount(userId, profileUrl, displayName)` — rejects if the
    /// user already has an account via the `user_id` unique constraint.
    pub async fn create(
        pool: &PgPool,
        user_id: Uuid,
        data: CreateAccount,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (user_id, profile_url, display_name, session_valid_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&data.profile_url)
        .bind(&data.display_name)
        .fetch_one(pool)
        .await
    }

    pub async fn get_by_user_id(pool: &PgPool, user_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Updates validation status. Emits an Audit boundary event when the new
    /// status is EXPIRED or DISCONNECTED — callers are responsible for the
    /// Audit append (see `dispatch::commit_result` and `handlers::agent`),
    /// this method only owns the row write.
    pub async fn update_validation_status(
        pool: &PgPool,
        id: Uuid,
        status: ValidationStatus,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            "UPDATE accounts SET validation_status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(pool)
        .await
    }

    pub async fn update_health_status(
        pool: &PgPool,
        id: Uuid,
        status: HealthStatus,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            "UPDATE accounts SET health_status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(pool)
        .await
    }

    pub async fn mark_session_valid(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET validation_status = 'CONNECTED', session_valid_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Sets the explicit `userPaused` flag (Open Question ii, resolved: the
    /// control plane can pause an account's execution directly without
    /// touching validation/health state).
    pub async fn set_user_paused(
        pool: &PgPool,
        id: Uuid,
        paused: bool,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            "UPDATE accounts SET user_paused = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(paused)
        .fetch_optional(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_status_round_trips_and_defaults_unknown_to_connected() {
        for status in [
            ValidationStatus::Connected,
            ValidationStatus::Expired,
            ValidationStatus::Disconnected,
        ] {
            assert_eq!(ValidationStatus::parse(status.as_str()), status);
        }
        assert_eq!(ValidationStatus::parse("garbage"), ValidationStatus::Connected);
    }

    #[test]
    fn health_status_round_trips_and_defaults_unknown_to_healthy() {
        for status in [HealthStatus::Healthy, HealthStatus::Degraded, HealthStatus::Suspended] {
            assert_eq!(HealthStatus::parse(status.as_str()), status);
        }
        assert_eq!(HealthStatus::parse("garbage"), HealthStatus::Healthy);
    }
}
