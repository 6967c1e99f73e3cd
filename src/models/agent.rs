//! Agent model — Agent Registry.
//!
//! Binds an executing process to one account. At most one non-terminated
//! agent may exist per account at any time; the database enforces this with
//! a partial unique index on `(account_id) WHERE terminated_at IS NULL`, so
//! a concurrent second `register` either reuses the existing row (see
//! `find_live_by_account`) or collides on the index and must retry — the
//! row is never duplicated.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Registered,
    Idle,
    Active,
    Terminated,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "REGISTERED",
            Self::Idle => "IDLE",
            Self::Active => "ACTIVE",
            Self::Terminated => "TERMINATED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "IDLE" => Self::Idle,
            "ACTIVE" => Self::Active,
            "TERMINATED" => Self::Terminated,
            _ => Self::Registered,
        }
    }
}

/// Status an agent self-reports on heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportedStatus {
    Idle,
    Executing,
    Paused,
}

impl ReportedStatus {
    /// IDLE->IDLE, EXECUTING->ACTIVE, PAUSED->IDLE (§4.2).
    pub fn to_agent_state(self) -> AgentState {
        match self {
            Self::Idle => AgentState::Idle,
            Self::Executing => AgentState::Active,
            Self::Paused => AgentState::Idle,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Agent {
    pub id: Uuid,
    pub account_id: Uuid,
    pub agent_version: Option<String>,
    pub platform: Option<String>,
    pub state: String,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn state(&self) -> AgentState {
        AgentState::parse(&self.state)
    }

    pub async fn find_live_by_account(
        pool: &PgPool,
        account_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Agent>(
            "SELECT * FROM agents WHERE account_id = $1 AND terminated_at IS NULL",
        )
        .bind(account_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Creates a fresh agent row bound to `account_id`, state REGISTERED.
    /// Callers must first terminate any existing live agent for the account
    /// in the same transaction (see `AgentRegistry::register`) — this method
    /// alone does not enforce the 1:1 invariant beyond the index.
    pub async fn create<'c, E>(
        executor: E,
        account_id: Uuid,
        agent_version: Option<&str>,
        platform: Option<&str>,
    ) -> Result<Self, sqlx::Error>
    where
        E: sqlx::PgExecutor<'c>,
    {
        sqlx::query_as::<_, Agent>(
            r#"
            INSERT INTO agents (account_id, agent_version, platform, state)
            VALUES ($1, $2, $3, 'REGISTERED')
            RETURNING *
            "#,
        )
        .bind(account_id)
        .bind(agent_version)
        .bind(platform)
        .fetch_one(executor)
        .await
    }

    pub async fn terminate(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE agents SET terminated_at = NOW(), state = 'TERMINATED' WHERE id = $1 AND terminated_at IS NULL")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn update_heartbeat(
        pool: &PgPool,
        id: Uuid,
        state: AgentState,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE agents SET last_heartbeat_at = NOW(), state = $2 WHERE id = $1 AND terminated_at IS NULL",
        )
        .bind(id)
        .bind(state.as_str())
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_state_round_trips_and_defaults_unknown_to_registered() {
        for state in [AgentState::Registered, AgentState::Idle, AgentState::Active, AgentState::Terminated] {
            assert_eq!(AgentState::parse(state.as_str()), state);
        }
        assert_eq!(AgentState::parse("???"), AgentState::Registered);
    }

    #[test]
    fn reported_status_maps_to_the_expected_agent_state() {
        assert_eq!(ReportedStatus::Idle.to_agent_state(), AgentState::Idle);
        assert_eq!(ReportedStatus::Executing.to_agent_state(), AgentState::Active);
        assert_eq!(ReportedStatus::Paused.to_agent_state(), AgentState::Idle);
    }
}
