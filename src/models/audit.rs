//! Audit Sink model — append-only event log.
//!
//! Never authoritative: nothing reads the audit log to decide behavior, it
//! exists purely for operators and post-hoc review. Writers across every
//! other subsystem call `AuditEntry::append`; nothing else touches this
//! table.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    User,
    Agent,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Agent => "AGENT",
            Self::System => "SYSTEM",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub domain: String,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub actor_type: String,
    pub actor_id: Option<String>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub async fn append(
        pool: &PgPool,
        domain: &str,
        event_type: &str,
        entity_type: &str,
        entity_id: Uuid,
        actor_type: ActorType,
        actor_id: Option<Uuid>,
        payload: serde_json::Value,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, AuditEntry>(
            r#"
            INSERT INTO audit_log (domain, event_type, entity_type, entity_id, actor_type, actor_id, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(domain)
        .bind(event_type)
        .bind(entity_type)
        .bind(entity_id.to_string())
        .bind(actor_type.as_str())
        .bind(actor_id.map(|id| id.to_string()))
        .bind(payload)
        .fetch_one(pool)
        .await
    }

    pub async fn query_by_entity(
        pool: &PgPool,
        entity_type: &str,
        entity_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT * FROM audit_log
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY timestamp DESC
            LIMIT $3
            "#,
        )
        .bind(entity_type)
        .bind(entity_id.to_string())
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn query_by_domain(
        pool: &PgPool,
        domain: &str,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT * FROM audit_log
            WHERE domain = $1
            ORDER BY timestamp DESC
            LIMIT $2
            "#,
        )
        .bind(domain)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
