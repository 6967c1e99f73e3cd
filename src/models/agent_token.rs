//! AgentToken model — Agent Registry token store.
//!
//! Persisted (Postgres-backed) rather than in-process, so `validateToken`
//! survives a restart. Tokens are opaque random bytes; only the SHA-256
//! digest is stored, mirroring how the reference server hashes endpoint
//! tokens before persisting them.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AgentToken {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub account_id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A freshly-minted token: the raw bearer value (returned to the agent once)
/// plus the persisted row.
pub struct IssuedToken {
    pub raw_token: String,
    pub record: AgentToken,
}

pub fn hash_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_raw_token() -> String {
    // Two v4 UUIDs concatenated: >=128 bits of entropy per UUID, well above
    // what's needed for a bearer token, and avoids pulling in a separate
    // RNG dependency the rest of the stack doesn't already use.
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

impl AgentToken {
    /// Atomically revokes any live token for `agent_id` and issues a fresh
    /// one, in a single transaction (token rotation atomicity, §5).
    pub async fn rotate(
        pool: &PgPool,
        agent_id: Uuid,
        account_id: Uuid,
        ttl_hours: i64,
    ) -> Result<IssuedToken, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            "UPDATE agent_tokens SET revoked_at = NOW() WHERE agent_id = $1 AND revoked_at IS NULL",
        )
        .bind(agent_id)
        .execute(&mut *tx)
        .await?;

        let raw_token = generate_raw_token();
        let token_hash = hash_token(&raw_token);
        let expires_at = Utc::now() + Duration::hours(ttl_hours);

        let record = sqlx::query_as::<_, AgentToken>(
            r#"
            INSERT INTO agent_tokens (agent_id, account_id, token_hash, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(agent_id)
        .bind(account_id)
        .bind(&token_hash)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(IssuedToken { raw_token, record })
    }

    /// Pure lookup: unknown, expired, or revoked tokens all resolve to
    /// `None` — rejection reason is not distinguished on this path;
    /// `validateToken(token) -> (agentId, accountId) | ∅`.
    pub async fn validate(pool: &PgPool, raw_token: &str) -> Result<Option<Self>, sqlx::Error> {
        let token_hash = hash_token(raw_token);
        sqlx::query_as::<_, AgentToken>(
            r#"
            SELECT * FROM agent_tokens
            WHERE token_hash = $1 AND revoked_at IS NULL AND expires_at > NOW()
            "#,
        )
        .bind(&token_hash)
        .fetch_optional(pool)
        .await
    }

    /// Revokes every live token bound to `agent_id` (explicit deregistration, §4.2).
    pub async fn revoke_all_for_agent(pool: &PgPool, agent_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE agent_tokens SET revoked_at = NOW() WHERE agent_id = $1 AND revoked_at IS NULL",
        )
        .bind(agent_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn revoke_by_raw(pool: &PgPool, raw_token: &str) -> Result<bool, sqlx::Error> {
        let token_hash = hash_token(raw_token);
        let result = sqlx::query(
            "UPDATE agent_tokens SET revoked_at = NOW() WHERE token_hash = $1 AND revoked_at IS NULL",
        )
        .bind(&token_hash)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Optional sweeper (§5): deletes long-expired rows to bound table growth.
    /// Never affects `validate`'s correctness — expired rows are already
    /// excluded by the `expires_at > NOW()` predicate above.
    pub async fn sweep_expired(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM agent_tokens WHERE expires_at < NOW() - INTERVAL '7 days'",
        )
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_token_is_deterministic_and_not_the_raw_value() {
        let raw = "abc123";
        let digest = hash_token(raw);
        assert_eq!(digest, hash_token(raw));
        assert_ne!(digest, raw);
        assert_eq!(digest.len(), 64); // hex-encoded SHA-256
    }

    #[test]
    fn different_tokens_hash_differently() {
        assert_ne!(hash_token("abc123"), hash_token("abc124"));
    }

    #[test]
    fn generated_raw_tokens_are_unique() {
        let a = generate_raw_token();
        let b = generate_raw_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64); // two simple-form v4 UUIDs, 32 hex chars each
    }
}
