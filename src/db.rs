//! Database module - PostgreSQL connection and migrations

use sqlx::{postgres::PgPoolOptions, PgPool};

/// Create database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create tables if not exist
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    tracing::info!("Database schema applied successfully");
    Ok(())
}

/// Database schema SQL
const SCHEMA_SQL: &str = r#"
-- Users (Identity). Externally-authenticated principals resolve to this id;
-- the email/password pair here stands in for the upstream identity provider,
-- which is out of scope for the core.
CREATE TABLE IF NOT EXISTS users (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    email VARCHAR(255) NOT NULL UNIQUE,
    password_hash VARCHAR(255) NOT NULL,
    name VARCHAR(255),
    created_at TIMESTAMPTZ DEFAULT NOW(),
    updated_at TIMESTAMPTZ DEFAULT NOW()
);

-- Accounts (Account Registry). One per user.
CREATE TABLE IF NOT EXISTS accounts (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    user_id UUID NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
    profile_url VARCHAR(2048) NOT NULL,
    display_name VARCHAR(255),
    validation_status VARCHAR(20) NOT NULL DEFAULT 'CONNECTED',
    health_status VARCHAR(20) NOT NULL DEFAULT 'HEALTHY',
    session_valid_at TIMESTAMPTZ,
    user_paused BOOLEAN NOT NULL DEFAULT false,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ DEFAULT NOW(),
    updated_at TIMESTAMPTZ DEFAULT NOW()
);

-- Agents (Agent Registry). At most one non-terminated agent per account,
-- enforced by the partial unique index below rather than at the app layer
-- alone.
CREATE TABLE IF NOT EXISTS agents (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    agent_version VARCHAR(50),
    platform VARCHAR(50),
    state VARCHAR(20) NOT NULL DEFAULT 'REGISTERED',
    last_heartbeat_at TIMESTAMPTZ,
    registered_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    terminated_at TIMESTAMPTZ
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_agents_one_live_per_account
    ON agents(account_id) WHERE terminated_at IS NULL;

-- Agent bearer tokens. Persisted (not in-process) so validateToken survives
-- a restart; re-registration rotates by revoking the prior row in the same
-- transaction that inserts the new one.
CREATE TABLE IF NOT EXISTS agent_tokens (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    agent_id UUID NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    token_hash VARCHAR(255) NOT NULL UNIQUE,
    expires_at TIMESTAMPTZ NOT NULL,
    revoked_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_agent_tokens_agent ON agent_tokens(agent_id);

-- Jobs (Job Dispatcher). State is monotone along
-- PENDING -> ASSIGNED -> EXECUTING -> {COMPLETED|FAILED|SKIPPED}.
CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    created_by_user_id UUID NOT NULL REFERENCES users(id),
    assigned_agent_id UUID REFERENCES agents(id),
    job_type VARCHAR(40) NOT NULL,
    parameters JSONB NOT NULL,
    state VARCHAR(20) NOT NULL DEFAULT 'PENDING',
    priority INT NOT NULL DEFAULT 0,
    earliest_execution_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    timeout_seconds INT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    assigned_at TIMESTAMPTZ,
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    failure_reason VARCHAR(40)
);

-- Supports the pullJobs eligibility query: PENDING jobs for an account,
-- earliest_execution_time due, ordered (priority DESC, created_at ASC, id ASC).
CREATE INDEX IF NOT EXISTS idx_jobs_pull
    ON jobs(account_id, state, earliest_execution_time);
CREATE INDEX IF NOT EXISTS idx_jobs_account ON jobs(account_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_jobs_executing_timeout
    ON jobs(state, started_at) WHERE state = 'EXECUTING';

-- JobResults. At most one per job; its existence implies the job is terminal.
CREATE TABLE IF NOT EXISTS job_results (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    job_id UUID NOT NULL UNIQUE REFERENCES jobs(id) ON DELETE CASCADE,
    agent_id UUID NOT NULL REFERENCES agents(id),
    status VARCHAR(20) NOT NULL,
    observed_state VARCHAR(20),
    failure_reason VARCHAR(40),
    completed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Rate limit rules (Risk Oracle).
CREATE TABLE IF NOT EXISTS rate_limit_rules (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    action_type VARCHAR(40) NOT NULL,
    max_count INT NOT NULL,
    window_duration_seconds INT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT true,
    created_at TIMESTAMPTZ DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_rate_limit_rules_action
    ON rate_limit_rules(action_type) WHERE is_active = true;

-- Violations (Risk Oracle).
CREATE TABLE IF NOT EXISTS violations (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    rule_id UUID REFERENCES rate_limit_rules(id),
    job_id UUID REFERENCES jobs(id),
    violation_type VARCHAR(60) NOT NULL,
    severity VARCHAR(20) NOT NULL,
    detected_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    resolved_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_violations_account_unresolved
    ON violations(account_id, detected_at) WHERE resolved_at IS NULL;

-- RiskScores (Risk Oracle). Append-only; latest row per account is
-- authoritative.
CREATE TABLE IF NOT EXISTS risk_scores (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    score REAL NOT NULL,
    level VARCHAR(20) NOT NULL,
    factors JSONB NOT NULL DEFAULT '{}'::jsonb,
    calculated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_risk_scores_account_latest
    ON risk_scores(account_id, calculated_at DESC);

-- Audit log. Append-only; never consulted for authority.
CREATE TABLE IF NOT EXISTS audit_log (
    id BIGSERIAL PRIMARY KEY,
    domain VARCHAR(40) NOT NULL,
    event_type VARCHAR(60) NOT NULL,
    entity_type VARCHAR(40) NOT NULL,
    entity_id VARCHAR(100) NOT NULL,
    actor_type VARCHAR(20) NOT NULL,
    actor_id VARCHAR(100),
    payload JSONB NOT NULL DEFAULT '{}'::jsonb,
    timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_log(entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_audit_domain_time ON audit_log(domain, timestamp DESC);
"#;
