//! Risk Oracle control-plane handlers (§4.3, §6) — read-only projections
//! over Violation/RiskScore plus the one mutation the dashboard is allowed:
//! acknowledging a violation.

use axum::{extract::{State, Query}, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, AppError, AppResult};
use crate::middleware::auth::UserContext;
use crate::models::risk::{RateLimitRule, RiskScore, Violation};
use crate::handlers::accounts::owned_account;
use crate::oracle;

#[derive(Debug, Deserialize)]
pub struct AccountQuery {
    pub account_id: Uuid,
}

/// `GET /api/v1/risk/score?accountId=…`
pub async fn get_score(
    State(state): State<AppState>,
    user: UserContext,
    Query(q): Query<AccountQuery>,
) -> AppResult<Json<RiskScore>> {
    owned_account(&state, &user, q.account_id).await?;
    let score = oracle::current_or_compute(&state.pool, q.account_id).await?;
    Ok(Json(score))
}

/// `GET /api/v1/violations?accountId=…` — all violations for the account,
/// resolved or not, regardless of the 7-day risk-scoring window.
pub async fn list_violations(
    State(state): State<AppState>,
    user: UserContext,
    Query(q): Query<AccountQuery>,
) -> AppResult<Json<Vec<Violation>>> {
    owned_account(&state, &user, q.account_id).await?;
    let violations = Violation::find_by_account(&state.pool, q.account_id).await?;
    Ok(Json(violations))
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub violation_id: Uuid,
}

/// `POST /api/v1/risk/acknowledge` (§6): marks a Violation `resolvedAt` and
/// recomputes the account's risk score so the dashboard reflects the
/// acknowledgement immediately rather than on the next scheduled read.
pub async fn acknowledge(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<AcknowledgeRequest>,
) -> AppResult<Json<RiskScore>> {
    let violation = Violation::acknowledge(&state.pool, req.violation_id)
        .await?
        .ok_or_else(|| AppError::NotFound("violation not found".into()))?;

    owned_account(&state, &user, violation.account_id).await?;

    let score = oracle::recalculate_and_persist(&state.pool, violation.account_id).await?;
    Ok(Json(score))
}

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub action_type: String,
    pub max_count: i32,
    pub window_duration_seconds: i32,
}

/// `createRule` (§4.3): rate-limit rules are global policy, not scoped to a
/// single account, so any authenticated control-plane caller may define one
/// — there is no per-tenant admin boundary in this core.
pub async fn create_rule(
    State(state): State<AppState>,
    _user: UserContext,
    Json(req): Json<CreateRuleRequest>,
) -> AppResult<Json<RateLimitRule>> {
    if req.action_type.trim().is_empty() || req.max_count <= 0 || req.window_duration_seconds <= 0 {
        return Err(AppError::ValidationError(
            "actionType must be non-empty and maxCount/windowDurationSeconds must be positive".into(),
        ));
    }

    let rule = RateLimitRule::create(
        &state.pool,
        &req.action_type,
        req.max_count,
        req.window_duration_seconds,
    )
    .await?;
    Ok(Json(rule))
}

#[derive(Debug, Deserialize)]
pub struct ListRulesQuery {
    #[serde(default)]
    pub action_type: Option<String>,
}

/// `listActiveRules(actionType?)` (§4.3).
pub async fn list_rules(
    State(state): State<AppState>,
    _user: UserContext,
    Query(q): Query<ListRulesQuery>,
) -> AppResult<Json<Vec<RateLimitRule>>> {
    let rules = match q.action_type {
        Some(action_type) => RateLimitRule::find_active_for_action(&state.pool, &action_type).await?,
        None => RateLimitRule::list_active(&state.pool).await?,
    };
    Ok(Json(rules))
}

/// `query(filters, limit)` (§4.5): read-only Audit Sink projection, scoped
/// to a single entity since the core exposes no unscoped/global audit read.
#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub entity_type: String,
    pub entity_id: Uuid,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn list_audit_entries(
    State(state): State<AppState>,
    _user: UserContext,
    Query(q): Query<AuditQuery>,
) -> AppResult<Json<Vec<crate::models::audit::AuditEntry>>> {
    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let entries =
        crate::models::audit::AuditEntry::query_by_entity(&state.pool, &q.entity_type, q.entity_id, limit)
            .await?;
    Ok(Json(entries))
}
