//! Account Registry control-plane handlers (§4.1, §6).

use axum::{extract::State, Json};
use serde::Deserialize;
use validator::Validate;

use crate::{AppState, AppError, AppResult};
use crate::middleware::auth::UserContext;
use crate::models::account::{Account, CreateAccount};

/// `createAccount(userId, profileUrl, displayName)` — rejects if the user
/// already has an account via the `user_id` unique constraint.
pub async fn create(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<CreateAccount>,
) -> AppResult<Json<Account>> {
    req.validate().map_err(|e| AppError::ValidationError(e.to_string()))?;

    if Account::get_by_user_id(&state.pool, user.user_id).await?.is_some() {
        return Err(AppError::AlreadyExists("user already has an account".into()));
    }

    let account = Account::create(&state.pool, user.user_id, req).await?;
    Ok(Json(account))
}

/// `GET /api/v1/accounts/me`
pub async fn get_mine(
    State(state): State<AppState>,
    user: UserContext,
) -> AppResult<Json<Account>> {
    let account = Account::get_by_user_id(&state.pool, user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("account not found".into()))?;
    Ok(Json(account))
}

#[derive(Debug, Deserialize)]
pub struct SetPausedRequest {
    pub paused: bool,
}

/// Open Question ii, resolved: an explicit `userPaused` flag the owning
/// user can flip directly, consulted by `oracle::is_execution_allowed`.
pub async fn set_paused(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<SetPausedRequest>,
) -> AppResult<Json<Account>> {
    let account = Account::get_by_user_id(&state.pool, user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("account not found".into()))?;

    let updated = Account::set_user_paused(&state.pool, account.id, req.paused)
        .await?
        .ok_or_else(|| AppError::NotFound("account not found".into()))?;

    Ok(Json(updated))
}

/// Helper shared by the jobs/risk handlers: resolves the caller's own
/// account or rejects with `FORBIDDEN` if the requested account isn't
/// theirs. Control-plane callers only ever see their own account's data —
/// there is no cross-account read in this surface.
pub async fn owned_account(
    state: &AppState,
    user: &UserContext,
    account_id: uuid::Uuid,
) -> AppResult<Account> {
    let account = Account::get_by_id(&state.pool, account_id)
        .await?
        .ok_or_else(|| AppError::NotFound("account not found".into()))?;

    if account.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    Ok(account)
}
