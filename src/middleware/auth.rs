//! Authentication middleware — splits the control plane (user JWT) from the
//! agent/execution plane (agent bearer token), per §3/§6.

use axum::{
    extract::{State, Request},
    middleware::Next,
    response::Response,
    http::header::AUTHORIZATION,
};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, DecodingKey, Validation};
use uuid::Uuid;

use crate::{AppState, AppError};
use crate::handlers::auth::Claims;
use crate::models::agent_token::AgentToken;

/// User identity extracted from a control-plane JWT.
#[derive(Debug, Clone, Copy)]
pub struct UserContext {
    pub user_id: Uuid,
}

/// Agent identity extracted from a validated agent bearer token. Carries
/// both ids so handlers never need a second lookup just to scope a query to
/// the agent's own account.
#[derive(Debug, Clone, Copy)]
pub struct AgentContext {
    pub agent_id: Uuid,
    pub account_id: Uuid,
}

/// Middleware: require user JWT authentication (control plane).
pub async fn require_user_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(&req)?;

    let token_data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::TokenInvalid)?;

    let user_id = Uuid::parse_str(&token_data.claims.sub).map_err(|_| AppError::TokenInvalid)?;

    req.extensions_mut().insert(UserContext { user_id });

    Ok(next.run(req).await)
}

/// Middleware: require agent bearer token authentication (execution plane).
pub async fn require_agent_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(&req)?;

    let record = AgentToken::validate(&state.pool, &token)
        .await?
        .ok_or(AppError::Unauthorized)?;

    req.extensions_mut().insert(AgentContext {
        agent_id: record.agent_id,
        account_id: record.account_id,
    });

    Ok(next.run(req).await)
}

fn extract_bearer_token(req: &Request) -> Result<String, AppError> {
    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or(AppError::Unauthorized)?
        .to_str()
        .map_err(|_| AppError::Unauthorized)?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or(AppError::Unauthorized)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserContext>()
            .copied()
            .ok_or(AppError::Unauthorized)
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AgentContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AgentContext>()
            .copied()
            .ok_or(AppError::Unauthorized)
    }
}
