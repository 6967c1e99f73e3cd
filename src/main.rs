//! dispatch-core — two-plane job dispatch and execution-control service.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       DISPATCH CORE                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌───────────┐  ┌─────────────────────────┐  │
//! │  │  Control  │  │  Agent    │  │  Risk Oracle +          │  │
//! │  │  Plane    │  │  Plane    │  │  Job Dispatcher         │  │
//! │  │  (user    │  │  (agent   │  │  (cross-subsystem       │  │
//! │  │   JWT)    │  │   token)  │  │   coordination)         │  │
//! │  └─────┬─────┘  └─────┬─────┘  └────────────┬────────────┘  │
//! │        └──────────────┼──────────────────────┘               │
//! │                       ▼                                      │
//! │                ┌─────────────┐                               │
//! │                │ PostgreSQL  │                               │
//! │                └─────────────┘                               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod db;
mod dispatch;
mod error;
mod handlers;
mod middleware;
mod models;
mod oracle;

use axum::{
    Router,
    routing::{get, post},
    middleware as axum_middleware,
};
use tower_http::{
    cors::{CorsLayer, Any},
    trace::TraceLayer,
    compression::CompressionLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use std::net::SocketAddr;
use std::time::Duration;

pub use error::{AppError, AppResult};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "dispatch_core=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = config::Config::from_env();

    tracing::info!("dispatch-core starting...");
    tracing::info!("environment: {}", config.environment);

    let pool = db::create_pool(&config.database_url).await
        .expect("failed to create database pool");

    tracing::info!("running database migrations...");
    db::run_migrations(&pool).await
        .expect("failed to run migrations");

    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
    };

    if config.enable_background_sweeps {
        spawn_background_sweeps(pool, config.reaper_grace_seconds);
    }

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub config: config::Config,
}

fn create_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health::check))
        .route("/api/v1/auth/login", post(handlers::auth::login))
        .route("/api/v1/auth/register", post(handlers::auth::register));

    // Control plane (user JWT auth)
    let management_routes = Router::new()
        .route("/api/v1/accounts", post(handlers::accounts::create))
        .route("/api/v1/accounts/me", get(handlers::accounts::get_mine))
        .route("/api/v1/accounts/pause", post(handlers::accounts::set_paused))
        .route("/api/v1/agent/register", post(handlers::agent::register))
        .route("/api/v1/jobs", get(handlers::jobs::list))
        .route("/api/v1/jobs", post(handlers::jobs::create))
        .route("/api/v1/jobs/:id", get(handlers::jobs::get))
        .route("/api/v1/violations", get(handlers::risk::list_violations))
        .route("/api/v1/risk/score", get(handlers::risk::get_score))
        .route("/api/v1/risk/acknowledge", post(handlers::risk::acknowledge))
        .route("/api/v1/risk/rules", get(handlers::risk::list_rules))
        .route("/api/v1/risk/rules", post(handlers::risk::create_rule))
        .route("/api/v1/audit", get(handlers::risk::list_audit_entries))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_user_auth,
        ));

    // Agent / execution plane (agent bearer token auth)
    let agent_routes = Router::new()
        .route("/api/v1/agent/heartbeat", post(handlers::agent::heartbeat))
        .route("/api/v1/agent/control-state", get(handlers::agent::control_state))
        .route("/api/v1/agent/jobs", get(handlers::agent::pull_jobs))
        .route("/api/v1/agent/jobs/:job_id/result", post(handlers::agent::submit_result))
        .route("/api/v1/agent/events", post(handlers::agent::record_event))
        .route("/api/v1/agent/screenshots", post(handlers::agent::submit_screenshot))
        .route("/api/v1/agent/deregister", post(handlers::agent::deregister))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_agent_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(management_routes)
        .merge(agent_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Optional background loops (§5, §9): neither the stuck-job reaper nor the
/// token-expiry sweeper is required for correctness — both reuse the same
/// idempotent model-layer operations a request-driven call would use.
fn spawn_background_sweeps(pool: sqlx::PgPool, reaper_grace_seconds: i64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;

            match dispatch::reap_stuck_jobs(&pool, reaper_grace_seconds).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("reaper: force-completed {} stuck job(s)", n),
                Err(e) => tracing::warn!("reaper pass failed: {:?}", e),
            }

            match models::agent_token::AgentToken::sweep_expired(&pool).await {
                Ok(0) => {}
                Ok(n) => tracing::debug!("token sweeper: removed {} expired token row(s)", n),
                Err(e) => tracing::warn!("token sweeper pass failed: {:?}", e),
            }
        }
    });
}
