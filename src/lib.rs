pub mod actions;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod state;
pub mod submission;
pub mod sweep;
pub mod worker;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderName, HeaderValue};
use sqlx::PgPool;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::actions::ActionTable;
use crate::config::Config;
use crate::rate_limit::SubmissionRateLimiter;
use crate::state::{AppState, SharedState};

/// Build the router with the production delivery backends.
pub fn build_app(pool: PgPool, config: Config) -> Result<(Router, SharedState), String> {
    let actions = ActionTable::from_config(&config)?;
    Ok(build_app_with_actions(pool, config, actions))
}

/// Build the router around an explicit dispatch table.
pub fn build_app_with_actions(
    pool: PgPool,
    config: Config,
    actions: ActionTable,
) -> (Router, SharedState) {
    let state: SharedState = Arc::new(AppState {
        pool,
        submission_limiter: SubmissionRateLimiter::new(config.rate_limit),
        actions,
        config,
    });

    let api = routes::api_routes().route_layer(axum::middleware::from_fn_with_state(
        state.clone(),
        auth::require_signature,
    ));

    let app = Router::new()
        .merge(api)
        .route("/health", axum::routing::get(health))
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .with_state(state.clone());

    (app, state)
}

async fn health() -> &'static str {
    "ok"
}
