// ABOUTME: Route module organization for the gateway's HTTP endpoints
// ABOUTME: Assembles the axum router with auth on /psql and an open /hc
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! HTTP route assembly.

pub mod health;
pub mod psql;

use crate::middleware::auth::require_basic_auth;
use crate::server::GatewayState;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the complete gateway router
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let psql = Router::new()
        .route("/psql/query", post(psql::handle_query))
        .route("/psql/begin", post(psql::handle_begin))
        .route("/psql/commit", post(psql::handle_commit))
        .route("/psql/rollback", post(psql::handle_rollback))
        .layer(from_fn_with_state(Arc::clone(&state), require_basic_auth))
        .with_state(Arc::clone(&state));

    Router::new()
        .route("/hc", get(health::handle_hc))
        .merge(psql)
        .layer(TraceLayer::new_for_http())
}
