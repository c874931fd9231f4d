// ABOUTME: Route handlers for /psql/{begin,query,commit,rollback}
// ABOUTME: Thin bindings from HTTP bodies to the query router
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Transaction and query endpoints.
//!
//! Handlers stay thin: parse, hand to the [`QueryRouter`], render. Forwarded
//! replies keep the remote status and body byte-for-byte so a client cannot
//! tell which replica answered.
//!
//! [`QueryRouter`]: crate::router::QueryRouter

use crate::errors::AppError;
use crate::router::RouterOutcome;
use crate::server::GatewayState;
use crate::sql::QueryRequest;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Body of `/psql/begin`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BeginRequest {
    /// Transaction TTL in seconds; the default applies when absent
    #[serde(rename = "timeoutSec", default)]
    pub timeout_sec: Option<u64>,
}

/// Reply of `/psql/begin`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginResponse {
    /// Opaque transaction id to carry on follow-up requests
    #[serde(rename = "TxID")]
    pub tx_id: String,
}

/// Body of `/psql/commit` and `/psql/rollback`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishRequest {
    /// Transaction id from `/psql/begin`
    #[serde(rename = "TxID")]
    pub tx_id: String,
}

// Malformed bodies are a client error, not a framework concern; decode by
// hand so every validation failure maps to 400.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|err| AppError::invalid_input(err.to_string()))
}

/// Open a transaction pinned to this replica
pub async fn handle_begin(
    State(state): State<Arc<GatewayState>>,
    body: Bytes,
) -> Result<Response, AppError> {
    let body: BeginRequest = if body.is_empty() {
        BeginRequest::default()
    } else {
        parse_body(&body)?
    };
    let ttl = body.timeout_sec.map(Duration::from_secs);
    let tx_id = state.router.begin(ttl).await?;
    Ok((StatusCode::OK, Json(BeginResponse { tx_id })).into_response())
}

/// Run a batch of statements, routed by transaction ownership
pub async fn handle_query(
    State(state): State<Arc<GatewayState>>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: QueryRequest = parse_body(&body)?;
    let outcome = state.router.run_queries(&request).await?;
    render(outcome)
}

/// Commit a transaction, wherever it lives
pub async fn handle_commit(
    State(state): State<Arc<GatewayState>>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: FinishRequest = parse_body(&body)?;
    let outcome = state.router.commit(&request.tx_id).await?;
    render(outcome)
}

/// Roll a transaction back, wherever it lives
pub async fn handle_rollback(
    State(state): State<Arc<GatewayState>>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: FinishRequest = parse_body(&body)?;
    let outcome = state.router.rollback(&request.tx_id).await?;
    render(outcome)
}

fn render(outcome: RouterOutcome) -> Result<Response, AppError> {
    match outcome {
        RouterOutcome::Executed(response) => Ok((StatusCode::OK, Json(response)).into_response()),
        RouterOutcome::Done => Ok(StatusCode::OK.into_response()),
        RouterOutcome::Forwarded { status, body } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            Response::builder()
                .status(status)
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .map_err(|err| AppError::internal(format!("error relaying reply: {err}")))
        }
    }
}
