// ABOUTME: End-to-end tests for the query router against a live backend
// ABOUTME: Skips (with a log line) when PG_DSN is not set
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Query router scenarios against a real PostgreSQL-compatible backend.
//!
//! Run with `PG_DSN=postgres://... cargo test`; every test is a no-op
//! without a backend so the suite stays green in unit-only environments.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use serde_json::json;
use sqlgateway::config::GatewayConfig;
use sqlgateway::router::RouterOutcome;
use sqlgateway::server::GatewayState;
use sqlgateway::sql::{QueryReq, QueryRequest};
use sqlgateway::txn::sweeper;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn test_config(pool_conns: u32) -> Option<GatewayConfig> {
    let Ok(pg_dsn) = std::env::var("PG_DSN") else {
        eprintln!("PG_DSN not set, skipping backend test");
        return None;
    };
    Some(GatewayConfig {
        pg_dsn,
        pg_pool_conns: pool_conns,
        redis_addr: None,
        redis_password: None,
        redis_pool_conns: 2,
        namespace: "sqlgateway-test".to_owned(),
        pod_name: "test-pod".to_owned(),
        pod_base_domain: None,
        pod_url: None,
        pod_https: false,
        http_port: 0,
        auth_user: None,
        auth_pass: None,
        shutdown_sleep_sec: 0,
        traces: false,
    })
}

async fn test_state(pool_conns: u32) -> Option<Arc<GatewayState>> {
    let config = test_config(pool_conns)?;
    Some(
        GatewayState::initialize(config)
            .await
            .expect("backend must be reachable when PG_DSN is set"),
    )
}

fn statement(text: &str) -> QueryReq {
    QueryReq {
        statement: text.to_owned(),
        params: Vec::new(),
        exec: None,
        ignore_cache: None,
        force_cache: None,
    }
}

fn batch(statements: &[&str]) -> QueryRequest {
    QueryRequest {
        queries: statements.iter().map(|s| statement(s)).collect(),
        tx_id: None,
    }
}

fn executed(outcome: RouterOutcome) -> sqlgateway::sql::QueryResponse {
    match outcome {
        RouterOutcome::Executed(response) => response,
        _ => panic!("expected an executed response"),
    }
}

#[tokio::test]
async fn test_ad_hoc_single_select() {
    let Some(state) = test_state(2).await else { return };

    let response = executed(state.router.run_queries(&batch(&["SELECT 1"])).await.unwrap());
    assert_eq!(response.queries.len(), 1);

    let res = response.queries[0].as_ref().unwrap();
    assert!(res.error.is_none());
    assert_eq!(res.columns, Some(vec![vec![json!("?column?")]]));
    assert_eq!(res.rows, Some(vec![vec![json!(1)]]));
    assert!(res.time_ns > 0);
}

#[tokio::test]
async fn test_ad_hoc_params_round_trip() {
    let Some(state) = test_state(2).await else { return };

    let request = QueryRequest {
        queries: vec![QueryReq {
            statement: "SELECT $1::int AS n, $2::text AS s, $3::bool AS b".to_owned(),
            params: vec![json!(42), json!("hello"), json!(true)],
            exec: None,
            ignore_cache: None,
            force_cache: None,
        }],
        tx_id: None,
    };
    let response = executed(state.router.run_queries(&request).await.unwrap());
    let res = response.queries[0].as_ref().unwrap();
    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    assert_eq!(
        res.columns,
        Some(vec![vec![json!("n"), json!("s"), json!("b")]])
    );
    assert_eq!(
        res.rows,
        Some(vec![vec![json!(42), json!("hello"), json!(true)]])
    );
}

#[tokio::test]
async fn test_ad_hoc_batch_rolls_back_on_mid_failure() {
    let Some(state) = test_state(2).await else { return };
    let table = format!("t_{}", uuid_suffix());

    let request = batch(&[
        &format!("CREATE TABLE {table} (x INT)"),
        &format!("INSERT INTO {table} (x) VALUES ('a')"),
    ]);
    let response = executed(state.router.run_queries(&request).await.unwrap());
    assert_eq!(response.queries.len(), 2);
    assert!(response.queries[0].as_ref().unwrap().error.is_none());
    assert!(response.queries[1].as_ref().unwrap().error.is_some());

    // The batch transaction rolled back, so the table never existed
    let check = executed(
        state
            .router
            .run_queries(&batch(&[&format!("SELECT * FROM {table}")]))
            .await
            .unwrap(),
    );
    let err = check.queries[0].as_ref().unwrap().error.as_deref().unwrap();
    assert!(err.contains("does not exist"), "unexpected error: {err}");
}

#[tokio::test]
async fn test_batch_response_aligns_with_request() {
    let Some(state) = test_state(2).await else { return };

    let request = batch(&["SELECT 1", "SELECT nonsense_column", "SELECT 3"]);
    let response = executed(state.router.run_queries(&request).await.unwrap());
    assert_eq!(response.queries.len(), 3);
    assert!(response.queries[0].as_ref().unwrap().error.is_none());
    assert!(response.queries[1].as_ref().unwrap().error.is_some());
    assert!(response.queries[2].is_none());
}

#[tokio::test]
async fn test_pinned_transaction_happy_path() {
    let Some(state) = test_state(2).await else { return };

    let tx_id = state.router.begin(None).await.unwrap();
    assert!(tx_id.starts_with("tx_"));

    let mut request = batch(&["SELECT 1"]);
    request.tx_id = Some(tx_id.clone());
    let response = executed(state.router.run_queries(&request).await.unwrap());
    assert_eq!(
        response.queries[0].as_ref().unwrap().rows,
        Some(vec![vec![json!(1)]])
    );

    assert!(matches!(
        state.router.commit(&tx_id).await.unwrap(),
        RouterOutcome::Done
    ));

    // Idempotence: a second commit observes TxNotFound
    let err = state.router.commit(&tx_id).await.unwrap_err();
    assert_eq!(err.code, sqlgateway::errors::ErrorCode::TxNotFound);
}

#[tokio::test]
async fn test_pinned_rollback_reverts_effects() {
    let Some(state) = test_state(2).await else { return };
    let table = format!("t_{}", uuid_suffix());

    let tx_id = state.router.begin(None).await.unwrap();
    let mut request = batch(&[&format!("CREATE TABLE {table} (x INT)")]);
    request.tx_id = Some(tx_id.clone());
    let response = executed(state.router.run_queries(&request).await.unwrap());
    assert!(response.queries[0].as_ref().unwrap().error.is_none());

    assert!(matches!(
        state.router.rollback(&tx_id).await.unwrap(),
        RouterOutcome::Done
    ));

    let check = executed(
        state
            .router
            .run_queries(&batch(&[&format!("SELECT * FROM {table}")]))
            .await
            .unwrap(),
    );
    assert!(check.queries[0].as_ref().unwrap().error.is_some());
}

#[tokio::test]
async fn test_pinned_statement_failure_aborts_transaction() {
    let Some(state) = test_state(2).await else { return };

    let tx_id = state.router.begin(None).await.unwrap();
    let mut request = batch(&["SELECT nonsense_column"]);
    request.tx_id = Some(tx_id.clone());

    let response = executed(state.router.run_queries(&request).await.unwrap());
    assert!(response.queries[0].as_ref().unwrap().error.is_some());

    // The abort rolled the transaction back and released it
    let err = state.router.commit(&tx_id).await.unwrap_err();
    assert_eq!(err.code, sqlgateway::errors::ErrorCode::TxNotFound);
}

#[tokio::test]
async fn test_unknown_tx_id_is_not_found() {
    let Some(state) = test_state(2).await else { return };

    let mut request = batch(&["SELECT 1"]);
    request.tx_id = Some("tx_doesnotexist".to_owned());
    let err = state.router.run_queries(&request).await.unwrap_err();
    assert_eq!(err.code, sqlgateway::errors::ErrorCode::TxNotFound);
}

#[tokio::test]
async fn test_expired_transaction_is_swept() {
    let Some(state) = test_state(2).await else { return };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = sweeper::spawn(Arc::clone(&state.registry), shutdown_rx);

    let tx_id = state
        .router
        .begin(Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(state.registry.open_transactions(), 1);

    tokio::time::sleep(Duration::from_millis(3500)).await;

    let mut request = batch(&["SELECT 1"]);
    request.tx_id = Some(tx_id.clone());
    let err = state.router.run_queries(&request).await.unwrap_err();
    assert_eq!(err.code, sqlgateway::errors::ErrorCode::TxNotFound);
    assert_eq!(state.registry.open_transactions(), 0);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_begin_times_out_under_pool_pressure() {
    let Some(state) = test_state(1).await else { return };

    // The single pooled session is pinned by the first transaction
    let holder = state.router.begin(None).await.unwrap();

    let started = std::time::Instant::now();
    let err = state.router.begin(None).await.unwrap_err();
    assert_eq!(err.code, sqlgateway::errors::ErrorCode::PoolAcquireTimeout);
    assert!(started.elapsed() >= Duration::from_secs(9));

    state.router.rollback(&holder).await.unwrap();
}

#[tokio::test]
async fn test_exec_only_statement_returns_no_columns() {
    let Some(state) = test_state(2).await else { return };
    let table = format!("t_{}", uuid_suffix());

    let request = QueryRequest {
        queries: vec![QueryReq {
            statement: format!("CREATE TABLE {table} (x INT)"),
            params: Vec::new(),
            exec: Some(true),
            ignore_cache: None,
            force_cache: None,
        }],
        tx_id: None,
    };
    let response = executed(state.router.run_queries(&request).await.unwrap());
    let res = response.queries[0].as_ref().unwrap();
    assert!(res.error.is_none());
    assert!(res.columns.is_none());
    assert!(res.rows.is_none());
    assert!(res.time_ns > 0);

    // Single-statement ad-hoc requests are not transactional, so clean up
    let cleanup = QueryRequest {
        queries: vec![QueryReq {
            statement: format!("DROP TABLE {table}"),
            params: Vec::new(),
            exec: Some(true),
            ignore_cache: None,
            force_cache: None,
        }],
        tx_id: None,
    };
    let response = executed(state.router.run_queries(&cleanup).await.unwrap());
    assert!(response.queries[0].as_ref().unwrap().error.is_none());
}

fn uuid_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_owned()
}
