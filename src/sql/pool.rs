// ABOUTME: Backend connection pool plus the reliable execution wrappers
// ABOUTME: Retries transient connection errors within a deadline budget
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Backend pool and reliable execution.
//!
//! Two entry points wrap the pooled driver: [`reliable_exec`] lends one
//! session to a body closure, [`reliable_exec_in_tx`] additionally wraps the
//! body in a backend-managed transaction. Both retry known-transient
//! connection errors until the deadline budget elapses; any other error
//! surfaces to the caller, who decides about retries.

use crate::config::GatewayConfig;
use crate::errors::{AppError, AppResult};
use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Per-session budget for the reliable-exec layer; the outer request budget
/// is shorter and caps the call as a whole
pub const SESSION_BUDGET: Duration = Duration::from_secs(60);

const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Connect the backend pool using the configured sizing
///
/// # Errors
///
/// Returns an error if the DSN is malformed or the backend is unreachable.
pub async fn connect(config: &GatewayConfig) -> Result<PgPool> {
    debug!("connecting to backend...");
    let pool = PgPoolOptions::new()
        .max_connections(config.pg_pool_conns)
        .min_connections(1)
        .max_lifetime(Duration::from_secs(30 * 60))
        .idle_timeout(Duration::from_secs(30 * 60))
        .acquire_timeout(SESSION_BUDGET)
        .connect(&config.pg_dsn)
        .await
        .context("error connecting to backend pool")?;
    debug!("connected to backend");
    Ok(pool)
}

/// Verdict returned by a transactional body: keep the batch's effects or not.
/// Either way the body's computed value survives, so partial results can be
/// returned after a rollback.
pub enum TxOutcome<T> {
    /// Commit the wrapping transaction and return the value
    Commit(T),
    /// Roll the wrapping transaction back, still returning the value
    Rollback(T),
}

/// Lend one pooled session to `body`, retrying transient connection errors
/// until `deadline` elapses
///
/// # Errors
///
/// Returns *PoolAcquireTimeout* when no session frees up in time, or the
/// body's error when it is not a known transient.
pub async fn reliable_exec<T, F>(pool: &PgPool, deadline: Duration, mut body: F) -> AppResult<T>
where
    F: for<'c> FnMut(&'c mut PgConnection) -> BoxFuture<'c, Result<T, sqlx::Error>> + Send,
    T: Send,
{
    let give_up = Instant::now() + deadline;
    loop {
        let mut conn = match pool.acquire().await {
            Ok(conn) => conn,
            Err(err) => {
                retry_or_bail(err, give_up).await?;
                continue;
            }
        };
        match body(&mut conn).await {
            Ok(value) => return Ok(value),
            Err(err) => retry_or_bail(err, give_up).await?,
        }
    }
}

/// Like [`reliable_exec`], but wraps `body` in a backend transaction whose
/// fate the body decides via [`TxOutcome`]
///
/// # Errors
///
/// As [`reliable_exec`]; commit failures are retried only when transient.
pub async fn reliable_exec_in_tx<T, F>(
    pool: &PgPool,
    deadline: Duration,
    mut body: F,
) -> AppResult<T>
where
    F: for<'c> FnMut(&'c mut PgConnection) -> BoxFuture<'c, Result<TxOutcome<T>, sqlx::Error>>
        + Send,
    T: Send,
{
    let give_up = Instant::now() + deadline;
    loop {
        let mut tx = match pool.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                retry_or_bail(err, give_up).await?;
                continue;
            }
        };
        match body(&mut tx).await {
            Ok(TxOutcome::Commit(value)) => match tx.commit().await {
                Ok(()) => return Ok(value),
                Err(err) => retry_or_bail(err, give_up).await?,
            },
            Ok(TxOutcome::Rollback(value)) => {
                if let Err(err) = tx.rollback().await {
                    warn!(error = %err, "error rolling back batch transaction");
                }
                return Ok(value);
            }
            Err(err) => retry_or_bail(err, give_up).await?,
        }
    }
}

// Sleeps and returns Ok when the error is worth another attempt; otherwise
// converts it for the caller.
async fn retry_or_bail(err: sqlx::Error, give_up: Instant) -> AppResult<()> {
    if matches!(err, sqlx::Error::PoolTimedOut) {
        return Err(AppError::pool_timeout());
    }
    if is_transient(&err) && Instant::now() + RETRY_BACKOFF < give_up {
        warn!(error = %err, "transient backend error, retrying");
        sleep(RETRY_BACKOFF).await;
        return Ok(());
    }
    Err(err.into())
}

// Connection-level failures the backend may heal from: socket errors,
// class-08 connection exceptions, and admin-initiated shutdown.
fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| code.starts_with("08") || code == "57P01"),
        _ => false,
    }
}
