// ABOUTME: Runs one statement on a backend session and shapes the result
// ABOUTME: Exec-only statements skip row reading; query results are eager
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Statement execution.
//!
//! [`run_statement`] is the single choke point through which every statement
//! in the gateway runs, on a pooled session or a pinned transaction alike.
//! Statement failures are captured into the result's `Error` field rather
//! than propagated; only the caller decides whether a failure aborts a batch.

use crate::logging;
use crate::sql::{values, QueryRes};
use serde_json::Value;
use sqlx::{Column, Executor, PgConnection, Row};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Run one statement on the given session, always stamping `TimeNS`
pub async fn run_statement(
    conn: &mut PgConnection,
    exec_only: bool,
    statement: &str,
    params: &[Value],
) -> QueryRes {
    if logging::statement_traces() {
        info!(statement, exec_only, "running statement");
    } else {
        debug!(statement, exec_only, "running statement");
    }

    let started = Instant::now();
    let mut res = QueryRes::default();

    if exec_only {
        let query = values::bind_params(sqlx::query(statement), params);
        if let Err(err) = query.execute(&mut *conn).await {
            warn!(statement, error = %err, "got exec error");
            res.error = Some(err.to_string());
        }
    } else {
        run_query(conn, statement, params, &mut res).await;
    }

    res.time_ns = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
    res
}

async fn run_query(conn: &mut PgConnection, statement: &str, params: &[Value], res: &mut QueryRes) {
    let query = values::bind_params(sqlx::query(statement), params);
    let rows = match query.fetch_all(&mut *conn).await {
        Ok(rows) => rows,
        Err(err) => {
            warn!(statement, error = %err, "got query error");
            res.error = Some(err.to_string());
            return;
        }
    };

    // Header row of column names; an empty result set carries no descriptors,
    // so those come from a prepare round-trip instead.
    let names: Vec<Value> = if let Some(first) = rows.first() {
        first
            .columns()
            .iter()
            .map(|c| Value::from(c.name()))
            .collect()
    } else {
        match conn.describe(statement).await {
            Ok(description) => description
                .columns()
                .iter()
                .map(|c| Value::from(c.name()))
                .collect(),
            Err(err) => {
                warn!(statement, error = %err, "failed to describe statement");
                res.error = Some(err.to_string());
                return;
            }
        }
    };
    res.columns = Some(vec![names]);

    let mut data = Vec::with_capacity(rows.len());
    for row in &rows {
        match values::row_to_values(row) {
            Ok(decoded) => data.push(decoded),
            Err(err) => {
                // A row-read error aborts only this statement
                res.error = Some(err.to_string());
                break;
            }
        }
    }
    if !data.is_empty() {
        res.rows = Some(data);
    }
}
