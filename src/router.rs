// ABOUTME: Front door dispatching batches to local, remote, or ad-hoc paths
// ABOUTME: Forwards requests for foreign-owned transactions to their replica
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Distributed query router.
//!
//! For a batch naming a transaction id the router tries, in order: the local
//! registry (execute on the pinned session), then the shared directory
//! (forward to the owning replica), then gives up with *TxNotFound*. A batch
//! without an id runs ad-hoc: a single statement straight on a pooled
//! session, multiple statements atomically inside one backend transaction.
//!
//! Commit and rollback resolve ownership the same way, so any replica can
//! terminate any transaction in the fleet.

use crate::config::GatewayConfig;
use crate::directory::TxDirectory;
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::sql::executor::run_statement;
use crate::sql::pool::{reliable_exec, reliable_exec_in_tx, TxOutcome, SESSION_BUDGET};
use crate::sql::{QueryRequest, QueryRes, QueryResponse};
use crate::txn::{TxRegistry, TxSlot, DEFAULT_TX_TTL};
use anyhow::{Context, Result};
use bytes::Bytes;
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Overall budget for one batch request
pub const BATCH_BUDGET: Duration = Duration::from_secs(30);

/// Budget for a forwarded call to the owning replica
pub const FORWARD_BUDGET: Duration = Duration::from_secs(30);

/// Client-side budget for commit/rollback
pub const FINISH_BUDGET: Duration = Duration::from_secs(10);

/// What the router did with a request
#[derive(Debug)]
pub enum RouterOutcome {
    /// Ran locally; here are the aligned results
    Executed(QueryResponse),
    /// Ran locally with no payload (commit/rollback)
    Done,
    /// Forwarded to the owning replica; relay status and body verbatim
    Forwarded {
        /// Remote HTTP status
        status: u16,
        /// Remote body, unchanged
        body: Bytes,
    },
}

enum RemoteOp<'a> {
    Query(&'a QueryRequest),
    Commit,
    Rollback,
}

impl RemoteOp<'_> {
    const fn path(&self) -> &'static str {
        match self {
            Self::Query(_) => "/psql/query",
            Self::Commit => "/psql/commit",
            Self::Rollback => "/psql/rollback",
        }
    }
}

/// Front door for every query, begin, commit, and rollback
pub struct QueryRouter {
    pool: PgPool,
    registry: Arc<TxRegistry>,
    directory: Option<TxDirectory>,
    http: reqwest::Client,
    scheme: &'static str,
    forward_auth: Option<(String, String)>,
}

impl QueryRouter {
    /// Build the router and its outbound HTTP client
    ///
    /// # Errors
    ///
    /// Returns an error if the outbound client cannot be constructed.
    pub fn new(
        pool: PgPool,
        registry: Arc<TxRegistry>,
        directory: Option<TxDirectory>,
        config: &GatewayConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(FORWARD_BUDGET)
            .build()
            .context("error building forwarding client")?;
        Ok(Self {
            pool,
            registry,
            directory,
            http,
            scheme: config.forward_scheme(),
            forward_auth: config
                .basic_auth()
                .map(|(user, pass)| (user.to_owned(), pass.to_owned())),
        })
    }

    /// Open a pinned transaction on this replica
    ///
    /// # Errors
    ///
    /// See [`TxRegistry::begin`].
    pub async fn begin(&self, ttl: Option<Duration>) -> AppResult<String> {
        self.registry.begin(ttl.unwrap_or(DEFAULT_TX_TTL)).await
    }

    /// Dispatch a batch, under the overall batch budget
    ///
    /// # Errors
    ///
    /// Returns *RequestTimeout* when the budget elapses, *TxNotFound* /
    /// *TxNotFoundLocal* on routing misses, or an execution-machinery error.
    pub async fn run_queries(&self, request: &QueryRequest) -> AppResult<RouterOutcome> {
        match timeout(BATCH_BUDGET, self.run_queries_inner(request)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::request_timeout()),
        }
    }

    async fn run_queries_inner(&self, request: &QueryRequest) -> AppResult<RouterOutcome> {
        if request.queries.is_empty() {
            return Err(AppError::invalid_input("at least one query is required"));
        }

        if let Some(tx_id) = &request.tx_id {
            if let Some(slot) = self.registry.get(tx_id) {
                return self
                    .run_pinned(tx_id, &slot, request)
                    .await
                    .map(RouterOutcome::Executed);
            }
            return self.resolve_remote(tx_id, RemoteOp::Query(request)).await;
        }

        self.run_adhoc(request).await.map(RouterOutcome::Executed)
    }

    /// Run a batch on the locally pinned session, aborting on first failure
    async fn run_pinned(
        &self,
        tx_id: &str,
        slot: &Arc<TxSlot>,
        request: &QueryRequest,
    ) -> AppResult<QueryResponse> {
        let mut results: Vec<Option<QueryRes>> = vec![None; request.queries.len()];

        let mut guard = slot.guard.lock().await;
        if guard.is_none() {
            return Err(AppError::tx_not_found());
        }

        for (i, query) in request.queries.iter().enumerate() {
            let Some(tx) = guard.as_mut() else {
                return Err(AppError::tx_not_found());
            };
            let res =
                run_statement(&mut *tx, query.exec_only(), &query.statement, &query.params).await;
            let failed = res.error.is_some();
            results[i] = Some(res);
            if failed {
                debug!(tx_id, statement = i, "statement failed, aborting transaction");
                // Take the handle before releasing the guard so a concurrent
                // request on this id cannot slip a statement in ahead of the
                // abort; it observes the slot as already finished instead
                if let Some(tx) = guard.take() {
                    if let Err(err) = tx.rollback().await {
                        warn!(tx_id, error = %err, "error rolling back aborted transaction");
                    }
                }
                drop(guard);
                self.registry.remove(tx_id).await;
                return Ok(QueryResponse { queries: results });
            }
        }

        Ok(QueryResponse { queries: results })
    }

    /// Run a batch without a transaction id on a fresh session
    async fn run_adhoc(&self, request: &QueryRequest) -> AppResult<QueryResponse> {
        let queries = if request.queries.len() == 1 {
            // Single statement: no transaction wrapping
            let query = request.queries[0].clone();
            let res = reliable_exec(&self.pool, SESSION_BUDGET, move |conn: &mut PgConnection| {
                let query = query.clone();
                Box::pin(async move {
                    Ok::<_, sqlx::Error>(
                        run_statement(conn, query.exec_only(), &query.statement, &query.params)
                            .await,
                    )
                })
            })
            .await?;
            vec![Some(res)]
        } else {
            // Multi-statement batch: atomic, first failure rolls it back
            let batch = request.queries.clone();
            reliable_exec_in_tx(&self.pool, SESSION_BUDGET, move |conn: &mut PgConnection| {
                let batch = batch.clone();
                Box::pin(async move {
                    let mut out: Vec<Option<QueryRes>> = vec![None; batch.len()];
                    for (i, query) in batch.iter().enumerate() {
                        let res = run_statement(
                            &mut *conn,
                            query.exec_only(),
                            &query.statement,
                            &query.params,
                        )
                        .await;
                        let failed = res.error.is_some();
                        out[i] = Some(res);
                        if failed {
                            return Ok::<_, sqlx::Error>(TxOutcome::Rollback(out));
                        }
                    }
                    Ok(TxOutcome::Commit(out))
                })
            })
            .await?
        };

        Ok(QueryResponse { queries })
    }

    /// Commit a transaction, local or remote
    ///
    /// # Errors
    ///
    /// *TxNotFound* / *TxNotFoundLocal* on routing misses, *RequestTimeout*
    /// past the client-side budget, or the backend/directory error.
    pub async fn commit(&self, tx_id: &str) -> AppResult<RouterOutcome> {
        self.finish(tx_id, true).await
    }

    /// Roll a transaction back, local or remote
    ///
    /// # Errors
    ///
    /// As [`Self::commit`].
    pub async fn rollback(&self, tx_id: &str) -> AppResult<RouterOutcome> {
        self.finish(tx_id, false).await
    }

    async fn finish(&self, tx_id: &str, commit: bool) -> AppResult<RouterOutcome> {
        let local = async {
            if commit {
                self.registry.commit(tx_id).await
            } else {
                self.registry.rollback(tx_id).await
            }
        };
        match timeout(FINISH_BUDGET, local).await {
            Err(_) => Err(AppError::request_timeout()),
            Ok(Ok(())) => Ok(RouterOutcome::Done),
            Ok(Err(err)) if err.code == ErrorCode::TxNotFound => {
                let op = if commit {
                    RemoteOp::Commit
                } else {
                    RemoteOp::Rollback
                };
                self.resolve_remote(tx_id, op).await
            }
            Ok(Err(err)) => Err(err),
        }
    }

    /// Resolve a non-local id through the directory and forward to its owner
    async fn resolve_remote(&self, tx_id: &str, op: RemoteOp<'_>) -> AppResult<RouterOutcome> {
        let Some(directory) = &self.directory else {
            return Err(AppError::tx_not_found());
        };
        let Some(meta) = directory.get_transaction(tx_id).await? else {
            return Err(AppError::tx_not_found());
        };
        if meta.pod_id == self.registry.replica_id() {
            // The only way here is a replica restarting under its old name
            // while the directory record was still alive
            return Err(AppError::tx_not_found_local());
        }

        let body = match &op {
            RemoteOp::Query(request) => serde_json::to_vec(request)?,
            RemoteOp::Commit | RemoteOp::Rollback => serde_json::to_vec(&json!({"TxID": tx_id}))?,
        };
        debug!(tx_id, owner = %meta.pod_id, path = op.path(), "forwarding to transaction owner");
        self.forward(&meta.pod_url, op.path(), body).await
    }

    /// POST the original payload to the owning replica, relaying the reply
    /// verbatim whatever its status
    async fn forward(&self, owner_url: &str, path: &str, body: Vec<u8>) -> AppResult<RouterOutcome> {
        let url = format!("{}://{}{}", self.scheme, owner_url, path);
        let mut request = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some((user, pass)) = &self.forward_auth {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request
            .send()
            .await
            .map_err(|err| AppError::internal(format!("error forwarding to {url}: {err}")))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| AppError::internal(format!("error reading forwarded reply: {err}")))?;
        Ok(RouterOutcome::Forwarded { status, body })
    }
}
