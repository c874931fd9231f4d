// ABOUTME: Wire model for query batches plus the SQL execution submodules
// ABOUTME: Field names match the public JSON API exactly (PascalCase, TxID, TimeNS)
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Query wire model and SQL execution.
//!
//! The JSON field names here are the public API surface and must not drift:
//! `Queries`, `Statement`, `Params`, `Exec`, `IgnoreCache`, `ForceCache`,
//! `TxID`, `Columns`, `Rows`, `Error`, `TimeNS`, `CacheHit`, `Cached`.

pub mod executor;
pub mod pool;
pub mod values;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One parameterized statement inside a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryReq {
    /// SQL text with positional placeholders ($1..$n)
    pub statement: String,
    /// Positional parameters bound to the placeholders
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
    /// Run on the exec path (no result rows expected)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<bool>,
    /// Bypass the result cache for this statement (accepted, caching is not
    /// implemented)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_cache: Option<bool>,
    /// Force-cache this statement's result (accepted, caching is not
    /// implemented)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_cache: Option<bool>,
}

impl QueryReq {
    /// Whether this statement runs on the driver's exec path
    #[must_use]
    pub fn exec_only(&self) -> bool {
        self.exec.unwrap_or(false)
    }
}

/// Outcome of one statement, aligned with its request by position
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryRes {
    /// Single header row of column names, in descriptor order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<Vec<Value>>>,
    /// Data rows; each an ordered list of column values in descriptor order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Vec<Value>>>,
    /// Statement-level failure; never lifted to an HTTP status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock execution time in nanoseconds, always set
    #[serde(rename = "TimeNS")]
    pub time_ns: u64,
    /// Result was served from cache (never set, caching is not implemented)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    /// Result was stored to cache (never set, caching is not implemented)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
}

/// A batch of statements, optionally pinned to a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Statements to run, in declared order
    #[serde(rename = "Queries")]
    pub queries: Vec<QueryReq>,
    /// Pinned transaction id from `/psql/begin`
    #[serde(rename = "TxID", default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
}

/// Batch response; entries after an aborting failure are null
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Results aligned with the request's statements
    #[serde(rename = "Queries")]
    pub queries: Vec<Option<QueryRes>>,
}
