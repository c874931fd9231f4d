// ABOUTME: Main library entry point for the SQLGateway HTTP-to-SQL gateway
// ABOUTME: Exposes configuration, routing, transaction, and server modules
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

#![deny(unsafe_code)]

//! # SQLGateway
//!
//! A horizontally-scalable HTTP frontend that exposes a PostgreSQL-protocol
//! compatible backend (PostgreSQL, CockroachDB) as a stateless JSON API while
//! still supporting stateful multi-statement transactions across a fleet of
//! gateway replicas.
//!
//! ## How requests flow
//!
//! A client POSTs a batch of parameterized statements to `/psql/query`,
//! optionally naming a transaction previously opened via `/psql/begin`. The
//! [`router::QueryRouter`] dispatches the batch:
//!
//! - to the locally pinned session when this replica owns the transaction,
//! - to the owning replica over HTTP when the shared directory says another
//!   replica holds it,
//! - or to a fresh pooled session (auto-wrapped in a transaction for
//!   multi-statement batches) when no transaction id is given.
//!
//! Abandoned transactions are rolled back by the [`txn::sweeper`] once their
//! TTL passes, releasing the pinned connection back to the pool.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use sqlgateway::config::GatewayConfig;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = GatewayConfig::from_env()?;
//! println!("gateway will listen on port {}", config.http_port);
//! # Ok(())
//! # }
//! ```

/// Environment-based gateway configuration
pub mod config;

/// Shared transaction directory and peer discovery over Redis
pub mod directory;

/// Centralized error taxonomy and HTTP response mapping
pub mod errors;

/// Structured logging setup
pub mod logging;

/// HTTP middleware (basic auth)
pub mod middleware;

/// The distributed query router
pub mod router;

/// HTTP route handlers
pub mod routes;

/// Server assembly and lifecycle
pub mod server;

/// Backend pool, statement executor, and wire model
pub mod sql;

/// Local transaction registry and expiry sweeper
pub mod txn;
