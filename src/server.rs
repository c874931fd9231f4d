// ABOUTME: Gateway state assembly and HTTP server lifecycle
// ABOUTME: Owns background tasks and the graceful shutdown sequence
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Server assembly.
//!
//! [`GatewayState`] wires the pool, registry, directory, and router together;
//! [`GatewayServer`] runs the HTTP listener plus the sweeper and discovery
//! background tasks, and tears everything down in order on shutdown: stop the
//! background loops first (the discovery loop removes this replica's peer
//! record as it exits, and a stopped sweeper cannot roll back a transaction
//! that draining requests still reference), then drain the listener, then
//! roll back whatever is still open and close the pool.

use crate::config::GatewayConfig;
use crate::directory::{self, TxDirectory};
use crate::router::QueryRouter;
use crate::routes::build_router;
use crate::sql::pool;
use crate::txn::{sweeper, TxRegistry};
use anyhow::{Context, Result};
use sqlx::PgPool;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Budget for draining in-flight requests on shutdown
pub const DRAIN_BUDGET: Duration = Duration::from_secs(10);

/// Shared state behind every request handler
pub struct GatewayState {
    /// Loaded environment configuration
    pub config: GatewayConfig,
    /// Backend connection pool
    pub pool: PgPool,
    /// Local transaction registry
    pub registry: Arc<TxRegistry>,
    /// Shared directory; absent in single-replica mode
    pub directory: Option<TxDirectory>,
    /// The distributed query router
    pub router: QueryRouter,
}

impl GatewayState {
    /// Connect all collaborators and assemble the state
    ///
    /// # Errors
    ///
    /// Returns an error when the backend or directory is unreachable; the
    /// caller treats this as an unrecoverable startup failure.
    pub async fn initialize(config: GatewayConfig) -> Result<Arc<Self>> {
        let pool = pool::connect(&config).await?;

        let directory = if config.cross_replica() {
            Some(TxDirectory::connect(&config).await?)
        } else {
            info!("no REDIS_ADDR configured, running in single-replica mode");
            None
        };

        let registry = TxRegistry::new(
            pool.clone(),
            directory.clone(),
            config.pod_name.clone(),
            config.advertised_url(),
        );
        let router =
            QueryRouter::new(pool.clone(), Arc::clone(&registry), directory.clone(), &config)?;

        Ok(Arc::new(Self {
            config,
            pool,
            registry,
            directory,
            router,
        }))
    }
}

/// The running gateway: HTTP listener plus background tasks
pub struct GatewayServer {
    state: Arc<GatewayState>,
    shutdown_tx: watch::Sender<bool>,
    background: Vec<JoinHandle<()>>,
}

impl GatewayServer {
    /// Start the background tasks (sweeper, peer discovery)
    #[must_use]
    pub fn start(state: Arc<GatewayState>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut background = vec![sweeper::spawn(
            Arc::clone(&state.registry),
            shutdown_rx.clone(),
        )];
        if let Some(dir) = &state.directory {
            background.push(directory::spawn_discovery(
                dir.clone(),
                state.config.pod_name.clone(),
                shutdown_rx,
            ));
        }

        Self {
            state,
            shutdown_tx,
            background,
        }
    }

    /// Serve HTTP until `shutdown` resolves, then tear everything down
    ///
    /// The sweeper and discovery loops stop (and the peer record goes away)
    /// before the listener starts draining, so no expiry rollback can race a
    /// request that is still in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or the server fails.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let Self {
            state,
            shutdown_tx,
            background,
        } = self;

        let addr = ("0.0.0.0", state.config.http_port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("error binding to port {}", state.config.http_port))?;
        info!(
            "http server listening on {}",
            listener.local_addr().context("listener has no address")?
        );

        // Relay the shutdown trigger so the drain itself can be bounded
        let (fired_tx, fired_rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = async move {
            shutdown.await;
            // Background loops stop before the listener does; the discovery
            // loop deregisters the peer record on its way out
            if shutdown_tx.send(true).is_err() {
                warn!("background tasks already stopped");
            }
            for handle in background {
                if let Err(err) = handle.await {
                    warn!(error = %err, "background task panicked during shutdown");
                }
            }
            let _ = fired_tx.send(());
        };

        let serve = axum::serve(listener, build_router(Arc::clone(&state)))
            .with_graceful_shutdown(shutdown)
            .into_future();
        tokio::pin!(serve);

        tokio::select! {
            result = &mut serve => result.context("http server failed")?,
            () = async {
                let _ = fired_rx.await;
                tokio::time::sleep(DRAIN_BUDGET).await;
            } => {
                warn!("drain budget elapsed, abandoning in-flight connections");
            }
        }

        // Pinned sessions must go back to the pool or close() would wait on
        // them forever
        let open = state.registry.open_transactions();
        if open > 0 {
            warn!(open, "rolling back transactions still open at shutdown");
            state.registry.drain().await;
        }

        state.pool.close().await;
        info!("shutdown complete");
        Ok(())
    }
}
