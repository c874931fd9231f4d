// ABOUTME: Gateway server binary: config, logging, lifecycle, signals
// ABOUTME: Exits 1 on unrecoverable startup failure, 0 on clean shutdown
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

#![forbid(unsafe_code)]

//! # SQLGateway Server Binary
//!
//! Starts the HTTP gateway in front of a PostgreSQL-compatible backend, with
//! optional Redis-backed cross-replica transaction routing.

use anyhow::Result;
use clap::Parser;
use sqlgateway::{
    config::GatewayConfig,
    logging,
    server::{GatewayServer, GatewayState},
};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sqlgateway")]
#[command(about = "HTTP JSON gateway for PostgreSQL-compatible databases")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = setup_configuration(&args)?;
    bootstrap_server(config).await
}

/// Setup server configuration from environment and arguments
fn setup_configuration(args: &Args) -> Result<GatewayConfig> {
    let mut config = GatewayConfig::from_env()?;

    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }

    logging::init_from_env()?;
    info!("starting sqlgateway");
    info!("{}", config.summary());

    Ok(config)
}

/// Bring up all collaborators and run until a shutdown signal arrives
async fn bootstrap_server(config: GatewayConfig) -> Result<()> {
    let shutdown_sleep = Duration::from_secs(config.shutdown_sleep_sec);
    let state = GatewayState::initialize(config).await?;
    let server = GatewayServer::start(state);

    // Once this future resolves the server stops its background loops, then
    // drains the listener and releases external resources
    let graceful = async move {
        shutdown_signal().await;
        warn!("received shutdown signal");
        if !shutdown_sleep.is_zero() {
            // Lets load balancers observe the terminating pod before the
            // listener stops accepting
            info!("sleeping for {}s before draining", shutdown_sleep.as_secs());
            tokio::time::sleep(shutdown_sleep).await;
        }
    };

    server.run(graceful).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => warn!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
