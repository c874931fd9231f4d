// ABOUTME: Periodic task that rolls back transactions past their deadline
// ABOUTME: Shares the registry rollback entry point, so races resolve safely
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Expiry sweeper.
//!
//! Every two seconds the sweeper snapshots expired ids from the registry,
//! then rolls each back through the registry's own rollback entry point.
//! A rollback that races a client commit simply observes *TxNotFound*.
//! Failed rollbacks stay in the registry and are retried on the next tick.

use crate::txn::TxRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Interval between expiry scans
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Spawn the sweeper; it stops when the shutdown signal fires
pub fn spawn(registry: Arc<TxRegistry>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("starting expiry sweeper");
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => sweep_once(&registry).await,
                _ = shutdown.changed() => {
                    debug!("expiry sweeper stopping");
                    return;
                }
            }
        }
    })
}

async fn sweep_once(registry: &Arc<TxRegistry>) {
    let expired = registry.expired_ids();
    if expired.is_empty() {
        return;
    }

    info!(count = expired.len(), "rolling back expired transactions");
    for tx_id in expired {
        match registry.rollback(&tx_id).await {
            Ok(()) => info!(tx_id, "expired transaction rolled back"),
            // Left in place; the next tick retries
            Err(err) => warn!(tx_id, error = %err, "error rolling back expired transaction"),
        }
    }
}
