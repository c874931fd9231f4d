// ABOUTME: Local registry of live transactions pinned to this replica
// ABOUTME: Owns each pinned session from begin until commit, rollback, or expiry
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Local transaction registry.
//!
//! Each open transaction pins one pooled backend connection to this replica
//! for its lifetime. The registry maps opaque ids to slots; a slot's mutex
//! serializes every backend operation on its session, so parallel HTTP
//! requests naming the same id observe sequential execution. The map's own
//! locking is held only for map operations, never across backend I/O.

pub mod sweeper;

use crate::directory::{TransactionMeta, TxDirectory};
use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Default transaction TTL when a begin names none
pub const DEFAULT_TX_TTL: Duration = Duration::from_secs(30);

/// Overall budget for accepting a begin (pool wait included)
pub const BEGIN_BUDGET: Duration = Duration::from_secs(10);

const TX_ID_LEN: usize = 16;

/// One live transaction owned by this replica
pub struct TxSlot {
    /// Opaque transaction id
    pub id: String,
    /// Wall-clock deadline after which the sweeper rolls the transaction back
    pub expires_at: DateTime<Utc>,
    /// Serializes every backend operation on the pinned session. Holds the
    /// in-flight transaction until commit/rollback takes it; a second taker
    /// finds it gone.
    pub guard: Mutex<Option<Transaction<'static, Postgres>>>,
    cancel: StdMutex<Option<oneshot::Sender<()>>>,
}

impl TxSlot {
    /// Whether the slot's deadline has passed
    #[must_use]
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    // Single-shot: the sender is taken out, so a second call is a no-op.
    fn fire_cancel(&self) {
        let sender = self.cancel.lock().ok().and_then(|mut slot| slot.take());
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }
}

/// Registry of transactions owned by this replica
pub struct TxRegistry {
    txs: DashMap<String, Arc<TxSlot>>,
    pool: PgPool,
    directory: Option<TxDirectory>,
    replica_id: String,
    replica_url: String,
}

impl TxRegistry {
    /// Create the registry for this replica
    #[must_use]
    pub fn new(
        pool: PgPool,
        directory: Option<TxDirectory>,
        replica_id: String,
        replica_url: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            txs: DashMap::new(),
            pool,
            directory,
            replica_id,
            replica_url,
        })
    }

    /// This replica's stable identity
    #[must_use]
    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    /// Number of transactions currently open on this replica
    #[must_use]
    pub fn open_transactions(&self) -> usize {
        self.txs.len()
    }

    /// Open a new pinned transaction and return its id
    ///
    /// # Errors
    ///
    /// Returns *PoolAcquireTimeout* when no session frees up within the
    /// begin budget, or a database/directory error.
    pub async fn begin(&self, ttl: Duration) -> AppResult<String> {
        match timeout(BEGIN_BUDGET, self.begin_inner(ttl)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::pool_timeout()),
        }
    }

    async fn begin_inner(&self, ttl: Duration) -> AppResult<String> {
        let tx = self.pool.begin().await?;
        let tx_id = gen_tx_id();
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(30));

        if let Some(directory) = &self.directory {
            let meta = TransactionMeta {
                tx_id: tx_id.clone(),
                pod_id: self.replica_id.clone(),
                pod_url: self.replica_url.clone(),
                expiry: expires_at,
            };
            if let Err(err) = directory.set_transaction(&meta).await {
                // Undo the freshly opened backend transaction before failing
                if let Err(rb_err) = tx.rollback().await {
                    warn!(error = %rb_err, "error rolling back after directory failure");
                }
                return Err(err);
            }
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let slot = Arc::new(TxSlot {
            id: tx_id.clone(),
            expires_at,
            guard: Mutex::new(Some(tx)),
            cancel: StdMutex::new(Some(cancel_tx)),
        });
        self.txs.insert(tx_id.clone(), slot);
        spawn_watchdog(tx_id.clone(), ttl, cancel_rx);

        debug!(tx_id, ttl_secs = ttl.as_secs(), "opened transaction");
        Ok(tx_id)
    }

    /// Look up a live transaction slot
    #[must_use]
    pub fn get(&self, tx_id: &str) -> Option<Arc<TxSlot>> {
        self.txs.get(tx_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a slot, fire its cancel signal once, and delete the directory
    /// record best-effort
    pub async fn remove(&self, tx_id: &str) {
        if let Some((_, slot)) = self.txs.remove(tx_id) {
            slot.fire_cancel();
        }
        if let Some(directory) = &self.directory {
            if let Err(err) = directory.delete_transaction(tx_id).await {
                warn!(tx_id, error = %err, "error deleting directory record");
            }
        }
    }

    /// Commit a transaction and release its session
    ///
    /// # Errors
    ///
    /// Returns *TxNotFound* when the id is not (or no longer) local, or the
    /// backend commit error.
    pub async fn commit(&self, tx_id: &str) -> AppResult<()> {
        self.finish(tx_id, true).await
    }

    /// Roll a transaction back and release its session
    ///
    /// # Errors
    ///
    /// As [`Self::commit`]. The sweeper and explicit rollbacks share this
    /// entry point, so a second caller simply observes *TxNotFound*.
    pub async fn rollback(&self, tx_id: &str) -> AppResult<()> {
        self.finish(tx_id, false).await
    }

    async fn finish(&self, tx_id: &str, commit: bool) -> AppResult<()> {
        let Some(slot) = self.get(tx_id) else {
            return Err(AppError::tx_not_found());
        };

        let result = {
            let mut guard = slot.guard.lock().await;
            let Some(tx) = guard.take() else {
                // The handle was consumed by a racing finish; make sure the
                // map entry does not outlive it
                drop(guard);
                self.remove(tx_id).await;
                return Err(AppError::tx_not_found());
            };
            if commit {
                tx.commit().await
            } else {
                tx.rollback().await
            }
        };

        // The backend handle is consumed on both paths, so the session is
        // already back in the pool; the entry goes regardless.
        self.remove(tx_id).await;

        match result {
            Ok(()) => {
                debug!(tx_id, commit, "transaction finished");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Roll back every open transaction, releasing its session (shutdown
    /// drain; the sweeper is already stopped when this runs)
    pub async fn drain(&self) {
        let ids: Vec<String> = self.txs.iter().map(|entry| entry.key().clone()).collect();
        for tx_id in ids {
            if let Err(err) = self.rollback(&tx_id).await {
                warn!(tx_id, error = %err, "error rolling back transaction during drain");
            }
        }
    }

    /// Snapshot the ids of transactions whose deadline has passed
    #[must_use]
    pub fn expired_ids(&self) -> Vec<String> {
        let now = Utc::now();
        self.txs
            .iter()
            .filter(|entry| entry.value().expired(now))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

/// Generate an opaque transaction id
#[must_use]
pub fn gen_tx_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TX_ID_LEN)
        .map(char::from)
        .collect();
    format!("tx_{suffix}")
}

// One watchdog per open transaction: parked on the cancel signal, with the
// TTL as its backstop. The session itself is torn down through the registry's
// finish path; the watchdog bounds how long that can stay outstanding.
fn spawn_watchdog(tx_id: String, ttl: Duration, cancel_rx: oneshot::Receiver<()>) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel_rx => {
                trace!(tx_id, "transaction watchdog released");
            }
            () = tokio::time::sleep(ttl) => {
                debug!(tx_id, "transaction lifetime elapsed, awaiting expiry rollback");
            }
        }
    });
}
