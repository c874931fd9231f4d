// ABOUTME: Shared transaction directory and peer discovery over Redis
// ABOUTME: TTL-keyed owner records let any replica find a transaction's home
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Shared transaction directory.
//!
//! The directory is a hint store, not a lock: each open transaction gets a
//! TTL-keyed record `{tx_id → owner replica, owner URL, expiry}` so that any
//! replica can route follow-up requests to the owner. Records are created
//! with SET-IF-ABSENT on begin and deleted best-effort on commit/rollback;
//! a missed delete expires with the TTL.
//!
//! The same connection also carries the peer-discovery hash, refreshed every
//! five seconds and used for visibility only, never for routing decisions.

use crate::config::GatewayConfig;
use crate::errors::{AppError, AppResult};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Interval between peer-discovery refreshes
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(5);

/// Directory record naming a transaction's owning replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMeta {
    /// Opaque transaction id
    #[serde(rename = "TxID")]
    pub tx_id: String,
    /// Owning replica's stable identity
    #[serde(rename = "PodID")]
    pub pod_id: String,
    /// Host (no scheme) by which the owner is reachable
    #[serde(rename = "PodURL")]
    pub pod_url: String,
    /// Wall-clock expiry; also the record's TTL
    #[serde(rename = "Expiry")]
    pub expiry: DateTime<Utc>,
}

/// One gateway replica as seen through peer discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    /// Replica identity
    #[serde(rename = "PodName")]
    pub pod_name: String,
    /// Last discovery refresh from this replica
    #[serde(rename = "LastUpdate")]
    pub last_update: DateTime<Utc>,
}

/// Thin facade over the external TTL key-value store
#[derive(Clone)]
pub struct TxDirectory {
    manager: ConnectionManager,
    namespace: String,
}

impl TxDirectory {
    /// Connect and verify the directory store
    ///
    /// # Errors
    ///
    /// Returns an error if the address is malformed or the store does not
    /// answer a ping.
    pub async fn connect(config: &GatewayConfig) -> Result<Self> {
        let addr = config
            .redis_addr
            .as_deref()
            .context("REDIS_ADDR is required for the shared directory")?;
        debug!("connecting to directory store at {addr}");

        let url = match &config.redis_password {
            Some(password) => format!("redis://:{password}@{addr}"),
            None => format!("redis://{addr}"),
        };
        let client = redis::Client::open(url).context("error creating directory client")?;

        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(Duration::from_secs(10))
            .set_response_timeout(Duration::from_secs(5));
        let mut manager = ConnectionManager::new_with_config(client, manager_config)
            .await
            .context("error connecting to directory store")?;

        redis::cmd("PING")
            .query_async::<String>(&mut manager)
            .await
            .context("directory store did not answer ping")?;
        info!("connected to directory store");

        Ok(Self {
            manager,
            namespace: config.namespace.clone(),
        })
    }

    fn tx_key(&self, tx_id: &str) -> String {
        format!("{}:tx:{}", self.namespace, tx_id)
    }

    /// Register a transaction record, failing when the id already exists
    ///
    /// # Errors
    ///
    /// Returns a directory error on store failure or when the id is taken.
    pub async fn set_transaction(&self, meta: &TransactionMeta) -> AppResult<()> {
        let ttl = (meta.expiry - Utc::now()).num_seconds().max(1);
        let payload = serde_json::to_string(meta)?;
        let mut conn = self.manager.clone();

        // SET NX EX: if-absent with the record's TTL, one atomic operation
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.tx_key(&meta.tx_id))
            .arg(payload)
            .arg("NX")
            .arg("EX")
            .arg(ttl)
            .query_async(&mut conn)
            .await?;

        if reply.is_none() {
            return Err(AppError::directory(format!(
                "transaction {} is already registered",
                meta.tx_id
            )));
        }
        Ok(())
    }

    /// Look up a transaction's owner record
    ///
    /// # Errors
    ///
    /// Returns a directory error on store failure or a corrupt record.
    pub async fn get_transaction(&self, tx_id: &str) -> AppResult<Option<TransactionMeta>> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.get(self.tx_key(tx_id)).await?;
        raw.map(|payload| {
            serde_json::from_str(&payload)
                .map_err(|err| AppError::directory(format!("corrupt directory record: {err}")))
        })
        .transpose()
    }

    /// Delete a transaction record; the TTL covers a missed delete
    ///
    /// # Errors
    ///
    /// Returns a directory error on store failure.
    pub async fn delete_transaction(&self, tx_id: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(self.tx_key(tx_id)).await?;
        Ok(())
    }

    /// Refresh this replica's peer-discovery record
    ///
    /// # Errors
    ///
    /// Returns a directory error on store failure.
    pub async fn register_peer(&self, pod_name: &str) -> AppResult<()> {
        let peer = Peer {
            pod_name: pod_name.to_owned(),
            last_update: Utc::now(),
        };
        let payload = serde_json::to_string(&peer)?;
        let mut conn = self.manager.clone();
        conn.hset::<_, _, _, ()>(&self.namespace, pod_name, payload)
            .await?;
        Ok(())
    }

    /// Remove this replica's peer-discovery record (on shutdown)
    ///
    /// # Errors
    ///
    /// Returns a directory error on store failure.
    pub async fn deregister_peer(&self, pod_name: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        conn.hdel::<_, _, ()>(&self.namespace, pod_name).await?;
        Ok(())
    }

    /// List the fleet as seen through peer discovery
    ///
    /// # Errors
    ///
    /// Returns a directory error on store failure or a corrupt record.
    pub async fn get_peers(&self) -> AppResult<HashMap<String, Peer>> {
        let mut conn = self.manager.clone();
        let raw: HashMap<String, String> = conn.hgetall(&self.namespace).await?;
        let mut peers = HashMap::with_capacity(raw.len());
        for (pod_name, payload) in raw {
            let peer = serde_json::from_str(&payload)
                .map_err(|err| AppError::directory(format!("corrupt peer record: {err}")))?;
            peers.insert(pod_name, peer);
        }
        Ok(peers)
    }
}

/// Spawn the peer-discovery refresh loop
pub fn spawn_discovery(
    directory: TxDirectory,
    pod_name: String,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("starting peer discovery worker");
        let mut ticker = tokio::time::interval(DISCOVERY_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = directory.register_peer(&pod_name).await {
                        error!(error = %err, "error updating peer discovery record");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("peer discovery worker stopping");
                    if let Err(err) = directory.deregister_peer(&pod_name).await {
                        warn!(error = %err, "error removing peer discovery record");
                    }
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_meta_wire_names() {
        let expiry = Utc::now();
        let meta = TransactionMeta {
            tx_id: "tx_abc".to_owned(),
            pod_id: "gateway-0".to_owned(),
            pod_url: "gateway-0.gateway:8080".to_owned(),
            expiry,
        };
        let encoded = serde_json::to_value(&meta).unwrap();
        assert_eq!(encoded["TxID"], json!("tx_abc"));
        assert_eq!(encoded["PodID"], json!("gateway-0"));
        assert_eq!(encoded["PodURL"], json!("gateway-0.gateway:8080"));
        assert!(encoded.get("Expiry").is_some());

        let decoded: TransactionMeta = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_peer_record_round_trip() {
        let peer = Peer {
            pod_name: "gateway-1".to_owned(),
            last_update: Utc::now(),
        };
        let payload = serde_json::to_string(&peer).unwrap();
        let back: Peer = serde_json::from_str(&payload).unwrap();
        assert_eq!(back.pod_name, peer.pod_name);
    }
}
