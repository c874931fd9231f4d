// ABOUTME: Shared directory tests: owner records, TTL, and peer discovery
// ABOUTME: Skips (with a log line) when REDIS_ADDR is not set
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use chrono::Utc;
use sqlgateway::config::GatewayConfig;
use sqlgateway::directory::{TransactionMeta, TxDirectory};
use sqlgateway::txn::gen_tx_id;

fn test_config() -> Option<GatewayConfig> {
    let Ok(redis_addr) = std::env::var("REDIS_ADDR") else {
        eprintln!("REDIS_ADDR not set, skipping directory test");
        return None;
    };
    Some(GatewayConfig {
        pg_dsn: String::new(),
        pg_pool_conns: 2,
        redis_addr: Some(redis_addr),
        redis_password: std::env::var("REDIS_PASSWORD").ok().filter(|v| !v.is_empty()),
        redis_pool_conns: 2,
        namespace: "sqlgateway-test".to_owned(),
        pod_name: "test-pod".to_owned(),
        pod_base_domain: None,
        pod_url: None,
        pod_https: false,
        http_port: 0,
        auth_user: None,
        auth_pass: None,
        shutdown_sleep_sec: 0,
        traces: false,
    })
}

async fn test_directory() -> Option<TxDirectory> {
    let config = test_config()?;
    Some(
        TxDirectory::connect(&config)
            .await
            .expect("directory must be reachable when REDIS_ADDR is set"),
    )
}

fn meta(tx_id: &str) -> TransactionMeta {
    TransactionMeta {
        tx_id: tx_id.to_owned(),
        pod_id: "test-pod".to_owned(),
        pod_url: "localhost:8080".to_owned(),
        expiry: Utc::now() + chrono::Duration::seconds(10),
    }
}

#[tokio::test]
async fn test_transaction_record_round_trip() {
    let Some(directory) = test_directory().await else { return };
    let tx_id = gen_tx_id();

    directory.set_transaction(&meta(&tx_id)).await.unwrap();

    let back = directory.get_transaction(&tx_id).await.unwrap().unwrap();
    assert_eq!(back.tx_id, tx_id);
    assert_eq!(back.pod_id, "test-pod");
    assert_eq!(back.pod_url, "localhost:8080");

    directory.delete_transaction(&tx_id).await.unwrap();
    assert!(directory.get_transaction(&tx_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_set_if_absent_rejects_duplicates() {
    let Some(directory) = test_directory().await else { return };
    let tx_id = gen_tx_id();

    directory.set_transaction(&meta(&tx_id)).await.unwrap();
    let err = directory.set_transaction(&meta(&tx_id)).await.unwrap_err();
    assert!(err.message.contains("already registered"));

    directory.delete_transaction(&tx_id).await.unwrap();
}

#[tokio::test]
async fn test_record_expires_with_ttl() {
    let Some(directory) = test_directory().await else { return };
    let tx_id = gen_tx_id();

    let mut record = meta(&tx_id);
    record.expiry = Utc::now() + chrono::Duration::seconds(1);
    directory.set_transaction(&record).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    assert!(directory.get_transaction(&tx_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_record_is_none() {
    let Some(directory) = test_directory().await else { return };
    assert!(directory
        .get_transaction("tx_never_existed")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_peer_discovery_round_trip() {
    let Some(directory) = test_directory().await else { return };
    let pod = format!("peer-{}", gen_tx_id());

    directory.register_peer(&pod).await.unwrap();
    let peers = directory.get_peers().await.unwrap();
    assert!(peers.contains_key(&pod));
    assert_eq!(peers[&pod].pod_name, pod);

    directory.deregister_peer(&pod).await.unwrap();
    let peers = directory.get_peers().await.unwrap();
    assert!(!peers.contains_key(&pod));
}
