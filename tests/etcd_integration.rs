//! Integration tests for the etcd client and the cluster-endpoints-watch
//! membership source, exercised against a real etcd container.
//!
//! Requires Docker (via testcontainers). Run with:
//! `cargo test --test etcd_integration`

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ws_shard_lb::config::ClusterConfig;
use ws_shard_lb::etcd::client::{b64_encode, DeleteRangeRequest, PutRequest};
use ws_shard_lb::etcd::EtcdClient;
use ws_shard_lb::membership::cluster;
use ws_shard_lb::ring::Ring;
use ws_shard_lb::router::Router;

use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tokio::sync::Notify;

const PREFIX: &str = "/ws-proxy-headless/endpoints";

async fn start_etcd() -> (EtcdClient, ClusterConfig, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("quay.io/coreos/etcd", "v3.5.17")
        .with_exposed_port(2379_u16.tcp())
        .with_env_var("ETCD_ADVERTISE_CLIENT_URLS", "http://0.0.0.0:2379")
        .with_env_var("ETCD_LISTEN_CLIENT_URLS", "http://0.0.0.0:2379")
        .start()
        .await
        .expect("failed to start etcd container");

    let host = container.get_host().await.expect("get host");
    let port = container.get_host_port_ipv4(2379).await.expect("get port");
    let endpoint = format!("http://{}:{}", host, port);

    let http = reqwest::Client::new();
    for _ in 0..30 {
        if let Ok(resp) = http
            .post(format!("{}/v3/maintenance/status", endpoint))
            .json(&serde_json::json!({}))
            .send()
            .await
        {
            if resp.status().is_success() {
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    }

    let cluster_cfg = ClusterConfig {
        endpoints: vec![endpoint],
        prefix: PREFIX.to_string(),
        shard_port: 3000,
        username: None,
        password: None,
    };

    let client = EtcdClient::connect(&cluster_cfg).await.expect("connect to etcd");
    (client, cluster_cfg, container)
}

async fn put(client: &EtcdClient, key: &str, value: &str) {
    client
        .put(&PutRequest {
            key: b64_encode(key),
            value: b64_encode(value),
            lease: None,
        })
        .await
        .expect("put");
}

async fn delete(client: &EtcdClient, key: &str) {
    client
        .delete(&DeleteRangeRequest {
            key: b64_encode(key),
            range_end: String::new(),
        })
        .await
        .expect("delete");
}

// ── EtcdClient low-level tests ──────────────────────

#[tokio::test]
async fn test_etcd_put_and_range() {
    let (client, _cfg, _container) = start_etcd().await;

    put(&client, "/test/key1", "hello").await;

    let resp = client
        .range(&ws_shard_lb::etcd::client::RangeRequest {
            key: b64_encode("/test/key1"),
            range_end: String::new(),
            keys_only: None,
        })
        .await
        .expect("range");

    assert_eq!(resp.kvs.len(), 1);
    let val = ws_shard_lb::etcd::client::b64_decode(&resp.kvs[0].value).unwrap();
    assert_eq!(val, "hello");
}

#[tokio::test]
async fn test_etcd_range_prefix() {
    let (client, _cfg, _container) = start_etcd().await;

    for i in 0..3 {
        put(&client, &format!("/prefix/key{i}"), &format!("val{i}")).await;
    }

    let resp = client
        .range(&ws_shard_lb::etcd::client::RangeRequest {
            key: b64_encode("/prefix/"),
            range_end: ws_shard_lb::etcd::client::prefix_range_end("/prefix/"),
            keys_only: None,
        })
        .await
        .expect("range prefix");

    assert_eq!(resp.kvs.len(), 3);
}

#[tokio::test]
async fn test_etcd_delete() {
    let (client, _cfg, _container) = start_etcd().await;

    put(&client, "/deleteme/key1", "hello").await;
    delete(&client, "/deleteme/key1").await;

    let resp = client
        .range(&ws_shard_lb::etcd::client::RangeRequest {
            key: b64_encode("/deleteme/key1"),
            range_end: String::new(),
            keys_only: None,
        })
        .await
        .expect("range");
    assert_eq!(resp.kvs.len(), 0);
}

#[tokio::test]
async fn test_etcd_lease_grant_and_keepalive() {
    let (client, _cfg, _container) = start_etcd().await;

    let lease_id = client.lease_grant(30).await.expect("lease grant");
    assert!(lease_id > 0);
    client.lease_keepalive(lease_id).await.expect("lease keepalive");

    client
        .put(&PutRequest {
            key: b64_encode("/leased/key"),
            value: b64_encode("leased-value"),
            lease: Some(lease_id),
        })
        .await
        .expect("put with lease");

    let resp = client
        .range(&ws_shard_lb::etcd::client::RangeRequest {
            key: b64_encode("/leased/key"),
            range_end: String::new(),
            keys_only: None,
        })
        .await
        .expect("range");
    assert_eq!(resp.kvs.len(), 1);

    client.lease_revoke(lease_id).await.expect("lease revoke");

    let resp = client
        .range(&ws_shard_lb::etcd::client::RangeRequest {
            key: b64_encode("/leased/key"),
            range_end: String::new(),
            keys_only: None,
        })
        .await
        .expect("range after revoke");
    assert_eq!(resp.kvs.len(), 0, "key should be gone after lease revoke");
}

// ── Cluster membership-watch integration ────────────

#[tokio::test]
async fn test_cluster_bootstrap_loads_initial_snapshot() {
    let (client, cfg, _container) = start_etcd().await;

    put(&client, &format!("{PREFIX}/10.0.0.1"), "").await;
    put(&client, &format!("{PREFIX}/10.0.0.2"), "").await;

    let ring = Arc::new(Ring::new());
    let router = Arc::new(Router::new(ring.clone(), Some(cfg.shard_port)));
    let ready = Arc::new(AtomicBool::new(false));
    let shutdown = Arc::new(Notify::new());

    cluster::bootstrap(&cfg, ring.clone(), router, ready.clone(), shutdown.clone())
        .await
        .expect("cluster bootstrap");

    let mut nodes = ring.nodes();
    nodes.sort();
    assert_eq!(nodes, vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
    assert!(ready.load(std::sync::atomic::Ordering::Acquire));

    shutdown.notify_waiters();
}

#[tokio::test]
async fn test_cluster_watch_applies_add_and_remove() {
    let (client, cfg, _container) = start_etcd().await;

    put(&client, &format!("{PREFIX}/10.0.1.1"), "").await;

    let ring = Arc::new(Ring::new());
    let router = Arc::new(Router::new(ring.clone(), Some(cfg.shard_port)));
    let ready = Arc::new(AtomicBool::new(false));
    let shutdown = Arc::new(Notify::new());

    cluster::bootstrap(&cfg, ring.clone(), router, ready, shutdown.clone())
        .await
        .expect("cluster bootstrap");
    assert_eq!(ring.nodes(), vec!["10.0.1.1".to_string()]);

    // New shard joins.
    put(&client, &format!("{PREFIX}/10.0.1.2"), "").await;
    let joined = wait_until(|| ring.len() == 2, std::time::Duration::from_secs(10)).await;
    assert!(joined, "watch did not observe the new shard in time");

    // Original shard leaves.
    delete(&client, &format!("{PREFIX}/10.0.1.1")).await;
    let left = wait_until(
        || ring.nodes() == vec!["10.0.1.2".to_string()],
        std::time::Duration::from_secs(10),
    )
    .await;
    assert!(left, "watch did not observe the removal in time");

    shutdown.notify_waiters();
}

async fn wait_until(mut predicate: impl FnMut() -> bool, timeout: std::time::Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}
