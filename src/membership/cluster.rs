use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::ClusterConfig;
use crate::error::LbError;
use crate::etcd::client::{
    b64_decode, b64_encode, prefix_range_end, EtcdClient, RangeRequest, WatchCreate,
    WatchCreateRequest, WatchEvent,
};
use crate::ring::Ring;
use crate::router::Router;

const WATCH_INIT_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Bootstraps the cluster-endpoints-watch membership variant (§4.2).
///
/// No Kubernetes client library exists in this lineage's dependency set; the
/// `Endpoints` resource named `ws-proxy-headless` is modeled as a watched key
/// prefix in the coordination store, one key per shard address (grounded
/// substitution, recorded in DESIGN.md). A `PUT` under the prefix is the
/// `Added`/`Updated` case for that one address; a `DELETE` is `Deleted`.
pub async fn bootstrap(
    cfg: &ClusterConfig,
    ring: Arc<Ring>,
    router: Arc<Router>,
    ready: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
) -> Result<(), LbError> {
    let client = EtcdClient::connect(cfg)
        .await
        .map_err(|e| LbError::Config(format!("cluster: connect failed: {e}")))?;

    let initial = tokio::time::timeout(WATCH_INIT_TIMEOUT, load_snapshot(&client, &cfg.prefix))
        .await
        .map_err(|_| LbError::Config("cluster: initial watch sync timed out".into()))?
        .map_err(|e| LbError::Config(format!("cluster: initial load failed: {e}")))?;

    if initial.is_empty() {
        warn!("cluster: no shards found under prefix at boot");
    }
    for addr in &initial {
        ring.add(addr);
    }
    metrics::gauge!("ws_lb_ring_size").set(ring.len() as f64);
    ready.store(true, Ordering::Release);
    info!(count = initial.len(), prefix = %cfg.prefix, "membership: cluster initial snapshot loaded");

    let managed: HashSet<String> = initial.into_iter().collect();
    let prefix = cfg.prefix.clone();

    tokio::spawn(watch_loop(client, prefix, ring, router, managed, shutdown));

    Ok(())
}

/// Range query over the watched prefix, used for the initial snapshot.
async fn load_snapshot(client: &EtcdClient, prefix: &str) -> anyhow::Result<Vec<String>> {
    let resp = client
        .range(&RangeRequest {
            key: b64_encode(prefix),
            range_end: prefix_range_end(prefix),
            keys_only: Some(true),
        })
        .await?;

    let mut addrs = Vec::with_capacity(resp.kvs.len());
    for kv in &resp.kvs {
        let key = b64_decode(&kv.key)?;
        addrs.push(strip_prefix(&key, prefix));
    }
    Ok(addrs)
}

async fn watch_loop(
    client: EtcdClient,
    prefix: String,
    ring: Arc<Ring>,
    router: Arc<Router>,
    mut managed: HashSet<String>,
    shutdown: Arc<Notify>,
) {
    loop {
        let watch_req = WatchCreateRequest {
            create_request: WatchCreate {
                key: b64_encode(&prefix),
                range_end: prefix_range_end(&prefix),
                start_revision: None,
            },
        };

        let mut stream = tokio::select! {
            result = client.watch_stream(&watch_req) => match result {
                Ok(s) => s,
                Err(e) => {
                    error!("cluster: watch open failed: {e}");
                    metrics::counter!("ws_lb_membership_watch_errors_total").increment(1);
                    if sleep_or_shutdown(RECONNECT_BACKOFF, &shutdown).await {
                        return;
                    }
                    continue;
                }
            },
            _ = shutdown.notified() => return,
        };

        loop {
            tokio::select! {
                resp = stream.next_response() => {
                    match resp {
                        Some(resp) => {
                            if let Some(result) = resp.result {
                                apply_events(&result.events, &prefix, &ring, &router, &mut managed);
                            }
                        }
                        None => {
                            warn!("cluster: watch stream ended, reconnecting");
                            break;
                        }
                    }
                }
                _ = shutdown.notified() => return,
            }
        }

        if sleep_or_shutdown(RECONNECT_BACKOFF, &shutdown).await {
            return;
        }
    }
}

/// Applies one watch-response batch to the ring as a single set-diff (the
/// REDESIGN FLAG in spec.md §9: remove `old - new`, add `new - old`) rather
/// than the source's non-diffing remove-then-add, so the ring never briefly
/// contains both the stale and fresh address for an updated key. Ring
/// mutation completes before `router.on_membership_updated()` is invoked, so
/// the rebalance diff always observes the new topology (§4.2, §5).
fn apply_events(
    events: &[WatchEvent],
    prefix: &str,
    ring: &Ring,
    router: &Router,
    managed: &mut HashSet<String>,
) {
    let mut added = HashSet::new();
    let mut removed = HashSet::new();

    for event in events {
        let Some(kv) = &event.kv else { continue };
        let Ok(key) = b64_decode(&kv.key) else { continue };
        let addr = strip_prefix(&key, prefix);
        match event.event_type.as_deref() {
            Some("DELETE") => {
                removed.insert(addr);
            }
            _ => {
                added.insert(addr);
            }
        }
    }

    // A key that is both removed and re-added within the same batch (a
    // value update, not a membership change) must not be dropped.
    let mut changed = false;
    for addr in removed.difference(&added) {
        ring.remove(addr);
        managed.remove(addr);
        changed = true;
    }
    for addr in &added {
        if managed.insert(addr.clone()) {
            ring.add(addr);
            changed = true;
        }
    }

    if changed {
        metrics::gauge!("ws_lb_ring_size").set(ring.len() as f64);
        debug!(added = added.len(), removed = removed.len(), "cluster: membership changed");
        router.on_membership_updated();
    }
}

fn strip_prefix(key: &str, prefix: &str) -> String {
    key.strip_prefix(prefix)
        .map(|s| s.trim_start_matches('/').to_string())
        .unwrap_or_else(|| key.to_string())
}

async fn sleep_or_shutdown(duration: Duration, shutdown: &Notify) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.notified() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etcd::client::KeyValue;

    fn kv(key: &str) -> KeyValue {
        KeyValue {
            key: b64_encode(key),
            value: String::new(),
            mod_revision: Some(1),
        }
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix("/ws-proxy-headless/endpoints/10.1.2.3", "/ws-proxy-headless/endpoints"), "10.1.2.3");
        assert_eq!(strip_prefix("unrelated", "/prefix"), "unrelated");
    }

    #[test]
    fn test_apply_events_put_adds_once() {
        let ring = Ring::new();
        let ring_arc = Arc::new(ring);
        let router = Router::new(ring_arc.clone(), Some(3000));
        let mut managed = HashSet::new();

        let events = vec![WatchEvent { event_type: None, kv: Some(kv("/prefix/10.0.0.1")) }];
        apply_events(&events, "/prefix", &ring_arc, &router, &mut managed);

        assert_eq!(ring_arc.nodes(), vec!["10.0.0.1".to_string()]);
        assert!(managed.contains("10.0.0.1"));
    }

    #[test]
    fn test_apply_events_delete_removes() {
        let ring_arc = Arc::new(Ring::new());
        ring_arc.add("10.0.0.1");
        let router = Router::new(ring_arc.clone(), Some(3000));
        let mut managed: HashSet<String> = ["10.0.0.1".to_string()].into_iter().collect();

        let events = vec![WatchEvent { event_type: Some("DELETE".to_string()), kv: Some(kv("/prefix/10.0.0.1")) }];
        apply_events(&events, "/prefix", &ring_arc, &router, &mut managed);

        assert!(ring_arc.nodes().is_empty());
        assert!(managed.is_empty());
    }

    #[test]
    fn test_apply_events_put_then_delete_same_batch_is_noop() {
        // Simulates an update (delete-old-key, put-new-key) where the
        // resolved address happens to collide in one batch — the set-diff
        // must not drop an address that is both removed and re-added.
        let ring_arc = Arc::new(Ring::new());
        ring_arc.add("10.0.0.1");
        let router = Router::new(ring_arc.clone(), Some(3000));
        let mut managed: HashSet<String> = ["10.0.0.1".to_string()].into_iter().collect();

        let events = vec![
            WatchEvent { event_type: Some("DELETE".to_string()), kv: Some(kv("/prefix/10.0.0.1")) },
            WatchEvent { event_type: None, kv: Some(kv("/prefix/10.0.0.1")) },
        ];
        apply_events(&events, "/prefix", &ring_arc, &router, &mut managed);

        assert_eq!(ring_arc.nodes(), vec!["10.0.0.1".to_string()]);
    }
}
