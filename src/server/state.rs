use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use crate::config::GatewayConfig;
use crate::connection::Connection;
use crate::metrics::Metrics;
use crate::ring::Ring;
use crate::router::Router;

/// Shared gateway state, cheaply cloneable.
///
/// Owns the three process singletons named in spec.md §5 — Ring, Router, and
/// the Connection table — plus the ambient config cell and metrics handle.
/// No process-wide mutation happens outside these, aside from what the
/// membership source itself performs on the Ring.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<ArcSwap<GatewayConfig>>,
    pub metrics: Metrics,
    pub ring: Arc<Ring>,
    pub router: Arc<Router>,
    /// identity -> live Connection. Owned exclusively by the Controller (C5):
    /// the HTTP accept path inserts, the rebalance consumer reads/removes.
    /// A single mutex, per spec.md §5 ("Connection table: single mutex") —
    /// contention is low (an insert per upgrade, a lookup per rebalance
    /// directive), so a plain `Mutex<HashMap<_, _>>` is all this needs.
    pub connections: Arc<Mutex<HashMap<String, Arc<Connection>>>>,
    /// This process's reported identity for the `x-ws-operator-proxy-instance`
    /// observability header (§6).
    pub hostname: Arc<str>,
    /// Flips to `true` once the membership source has produced its initial
    /// snapshot; reported on `/ready` (§10.5).
    ready: Arc<AtomicBool>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Self {
        let port_suffix = if config.mode.is_cluster() {
            Some(config.cluster.shard_port)
        } else {
            None
        };

        let ring = Arc::new(Ring::new());
        let router = Arc::new(Router::new(ring.clone(), port_suffix));
        let metrics = Metrics::install();
        metrics::gauge!("ws_lb_ring_size").set(0.0);

        Self {
            config: Arc::new(ArcSwap::new(Arc::new(config))),
            metrics,
            ring,
            router,
            connections: Arc::new(Mutex::new(HashMap::new())),
            hostname: Arc::from(resolve_hostname()),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn ready_handle(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Closes and removes every tracked Connection. Used during graceful
    /// shutdown (§10.6) to bound the drain window.
    pub async fn close_all_connections(&self) {
        let drained: Vec<Arc<Connection>> = {
            let mut table = self.connections.lock().expect("connection table lock poisoned");
            table.drain().map(|(_, conn)| conn).collect()
        };
        for conn in drained {
            conn.close().await;
        }
    }
}

/// Reads `HOSTNAME` directly (§6); falls back to the OS-reported hostname
/// when unset, matching this lineage's existing use of the `hostname` crate.
fn resolve_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string())
    })
}
