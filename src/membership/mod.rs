pub mod cluster;
pub mod dns;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::config::GatewayConfig;
use crate::error::LbError;
use crate::ring::Ring;
use crate::router::Router;

/// Bootstraps whichever membership source variant is configured (§4.2):
/// DNS-SRV snapshot or cluster-endpoints watch. Returns once the initial
/// snapshot has landed and `ready` has been flipped; a fatal initialization
/// failure (no shards discovered, watch never syncs) propagates to the
/// caller, which aborts the process per the *Config* error kind (§7).
pub async fn start(
    config: &GatewayConfig,
    ring: Arc<Ring>,
    router: Arc<Router>,
    ready: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
) -> Result<(), LbError> {
    if config.mode.is_cluster() {
        cluster::bootstrap(&config.cluster, ring, router, ready, shutdown).await
    } else {
        dns::bootstrap(&config.dns, &ring).await?;
        ready.store(true, Ordering::Release);
        Ok(())
    }
}
