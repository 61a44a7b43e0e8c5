use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use crate::ring::Ring;

/// A single `(identity, new-shard)` rebalance instruction emitted by the
/// Router and consumed by the Controller.
#[derive(Debug, Clone)]
pub struct RebalanceDirective {
    pub identity: String,
    pub new_shard: String,
}

/// Composes the Ring with a decision cache of recently-resolved
/// `identity -> shard` lookups, and emits rebalance directives when a
/// membership update changes a cached decision.
pub struct Router {
    ring: Arc<Ring>,
    decision_cache: Mutex<HashMap<String, String>>,
    tx: mpsc::UnboundedSender<RebalanceDirective>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<RebalanceDirective>>>,
    /// Appended to the ring's bare host result before returning from `route`.
    /// `None` when the membership source already encodes a port (DNS variant).
    port_suffix: Option<u16>,
}

impl Router {
    pub fn new(ring: Arc<Ring>, port_suffix: Option<u16>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            ring,
            decision_cache: Mutex::new(HashMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
            port_suffix,
        }
    }

    /// Resolves `identity` to a shard, recording the decision for future
    /// rebalance diffing. Returns `None` if the ring has no members.
    pub fn route(&self, identity: &str) -> Option<String> {
        let raw = self.ring.lookup(identity);
        if raw.is_empty() {
            return None;
        }
        let annotated = self.annotate(&raw);
        self.decision_cache
            .lock()
            .expect("decision cache lock poisoned")
            .insert(identity.to_string(), annotated.clone());
        Some(annotated)
    }

    /// Takes ownership of the rebalance-directive stream. May only be called
    /// once — the Controller's single rebalance consumer is the only reader.
    pub fn rebalance_stream(&self) -> mpsc::UnboundedReceiver<RebalanceDirective> {
        self.rx
            .lock()
            .expect("rebalance rx lock poisoned")
            .take()
            .expect("rebalance_stream() already taken")
    }

    /// Called by the membership source after an `Updated` event has finished
    /// mutating the ring (§4.2). Diffs every cached decision against a fresh
    /// lookup and emits directives for the ones that moved.
    pub fn on_membership_updated(&self) {
        let mut directives = Vec::new();
        {
            let mut cache = self.decision_cache.lock().expect("decision cache lock poisoned");
            for (identity, old_shard) in cache.iter_mut() {
                let raw = self.ring.lookup(identity);
                let new_shard = self.annotate(&raw);
                if new_shard != *old_shard {
                    directives.push(RebalanceDirective {
                        identity: identity.clone(),
                        new_shard: new_shard.clone(),
                    });
                    *old_shard = new_shard;
                }
            }
        }
        debug!(count = directives.len(), "router: rebalance diff complete");
        for directive in directives {
            // Unbounded FIFO: drops are not permitted.
            let _ = self.tx.send(directive);
        }
    }

    fn annotate(&self, raw: &str) -> String {
        if raw.is_empty() {
            return String::new();
        }
        match self.port_suffix {
            Some(port) => format!("{raw}:{port}"),
            None => raw.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_empty_ring_returns_none() {
        let ring = Arc::new(Ring::new());
        let router = Router::new(ring, Some(3000));
        assert!(router.route("alice").is_none());
    }

    #[test]
    fn test_route_annotates_port_for_cluster_variant() {
        let ring = Arc::new(Ring::new());
        ring.add("10.1.2.3");
        let router = Router::new(ring, Some(3000));
        let shard = router.route("alice").unwrap();
        assert!(shard.ends_with(":3000"));
    }

    #[test]
    fn test_route_does_not_annotate_when_no_port_suffix() {
        let ring = Arc::new(Ring::new());
        ring.add("10.1.2.3:4242");
        let router = Router::new(ring, None);
        assert_eq!(router.route("alice").unwrap(), "10.1.2.3:4242");
    }

    #[test]
    fn test_rebalance_emits_directive_on_change() {
        let ring = Arc::new(Ring::new());
        ring.add("A");
        let router = Router::new(ring.clone(), None);
        let mut stream = router.rebalance_stream();

        router.route("alice"); // decision cache: alice -> A

        ring.add("B");
        ring.add("C");
        router.on_membership_updated();

        // alice's lookup may or may not have changed depending on the hash;
        // force a deterministic case by checking cache consistency instead.
        let new_lookup = ring.lookup("alice");
        if new_lookup != "A" {
            let directive = stream.try_recv().expect("expected a directive");
            assert_eq!(directive.identity, "alice");
            assert_eq!(directive.new_shard, new_lookup);
        } else {
            assert!(stream.try_recv().is_err());
        }
    }

    #[test]
    fn test_rebalance_no_change_emits_nothing() {
        let ring = Arc::new(Ring::new());
        ring.add("A");
        let router = Router::new(ring.clone(), None);
        let mut stream = router.rebalance_stream();

        router.route("alice");
        // Re-trigger without any membership change.
        router.on_membership_updated();

        assert!(stream.try_recv().is_err());
    }
}
