use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for switch/dial latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`, `gauge!`,
/// `histogram!`) can be used anywhere in the codebase. The `PrometheusHandle`
/// is retained solely for rendering the `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric descriptions.
    ///
    /// Must be called **once** at startup before any `counter!` / `gauge!` /
    /// `histogram!` calls.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        // connections
        describe_gauge!(
            "ws_lb_connections_active",
            Unit::Count,
            "Number of live client connections currently tunneled to a shard"
        );
        describe_counter!(
            "ws_lb_connections_total",
            Unit::Count,
            "Total client connections accepted, labeled by outcome"
        );

        // routing
        describe_gauge!(
            "ws_lb_ring_size",
            Unit::Count,
            "Number of shards currently registered in the rendezvous ring"
        );
        describe_counter!(
            "ws_lb_route_rejected_total",
            Unit::Count,
            "Total upgrade requests rejected for missing identity or no route"
        );

        // switching
        describe_counter!(
            "ws_lb_switches_total",
            Unit::Count,
            "Total upstream switches performed, labeled by outcome"
        );
        describe_histogram!(
            "ws_lb_switch_duration_seconds",
            Unit::Seconds,
            "Time spent performing a single upstream switch, cancel-ack through re-dial"
        );
        describe_counter!(
            "ws_lb_switch_ack_timeouts_total",
            Unit::Count,
            "Total switches that proceeded without receiving a cancellation ack within the bound"
        );
        describe_counter!(
            "ws_lb_upstream_dial_failures_total",
            Unit::Count,
            "Total upstream dial failures, labeled by phase (start|switch)"
        );

        // rebalance pipeline
        describe_gauge!(
            "ws_lb_rebalance_queue_depth",
            Unit::Count,
            "Number of rebalance directives currently queued for the controller consumer"
        );
        describe_counter!(
            "ws_lb_rebalance_directives_total",
            Unit::Count,
            "Total rebalance directives emitted by the router"
        );

        // membership
        describe_counter!(
            "ws_lb_membership_watch_errors_total",
            Unit::Count,
            "Total transient membership-watch errors, recovered by reconnect"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
