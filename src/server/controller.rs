use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{
    Callback, ErrorResponse, Request as HandshakeRequest, Response as HandshakeResponse,
};
use http::StatusCode;
use tracing::{debug, error, warn};

use crate::connection::Connection;
use crate::router::RebalanceDirective;
use crate::server::GatewayState;

const IDENTITY_HEADER: &str = "ws-user-id";
const PROXY_INSTANCE_HEADER: &str = "x-ws-operator-proxy-instance";
const UPSTREAM_HOST_HEADER: &str = "x-ws-operator-upstream-host";

/// Accepts one downstream TCP connection: performs the WebSocket upgrade
/// handshake (C5, §4.5), resolving the target shard as part of the
/// handshake callback so the response headers can be annotated before the
/// 101 is sent, then wires up a Connection and hands it to the pump.
pub async fn accept_connection(stream: TcpStream, peer: SocketAddr, state: GatewayState) {
    let decision: Arc<Mutex<Option<RouteDecision>>> = Arc::new(Mutex::new(None));
    let callback = RouteCallback {
        router: state.router.clone(),
        hostname: state.hostname.clone(),
        decision: decision.clone(),
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(%peer, error = %e, "controller: upgrade rejected");
            metrics::counter!("ws_lb_connections_total", "outcome" => "rejected").increment(1);
            return;
        }
    };

    let Some(RouteDecision { identity, shard }) = decision.lock().expect("decision lock poisoned").take()
    else {
        // The callback always populates this on Ok(response); reaching here
        // would mean accept_hdr_async somehow succeeded without running it.
        error!(%peer, "controller: upgrade succeeded with no route decision");
        return;
    };

    let (sink, stream) = ws_stream.split();
    let downstream_sink: crate::connection::BoxedSink = Box::pin(sink);
    let downstream_stream: crate::connection::BoxedStream = Box::pin(stream);

    let connection = Arc::new(Connection::new(
        identity.clone(),
        shard.clone(),
        downstream_sink,
        downstream_stream,
    ));

    if let Err(e) = connection.start().await {
        warn!(%peer, identity = %identity, error = %e, "controller: initial upstream dial failed, dropping connection");
        metrics::counter!("ws_lb_upstream_dial_failures_total", "phase" => "start").increment(1);
        metrics::counter!("ws_lb_connections_total", "outcome" => "dial_failed").increment(1);
        connection.close().await;
        return;
    }

    metrics::counter!("ws_lb_connections_total", "outcome" => "accepted").increment(1);
    metrics::gauge!("ws_lb_connections_active").increment(1.0);
    state
        .connections
        .lock()
        .expect("connection table lock poisoned")
        .insert(identity.clone(), connection.clone());

    // Reaper: once the Connection tears itself down (peer close, pump error,
    // or a failed switch), drop its table entry so it cannot be targeted by
    // a future rebalance directive.
    tokio::spawn(async move {
        connection.closed_notify().await;
        metrics::gauge!("ws_lb_connections_active").decrement(1.0);
        state
            .connections
            .lock()
            .expect("connection table lock poisoned")
            .remove(&identity);
        debug!(identity = %identity, "controller: connection reaped");
    });
}

struct RouteDecision {
    identity: String,
    shard: String,
}

/// Runs inside `accept_hdr_async`'s synchronous handshake step: validates the
/// identity header, resolves a shard, and stashes both for the caller — the
/// only way to get data out of a `Callback` is a shared slot, since the
/// trait itself returns only the HTTP response.
struct RouteCallback {
    router: Arc<crate::router::Router>,
    hostname: Arc<str>,
    decision: Arc<Mutex<Option<RouteDecision>>>,
}

impl Callback for RouteCallback {
    fn on_request(
        self,
        request: &HandshakeRequest,
        mut response: HandshakeResponse,
    ) -> Result<HandshakeResponse, ErrorResponse> {
        let identity = request
            .headers()
            .get(IDENTITY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let Some(identity) = identity else {
            metrics::counter!("ws_lb_route_rejected_total", "reason" => "missing_identity").increment(1);
            return Err(reject(StatusCode::BAD_REQUEST, "missing ws-user-id header"));
        };

        let Some(shard) = self.router.route(&identity) else {
            metrics::counter!("ws_lb_route_rejected_total", "reason" => "no_route").increment(1);
            return Err(reject(StatusCode::BAD_REQUEST, "no shard available"));
        };

        let headers = response.headers_mut();
        if let Ok(value) = self.hostname.parse() {
            headers.insert(PROXY_INSTANCE_HEADER, value);
        }
        if let Ok(value) = shard.parse() {
            headers.insert(UPSTREAM_HOST_HEADER, value);
        }

        *self.decision.lock().expect("decision lock poisoned") = Some(RouteDecision { identity, shard });
        Ok(response)
    }
}

fn reject(status: StatusCode, body: &str) -> ErrorResponse {
    http::Response::builder()
        .status(status)
        .body(Some(body.to_string()))
        .expect("static rejection response is well-formed")
}

/// Single consumer of the Router's rebalance-directive stream (§4.3, §5).
/// Looks up the target Connection by identity; a miss means the connection
/// already closed on its own, which is not an error. A switch failure closes
/// and drops the Connection rather than leaving it pointed at a dead shard.
pub fn spawn_rebalance_consumer(state: GatewayState, shutdown: Arc<tokio::sync::Notify>) {
    let mut directives = state.router.rebalance_stream();
    tokio::spawn(async move {
        loop {
            let directive = tokio::select! {
                directive = directives.recv() => directive,
                _ = shutdown.notified() => return,
            };

            let Some(directive) = directive else {
                warn!("controller: rebalance stream closed, consumer exiting");
                return;
            };

            metrics::counter!("ws_lb_rebalance_directives_total").increment(1);
            metrics::gauge!("ws_lb_rebalance_queue_depth").set(directives.len() as f64);
            apply_directive(&state, directive).await;
        }
    });
}

async fn apply_directive(state: &GatewayState, directive: RebalanceDirective) {
    let Some(connection) = state
        .connections
        .lock()
        .expect("connection table lock poisoned")
        .get(&directive.identity)
        .cloned()
    else {
        return;
    };

    if connection.current_shard() == directive.new_shard {
        return;
    }

    let started = std::time::Instant::now();
    match connection.switch(directive.new_shard.clone()).await {
        Ok(()) => {
            metrics::counter!("ws_lb_switches_total", "outcome" => "success").increment(1);
            metrics::histogram!("ws_lb_switch_duration_seconds").record(started.elapsed().as_secs_f64());
        }
        Err(e) => {
            error!(identity = %directive.identity, error = %e, "controller: switch failed, closing connection");
            metrics::counter!("ws_lb_switches_total", "outcome" => "error").increment(1);
            metrics::counter!("ws_lb_upstream_dial_failures_total", "phase" => "switch").increment(1);
            state
                .connections
                .lock()
                .expect("connection table lock poisoned")
                .remove(&directive.identity);
        }
    }
}
