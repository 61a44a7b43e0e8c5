mod admin;
pub mod bootstrap;
pub mod controller;
pub mod runtime;
mod state;

pub use state::GatewayState;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};

/// Bound on how long the accept loop waits for live Connections to drain
/// naturally on shutdown before the caller force-closes what remains (§10.6).
const DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Runs the client-facing accept loop (C5, §4.5): every accepted TCP stream
/// is handed to the Controller's upgrade handshake. Unlike the admin server
/// this does not serve plain HTTP — `accept_hdr_async` performs the upgrade
/// itself rather than going through hyper. Stops accepting on `shutdown`,
/// then waits up to `DRAIN_TIMEOUT` for already-accepted Connections to close
/// on their own before returning; any stragglers are the caller's job to
/// force-close (`GatewayState::close_all_connections`).
pub async fn run_controller_server(
    listen: &str,
    state: GatewayState,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "server: controller listening");

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                info!("server: controller: stop accepting new connections, draining...");
                break;
            }
        };

        let (stream, peer_addr) = match accepted {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "server: controller: accept failed");
                continue;
            }
        };

        let state = state.clone();
        tokio::spawn(async move {
            controller::accept_connection(stream, peer_addr, state).await;
        });
    }

    let active = state.connections.lock().expect("connection table lock poisoned").len();
    if active > 0 {
        info!(active, "server: controller: waiting for connections to drain");
        let drain = async {
            loop {
                let empty = state.connections.lock().expect("connection table lock poisoned").is_empty();
                if empty {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        };
        match tokio::time::timeout(DRAIN_TIMEOUT, drain).await {
            Ok(_) => info!("server: controller: all connections drained"),
            Err(_) => {
                let remaining = state.connections.lock().expect("connection table lock poisoned").len();
                info!(
                    remaining,
                    timeout_secs = DRAIN_TIMEOUT.as_secs(),
                    "server: controller: drain timeout, connections still active"
                );
            }
        }
    }

    Ok(())
}

/// Runs the admin HTTP server (`/health`, `/ready`, `/metrics`, §10.5).
pub async fn run_admin_server(listen: &str, state: GatewayState) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "server: admin listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { admin::handle_admin(req, state) }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!(error = %e, "server: admin: connection error");
                }
            }
        });
    }
}
