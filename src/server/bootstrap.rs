use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{GatewayConfig, Mode};
use crate::{membership, server};

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    /// Overrides `GatewayConfig::port` when set (`--port`).
    pub port: Option<u16>,
    /// Overrides `GatewayConfig::mode` when set (`--mode`).
    pub mode: Option<Mode>,
    /// Overrides `GatewayConfig::debug` when set (`--debug`).
    pub debug: bool,
    pub admin_listen: Option<String>,
}

/// Gateway lifecycle: init -> membership bootstrap -> serve -> shutdown (§10.1).
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing(args.debug);

    let mut config = GatewayConfig::load(&args.config_path)?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if args.debug {
        config.debug = true;
    }
    if let Some(admin_listen) = args.admin_listen {
        config.admin_listen = admin_listen;
    }
    config.validate()?;

    let state = server::GatewayState::new(config);
    let shutdown = Arc::new(Notify::new());

    // Membership bootstrap is synchronous: no shard is known to route to
    // until this returns, so no traffic can be accepted before it completes.
    // A failure here is a Config-kind error (§7) and is fatal.
    membership::start(
        &state.config.load(),
        state.ring.clone(),
        state.router.clone(),
        state.ready_handle(),
        shutdown.clone(),
    )
    .await?;
    state.mark_ready();

    server::controller::spawn_rebalance_consumer(state.clone(), shutdown.clone());

    let admin_addr = state.config.load().admin_listen.clone();
    tokio::spawn({
        let state = state.clone();
        async move {
            if let Err(e) = server::run_admin_server(&admin_addr, state).await {
                tracing::error!("server: admin failed, error={}", e);
            }
        }
    });

    let listen = format!("0.0.0.0:{}", state.config.load().port);
    tracing::info!(%listen, "server: starting gateway");

    let controller_handle = tokio::spawn({
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_controller_server(&listen, state, shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    // run_controller_server itself waits out the bounded drain window for
    // Connections to close naturally; force-close whatever is left after it
    // returns (timeout, or a handful of stragglers).
    if let Err(e) = controller_handle.await {
        tracing::error!("server: controller task error: {}", e);
    }
    state.close_all_connections().await;

    tracing::info!("server: shutdown complete");
    Ok(())
}

/// JSON formatting by default, matching this lineage's production log shipping;
/// `--debug` switches to a human-readable pretty layer with a more verbose
/// default filter (§10.5).
fn init_tracing(debug: bool) {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    let fmt_layer: Box<dyn tracing_subscriber::Layer<tracing_subscriber::Registry> + Send + Sync> =
        if debug {
            Box::new(
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true)
                    .pretty(),
            )
        } else {
            Box::new(
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(false)
                    .json(),
            )
        };

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();

    std::mem::forget(_guard);
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_waiters();
}
