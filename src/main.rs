#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use ws_shard_lb::config::Mode;
use ws_shard_lb::server;

#[derive(Parser)]
#[command(name = "ws-shard-lb", about = "Stateful WebSocket shard load balancer")]
struct Cli {
    /// Path to gateway config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Client-facing listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Membership source: `dns` or `cluster` (`kubernetes` accepted as an alias for `cluster`)
    #[arg(short, long)]
    mode: Option<String>,

    /// Enables verbose logging
    #[arg(long)]
    debug: bool,

    /// Admin API listen address (health/ready/metrics)
    #[arg(long)]
    admin_listen: Option<String>,
}

fn parse_mode(raw: &str) -> Result<Mode> {
    match raw.to_ascii_lowercase().as_str() {
        "dns" => Ok(Mode::Dns),
        "cluster" => Ok(Mode::Cluster),
        "kubernetes" => Ok(Mode::Kubernetes),
        other => bail!("unknown --mode {other:?}, expected dns|cluster|kubernetes"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mode = cli.mode.as_deref().map(parse_mode).transpose()?;

    let worker_threads = server::runtime::get_container_cpu_limit();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
        config_path: cli.config,
        port: cli.port,
        mode,
        debug: cli.debug,
        admin_listen: cli.admin_listen,
    }))
}
