use std::net::IpAddr;
use std::time::Duration;

use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::Resolver;

use crate::config::DnsConfig;
use crate::error::LbError;
use crate::ring::Ring;

/// Resolves the configured SRV record once and adds every discovered
/// `host:port` target to the ring. No watch semantics (§4.2) — this is a
/// one-shot snapshot taken at process startup; a failure here is fatal
/// (no shards discovered means every request would 400).
pub async fn bootstrap(cfg: &DnsConfig, ring: &Ring) -> Result<(), LbError> {
    let timeout = Duration::from_secs(cfg.timeout_secs);
    let srv_name = format!("{}.", cfg.srv_record.trim_end_matches('.'));

    let srv_lookup = match resolve_srv(&srv_name, cfg, timeout).await {
        Ok(lookup) => lookup,
        Err(e) => {
            return Err(LbError::Config(format!(
                "dns: srv lookup of {srv_name} failed: {e}"
            )))
        }
    };

    let mut targets = Vec::new();
    for srv in srv_lookup.iter() {
        let target = srv.target().to_utf8();
        let port = srv.port();
        let resolver = build_resolver(cfg);
        let ip_lookup = match tokio::time::timeout(timeout, resolver.lookup_ip(target.clone())).await
        {
            Ok(Ok(lookup)) => lookup,
            Ok(Err(e)) => {
                tracing::warn!(target = %target, error = %e, "dns: A/AAAA lookup failed, skipping target");
                continue;
            }
            Err(_) => {
                tracing::warn!(target = %target, "dns: A/AAAA lookup timed out, skipping target");
                continue;
            }
        };
        if let Some(addr) = ip_lookup.iter().next() {
            targets.push(format_host_port(addr, port));
        }
    }

    if targets.is_empty() {
        return Err(LbError::Config(format!(
            "dns: srv record {srv_name} resolved no usable targets"
        )));
    }

    for target in &targets {
        ring.add(target);
    }
    metrics::gauge!("ws_lb_ring_size").set(ring.len() as f64);
    tracing::info!(count = targets.len(), record = %cfg.srv_record, "membership: dns snapshot loaded");
    Ok(())
}

fn format_host_port(addr: IpAddr, port: u16) -> String {
    match addr {
        IpAddr::V4(v4) => format!("{v4}:{port}"),
        IpAddr::V6(v6) => format!("[{v6}]:{port}"),
    }
}

/// Resolver policy (§4.2): prefer a pure-Rust resolver; first attempt the
/// loopback nameserver on UDP 53, falling back to the system resolver on
/// error. The presence of `KUBERNETES_SERVICE_HOST` (§6) selects the system
/// resolver directly, mirroring the source's in-cluster resolver assumption.
async fn resolve_srv(
    srv_name: &str,
    cfg: &DnsConfig,
    timeout: Duration,
) -> anyhow::Result<hickory_resolver::lookup::SrvLookup> {
    if std::env::var("KUBERNETES_SERVICE_HOST").is_ok() {
        let resolver = system_resolver();
        return Ok(resolver.srv_lookup(srv_name).await?);
    }

    let loopback = build_resolver(cfg);
    match tokio::time::timeout(timeout, loopback.srv_lookup(srv_name)).await {
        Ok(Ok(lookup)) => Ok(lookup),
        _ => {
            tracing::debug!("dns: loopback resolver unavailable, falling back to system resolver");
            let resolver = system_resolver();
            Ok(resolver.srv_lookup(srv_name).await?)
        }
    }
}

fn build_resolver(cfg: &DnsConfig) -> Resolver<TokioConnectionProvider> {
    let loopback_ip: IpAddr = "127.0.0.1".parse().expect("valid loopback literal");
    let config = ResolverConfig::from_parts(
        None,
        vec![],
        NameServerConfigGroup::from_ips_clear(&[loopback_ip], 53, true),
    );
    let opts = ResolverOpts {
        timeout: Duration::from_secs(cfg.timeout_secs),
        ..ResolverOpts::default()
    };
    Resolver::builder_with_config(config, TokioConnectionProvider::default())
        .with_options(opts)
        .build()
}

fn system_resolver() -> Resolver<TokioConnectionProvider> {
    Resolver::builder_tokio().expect("system resolver configuration unavailable").build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_host_port_v4() {
        let addr: IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(format_host_port(addr, 3000), "10.1.2.3:3000");
    }

    #[test]
    fn test_format_host_port_v6() {
        let addr: IpAddr = "::1".parse().unwrap();
        assert_eq!(format_host_port(addr, 3000), "[::1]:3000");
    }
}
