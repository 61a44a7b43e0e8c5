pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use anyhow::Result;
use std::path::Path;

impl GatewayConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides. When the file does not exist, built-in defaults are
    /// used — allowing the process to start with zero configuration for local
    /// development.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: GatewayConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            GatewayConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(mode = ?config.mode, port = config.port, "loaded configuration");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WS_OPERATOR_SRV_DNS_RECORD") {
            self.dns.srv_record = v;
        }
        if let Ok(v) = std::env::var("WS_LB_CLUSTER_ENDPOINTS") {
            self.cluster.endpoints = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("WS_LB_CLUSTER_PREFIX") {
            self.cluster.prefix = v;
        }
        if let Ok(v) = std::env::var("WS_LB_ADMIN_LISTEN") {
            self.admin_listen = v;
        }
        if std::env::var("KUBERNETES_SERVICE_HOST").is_ok() {
            // Presence alone changes DNS-variant resolver policy (§6); no config field to set.
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.mode.is_cluster() && self.cluster.endpoints.is_empty() {
            anyhow::bail!("cluster mode requires at least one coordination-store endpoint");
        }
        if self.dns.srv_record.is_empty() {
            anyhow::bail!("dns srv_record cannot be empty");
        }
        Ok(())
    }
}
