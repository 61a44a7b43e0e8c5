use serde::{Deserialize, Serialize};

/// Top-level process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Membership source selection: `dns` or `cluster`.
    #[serde(default)]
    pub mode: Mode,

    /// Client-facing listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enables verbose logging.
    #[serde(default)]
    pub debug: bool,

    /// Admin listen address (health/ready/metrics).
    #[serde(default = "default_admin_listen")]
    pub admin_listen: String,

    #[serde(default)]
    pub dns: DnsConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            port: default_port(),
            debug: false,
            admin_listen: default_admin_listen(),
            dns: DnsConfig::default(),
            cluster: ClusterConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_admin_listen() -> String {
    "0.0.0.0:9091".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Dns,
    Cluster,
    /// Accepted for compatibility with the source's CLI surface; behaves as `Cluster`.
    Kubernetes,
}

impl Mode {
    pub fn is_cluster(self) -> bool {
        matches!(self, Mode::Cluster | Mode::Kubernetes)
    }
}

/// DNS-SRV membership variant settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// SRV record name to resolve at startup.
    #[serde(default = "default_srv_record")]
    pub srv_record: String,

    /// Per-dial resolver timeout (seconds).
    #[serde(default = "default_dns_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            srv_record: default_srv_record(),
            timeout_secs: default_dns_timeout_secs(),
        }
    }
}

fn default_srv_record() -> String {
    "ws-operator.local".to_string()
}

fn default_dns_timeout_secs() -> u64 {
    5
}

/// Cluster-endpoints-watch membership variant settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Coordination-store endpoints (the store backing the watched membership prefix).
    #[serde(default = "default_cluster_endpoints")]
    pub endpoints: Vec<String>,

    /// Key prefix watched for shard membership, one key per shard address.
    /// Named after the `Endpoints` resource this variant models (§4.2).
    #[serde(default = "default_cluster_prefix")]
    pub prefix: String,

    /// Port suffix appended by the Router when annotating a shard for dial (§4.3).
    #[serde(default = "default_shard_port")]
    pub shard_port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            endpoints: default_cluster_endpoints(),
            prefix: default_cluster_prefix(),
            shard_port: default_shard_port(),
            username: None,
            password: None,
        }
    }
}

fn default_cluster_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".to_string()]
}

fn default_cluster_prefix() -> String {
    "/ws-proxy-headless/endpoints".to_string()
}

fn default_shard_port() -> u16 {
    3000
}
