use super::types::*;
use super::GatewayConfig;
use std::path::Path;

#[test]
fn test_load_missing_file_uses_defaults() {
    let cfg = GatewayConfig::load(Path::new("nonexistent.toml")).unwrap();
    assert_eq!(cfg.mode, Mode::Dns);
    assert_eq!(cfg.port, 3000);
    assert_eq!(cfg.dns.srv_record, "ws-operator.local");
}

#[test]
fn test_load_toml_config() {
    let toml_str = r#"
mode = "cluster"
port = 4000

[cluster]
endpoints = ["http://etcd-0:2379"]
prefix = "/ws-proxy-headless/endpoints"
"#;
    let tmp = std::env::temp_dir().join("ws_lb_test_config.toml");
    std::fs::write(&tmp, toml_str).unwrap();
    let cfg = GatewayConfig::load(&tmp).unwrap();
    assert_eq!(cfg.mode, Mode::Cluster);
    assert_eq!(cfg.port, 4000);
    assert_eq!(cfg.cluster.endpoints, vec!["http://etcd-0:2379"]);
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_env_override_srv_record() {
    std::env::set_var("WS_OPERATOR_SRV_DNS_RECORD", "custom.local");
    let cfg = GatewayConfig::load(Path::new("nonexistent.toml")).unwrap();
    assert_eq!(cfg.dns.srv_record, "custom.local");
    std::env::remove_var("WS_OPERATOR_SRV_DNS_RECORD");
}

#[test]
fn test_validate_cluster_mode_requires_endpoints() {
    let cfg = GatewayConfig {
        mode: Mode::Cluster,
        cluster: ClusterConfig {
            endpoints: vec![],
            ..ClusterConfig::default()
        },
        ..GatewayConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_empty_srv_record_fails() {
    let cfg = GatewayConfig {
        dns: DnsConfig {
            srv_record: String::new(),
            ..DnsConfig::default()
        },
        ..GatewayConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_kubernetes_mode_alias_is_cluster() {
    assert!(Mode::Kubernetes.is_cluster());
    assert!(Mode::Cluster.is_cluster());
    assert!(!Mode::Dns.is_cluster());
}

#[test]
fn test_unsupported_format() {
    let tmp = std::env::temp_dir().join("ws_lb_test.yml");
    std::fs::write(&tmp, "key: value").unwrap();
    assert!(GatewayConfig::load(&tmp).is_err());
    std::fs::remove_file(&tmp).ok();
}
