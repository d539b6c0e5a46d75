// file: src/config/cluster.rs
// version: 1.0.0
// guid: 8d2e7b51-0c3a-4f6e-a9d8-5e1f2a7c3b90

//! Installation request structures

use super::{CniProvider, InstallationMode, NodeRole, Settings};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Port the API server listens on, and the load balancer fronts
pub const API_SERVER_PORT: u16 = 6443;

/// One machine participating in an HA installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NodeConfig {
    /// IPv4 address or resolvable hostname
    #[validate(length(min = 1, message = "host is required"))]
    pub host: String,
    pub role: NodeRole,
    #[serde(default = "default_ssh_user")]
    #[validate(length(min = 1, message = "SSH username is required"))]
    pub ssh_user: String,
    /// Private key used for authentication; `~` is expanded
    #[serde(default)]
    pub ssh_key_path: Option<PathBuf>,
    #[serde(default, skip_serializing)]
    pub ssh_key_passphrase: Option<String>,
    #[serde(default, skip_serializing)]
    pub ssh_password: Option<String>,
    #[serde(default = "default_ssh_port")]
    #[validate(range(min = 1, message = "SSH port must be between 1 and 65535"))]
    pub ssh_port: u16,
    #[serde(default = "default_ssh_timeout_secs")]
    #[validate(range(min = 1, message = "SSH timeout must be positive"))]
    pub ssh_timeout_secs: u64,
}

fn default_ssh_user() -> String {
    "ubuntu".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_timeout_secs() -> u64 {
    30
}

impl NodeConfig {
    /// Node with SSH defaults taken from settings
    pub fn new(host: impl Into<String>, role: NodeRole, settings: &Settings) -> Self {
        Self {
            host: host.into(),
            role,
            ssh_user: settings.ssh.default_user.clone(),
            ssh_key_path: None,
            ssh_key_passphrase: None,
            ssh_password: None,
            ssh_port: settings.ssh.default_port,
            ssh_timeout_secs: settings.ssh.connection_timeout_secs,
        }
    }

    pub fn with_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.ssh_key_path = Some(key_path.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.ssh_password = Some(password.into());
        self
    }

    pub fn ssh_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_timeout_secs)
    }

    /// Key path with `~` expanded
    pub fn expanded_key_path(&self) -> Option<PathBuf> {
        self.ssh_key_path.as_ref().map(|p| {
            let raw = p.to_string_lossy();
            PathBuf::from(shellexpand::tilde(raw.as_ref()).into_owned())
        })
    }

    /// `host:port` for the SSH transport
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.ssh_port)
    }
}

/// Immutable description of one requested installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationConfig {
    pub mode: InstallationMode,
    #[serde(default = "default_k8s_version")]
    pub k8s_version: String,
    #[serde(default = "default_cni")]
    pub cni_provider: CniProvider,
    #[serde(default = "default_pod_cidr")]
    pub pod_cidr: String,
    #[serde(default = "default_service_cidr")]
    pub service_cidr: String,
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
    #[serde(default = "default_true")]
    pub enable_rbac: bool,
    #[serde(default = "default_true")]
    pub enable_network_policies: bool,
    #[serde(default = "default_true")]
    pub enable_monitoring: bool,
    /// Ordered node list; empty for all-in-one installs
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

fn default_k8s_version() -> String {
    "1.30".to_string()
}

fn default_cni() -> CniProvider {
    CniProvider::Cilium
}

fn default_pod_cidr() -> String {
    "10.10.0.0/16".to_string()
}

fn default_service_cidr() -> String {
    "10.96.0.0/12".to_string()
}

fn default_cluster_name() -> String {
    "kubernetes".to_string()
}

fn default_true() -> bool {
    true
}

impl InstallationConfig {
    /// All-in-one request populated from settings defaults
    pub fn all_in_one(settings: &Settings) -> Self {
        Self {
            mode: InstallationMode::AllInOne,
            k8s_version: settings.k8s.default_version.clone(),
            cni_provider: settings.k8s.default_cni,
            pod_cidr: settings.k8s.default_pod_cidr.clone(),
            service_cidr: settings.k8s.default_service_cidr.clone(),
            cluster_name: default_cluster_name(),
            enable_rbac: true,
            enable_network_policies: true,
            enable_monitoring: true,
            nodes: Vec::new(),
        }
    }

    /// HA request over the given nodes, populated from settings defaults
    pub fn ha_secure(settings: &Settings, nodes: Vec<NodeConfig>) -> Self {
        Self {
            mode: InstallationMode::HaSecure,
            nodes,
            ..Self::all_in_one(settings)
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.k8s_version = version.into();
        self
    }

    pub fn with_cni(mut self, cni: CniProvider) -> Self {
        self.cni_provider = cni;
        self
    }

    fn nodes_with_role(&self, role: NodeRole) -> impl Iterator<Item = &NodeConfig> {
        self.nodes.iter().filter(move |n| n.role == role)
    }

    pub fn masters(&self) -> Vec<&NodeConfig> {
        self.nodes_with_role(NodeRole::Master).collect()
    }

    pub fn workers(&self) -> Vec<&NodeConfig> {
        self.nodes_with_role(NodeRole::Worker).collect()
    }

    pub fn load_balancers(&self) -> Vec<&NodeConfig> {
        self.nodes_with_role(NodeRole::Loadbalancer).collect()
    }

    pub fn first_master(&self) -> Option<&NodeConfig> {
        self.nodes_with_role(NodeRole::Master).next()
    }

    /// Address every kubelet and kubectl uses to reach the API server
    pub fn control_plane_endpoint(&self) -> String {
        match self.load_balancers().first() {
            Some(lb) => format!("{}:{}", lb.host, API_SERVER_PORT),
            None => format!("127.0.0.1:{}", API_SERVER_PORT),
        }
    }

    /// Nodes that should register with the API server
    pub fn expected_node_count(&self) -> usize {
        match self.mode {
            InstallationMode::AllInOne => 1,
            InstallationMode::HaSecure => self.masters().len() + self.workers().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ha_nodes(settings: &Settings) -> Vec<NodeConfig> {
        vec![
            NodeConfig::new("10.0.0.10", NodeRole::Loadbalancer, settings),
            NodeConfig::new("10.0.0.11", NodeRole::Master, settings),
            NodeConfig::new("10.0.0.12", NodeRole::Master, settings),
            NodeConfig::new("10.0.0.13", NodeRole::Master, settings),
            NodeConfig::new("10.0.0.21", NodeRole::Worker, settings),
        ]
    }

    #[test]
    fn test_role_queries_preserve_order() {
        let settings = Settings::default();
        let config = InstallationConfig::ha_secure(&settings, ha_nodes(&settings));

        let masters: Vec<&str> = config.masters().iter().map(|n| n.host.as_str()).collect();
        assert_eq!(masters, vec!["10.0.0.11", "10.0.0.12", "10.0.0.13"]);
        assert_eq!(config.first_master().unwrap().host, "10.0.0.11");
        assert_eq!(config.control_plane_endpoint(), "10.0.0.10:6443");
        assert_eq!(config.expected_node_count(), 4);
    }

    #[test]
    fn test_yaml_defaults_fill_missing_fields() {
        let yaml = r#"
mode: ha_secure
nodes:
  - host: 10.0.0.10
    role: loadbalancer
  - host: 10.0.0.11
    role: master
    ssh_user: root
    ssh_port: 2222
"#;
        let config: InstallationConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.k8s_version, "1.30");
        assert_eq!(config.cni_provider, CniProvider::Cilium);
        assert_eq!(config.nodes[0].ssh_user, "ubuntu");
        assert_eq!(config.nodes[1].address(), "10.0.0.11:2222");
        assert_eq!(config.nodes[1].ssh_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let settings = Settings::default();
        let node = NodeConfig::new("10.0.0.11", NodeRole::Master, &settings).with_password("hunter2");
        let json = serde_json::to_string(&node).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_all_in_one_uses_local_endpoint() {
        let config = InstallationConfig::all_in_one(&Settings::default());
        assert!(config.nodes.is_empty());
        assert_eq!(config.control_plane_endpoint(), "127.0.0.1:6443");
        assert_eq!(config.expected_node_count(), 1);
    }
}
