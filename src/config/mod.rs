// file: src/config/mod.rs
// version: 2.0.0
// guid: a1b2c3d4-e5f6-7a8b-9c0d-1e2f3a4b5c6d

//! Configuration module for the Kubernetes auto installer
//!
//! Holds the immutable description of one installation request, the process
//! settings that supply its defaults, and the validation and loading logic.

pub mod cluster;
pub mod loader;
pub mod settings;
pub mod validator;

pub use cluster::{InstallationConfig, NodeConfig, API_SERVER_PORT};
pub use loader::ConfigLoader;
pub use settings::Settings;
pub use validator::validate_installation;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported installation topologies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationMode {
    /// Single local node running control plane and workloads
    AllInOne,
    /// Load balancer plus three or more masters reached over SSH
    HaSecure,
}

impl InstallationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallationMode::AllInOne => "all_in_one",
            InstallationMode::HaSecure => "ha_secure",
        }
    }
}

impl fmt::Display for InstallationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InstallationMode {
    type Err = crate::error::InstallerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all_in_one" | "all-in-one" => Ok(InstallationMode::AllInOne),
            "ha_secure" | "ha-secure" => Ok(InstallationMode::HaSecure),
            _ => Err(crate::error::InstallerError::validation(format!(
                "Unknown installation mode: {}",
                s
            ))),
        }
    }
}

/// Role a machine plays in an HA installation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Worker,
    #[serde(alias = "load_balancer")]
    Loadbalancer,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Worker => "worker",
            NodeRole::Loadbalancer => "loadbalancer",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container Network Interface providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CniProvider {
    Cilium,
    Calico,
    Flannel,
}

impl CniProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CniProvider::Cilium => "cilium",
            CniProvider::Calico => "calico",
            CniProvider::Flannel => "flannel",
        }
    }

    /// Namespace and label selector identifying the provider's agent pods
    pub fn pod_selector(&self) -> (&'static str, &'static str) {
        match self {
            CniProvider::Cilium => ("kube-system", "k8s-app=cilium"),
            CniProvider::Calico => ("kube-system", "k8s-app=calico-node"),
            CniProvider::Flannel => ("kube-flannel", "app=flannel"),
        }
    }

    /// Whether the provider enforces NetworkPolicy objects
    pub fn supports_network_policies(&self) -> bool {
        !matches!(self, CniProvider::Flannel)
    }
}

impl fmt::Display for CniProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CniProvider {
    type Err = crate::error::InstallerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cilium" => Ok(CniProvider::Cilium),
            "calico" => Ok(CniProvider::Calico),
            "flannel" => Ok(CniProvider::Flannel),
            _ => Err(crate::error::InstallerError::validation(format!(
                "Invalid CNI provider '{}'. Valid options: cilium, calico, flannel",
                s
            ))),
        }
    }
}
