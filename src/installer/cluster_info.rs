// file: src/installer/cluster_info.rs
// version: 1.0.0
// guid: 3b9e1c47-8d2f-4a60-b7e4-0c5a9f2d6e18

//! Facts about a finished cluster, surfaced to the caller on success

use crate::config::{CniProvider, InstallationConfig, InstallationMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One row of `kubectl get nodes -o wide`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub name: String,
    pub status: String,
    pub roles: String,
    pub age: String,
    pub version: String,
    pub internal_ip: Option<String>,
}

impl ClusterNode {
    pub fn is_ready(&self) -> bool {
        self.status == "Ready"
    }
}

/// Parse `kubectl get nodes [-o wide] --no-headers` output
pub fn parse_nodes(output: &str) -> Vec<ClusterNode> {
    output
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 5 {
                return None;
            }
            Some(ClusterNode {
                name: cols[0].to_string(),
                status: cols[1].to_string(),
                roles: cols[2].to_string(),
                age: cols[3].to_string(),
                version: cols[4].to_string(),
                internal_ip: cols.get(5).map(|s| s.to_string()),
            })
        })
        .collect()
}

/// Parse `uniq -c` output of namespace names into counts
pub fn parse_pod_counts(output: &str) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for line in output.lines() {
        let mut cols = line.split_whitespace();
        let (Some(count), Some(namespace)) = (cols.next(), cols.next()) else {
            continue;
        };
        if let Ok(count) = count.parse::<u32>() {
            *counts.entry(namespace.to_string()).or_insert(0) += count;
        }
    }
    counts
}

/// Cluster facts recorded when an installation succeeds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub installation_id: String,
    pub mode: InstallationMode,
    pub kubernetes_version: String,
    pub cni_provider: CniProvider,
    pub pod_cidr: String,
    pub service_cidr: String,
    pub kubeconfig_path: PathBuf,
    pub nodes: Vec<ClusterNode>,
    pub pod_count_by_namespace: BTreeMap<String, u32>,
}

impl ClusterInfo {
    pub fn new(
        installation_id: impl Into<String>,
        config: &InstallationConfig,
        kubeconfig_path: impl Into<PathBuf>,
        nodes: Vec<ClusterNode>,
        pod_count_by_namespace: BTreeMap<String, u32>,
    ) -> Self {
        Self {
            installation_id: installation_id.into(),
            mode: config.mode,
            kubernetes_version: config.k8s_version.clone(),
            cni_provider: config.cni_provider,
            pod_cidr: config.pod_cidr.clone(),
            service_cidr: config.service_cidr.clone(),
            kubeconfig_path: kubeconfig_path.into(),
            nodes,
            pod_count_by_namespace,
        }
    }

    pub fn total_pods(&self) -> u32 {
        self.pod_count_by_namespace.values().sum()
    }

    /// Short text telling the operator how to reach the cluster
    pub fn access_instructions(&self) -> String {
        let kubeconfig = self.kubeconfig_path.display();
        let mut text = format!(
            "Kubernetes {} cluster ready ({} nodes, {} pods, CNI {})\n",
            self.kubernetes_version,
            self.nodes.len(),
            self.total_pods(),
            self.cni_provider
        );
        text.push_str(&format!("  export KUBECONFIG={}\n", kubeconfig));
        text.push_str("  kubectl get nodes\n");
        text.push_str("  kubectl get pods --all-namespaces\n");
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    const NODES_WIDE: &str = "\
master-1   Ready    control-plane   12m   v1.30.2   10.0.0.11   <none>   Ubuntu 22.04.4 LTS   5.15.0-105-generic   containerd://1.7.12
worker-1   NotReady <none>          3m    v1.30.2   10.0.0.21   <none>   Ubuntu 22.04.4 LTS   5.15.0-105-generic   containerd://1.7.12
";

    #[test]
    fn test_parse_nodes_wide_output() {
        let nodes = parse_nodes(NODES_WIDE);

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "master-1");
        assert!(nodes[0].is_ready());
        assert_eq!(nodes[0].internal_ip.as_deref(), Some("10.0.0.11"));
        assert!(!nodes[1].is_ready());
    }

    #[test]
    fn test_parse_nodes_skips_short_lines() {
        assert!(parse_nodes("\nNo resources found\n").is_empty());
    }

    #[test]
    fn test_parse_pod_counts() {
        let counts = parse_pod_counts("      7 kube-system\n      2 local-path-storage\n garbage\n");

        assert_eq!(counts.get("kube-system"), Some(&7));
        assert_eq!(counts.get("local-path-storage"), Some(&2));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn test_access_instructions_name_kubeconfig() {
        // Arrange
        let config = InstallationConfig::all_in_one(&Settings::default());
        let info = ClusterInfo::new(
            "abcd1234",
            &config,
            "/tmp/kube/config-abcd1234",
            parse_nodes(NODES_WIDE),
            parse_pod_counts("      7 kube-system\n"),
        );

        // Act
        let text = info.access_instructions();

        // Assert
        assert!(text.contains("export KUBECONFIG=/tmp/kube/config-abcd1234"));
        assert!(text.contains("2 nodes, 7 pods"));
    }
}
