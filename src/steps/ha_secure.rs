// file: src/steps/ha_secure.rs
// version: 1.0.0
// guid: c1e5a7f3-9b20-4d84-a6f1-3e8d0b5c2a71

//! HA sequence: load balancer, first-master bootstrap, joins, CNI, readiness
//!
//! All commands reach the nodes over SSH. The first master captures the join
//! command and certificate key as facts; later steps render them on the
//! joining nodes.

use super::all_in_one::{
    cni_script, container_runtime_script, kubernetes_components_script, system_prep_script,
    system_ready_script,
};
use super::commands::{self, kubectl, ADMIN_CONF, HAPROXY_CFG, KUBELET_CONF};
use super::{InstallationStep, Probe, Script, StepTarget};
use crate::config::InstallationConfig;
use std::time::Duration;

pub const JOIN_COMMAND_FACT: &str = "join_command";
pub const CERTIFICATE_KEY_FACT: &str = "certificate_key";

fn load_balancer_script(config: &InstallationConfig) -> Script {
    let haproxy_cfg = commands::haproxy_config(&config.masters());
    Script::new()
        .run("Update package index", "apt-get update")
        .run("Install HAProxy", "apt-get install -y haproxy")
        .run(
            "Write HAProxy configuration",
            commands::write_file(HAPROXY_CFG, &haproxy_cfg),
        )
        .run(
            "Validate HAProxy configuration",
            format!("haproxy -c -f {}", HAPROXY_CFG),
        )
        .run("Enable HAProxy", "systemctl enable haproxy")
        .run("Restart HAProxy", "systemctl restart haproxy")
        .check(
            "HAProxy is running",
            Probe::succeeds("systemctl is-active --quiet haproxy"),
        )
}

/// Node preparation: the all-in-one install steps bundled for one host
///
/// Every task is idempotent, so the bundle runs in full on each attempt.
fn prepare_node_script(version: &str) -> Script {
    Script::new()
        .extend(system_prep_script())
        .extend(container_runtime_script())
        .extend(kubernetes_components_script(version))
}

/// Build the HA sequence for the config's nodes
pub fn steps(config: &InstallationConfig) -> Vec<InstallationStep> {
    vec![
        InstallationStep::new(
            "Configure Load Balancer",
            format!(
                "Install HAProxy fronting {} masters on port {}",
                config.masters().len(),
                crate::config::API_SERVER_PORT
            ),
            load_balancer_script(config),
        )
        .on(StepTarget::LoadBalancers)
        .retries(2)
        .timeout_secs(300),
        InstallationStep::new(
            "Prepare Nodes",
            "Configure the kernel, containerd and Kubernetes packages on every node",
            prepare_node_script(&config.k8s_version),
        )
        .on(StepTarget::KubernetesNodes)
        .retries(2)
        .timeout_secs(900),
        InstallationStep::new(
            "Bootstrap First Master",
            format!(
                "Initialize the control plane behind {}",
                config.control_plane_endpoint()
            ),
            Script::new()
                .skip_when(Probe::file_exists(ADMIN_CONF))
                .run_optional("Pull control plane images", "kubeadm config images pull")
                .run_optional("Reset partial kubeadm state", "kubeadm reset -f")
                .run(
                    "Run kubeadm init",
                    commands::kubeadm_init_first_master(config),
                ),
        )
        .on(StepTarget::FirstMaster)
        .retries(1)
        .timeout_secs(600),
        InstallationStep::new(
            "Generate Join Credentials",
            "Create a bootstrap token and upload control plane certificates",
            Script::new()
                .capture(
                    "Join command",
                    "kubeadm token create --print-join-command",
                    JOIN_COMMAND_FACT,
                )
                .capture(
                    "Certificate key",
                    "kubeadm init phase upload-certs --upload-certs | tail -1",
                    CERTIFICATE_KEY_FACT,
                ),
        )
        .on(StepTarget::FirstMaster)
        .retries(2)
        .timeout_secs(120),
        InstallationStep::new(
            "Join Control Plane",
            "Join the remaining masters one at a time",
            Script::new().run_unless(
                "Join as control plane",
                commands::join_control_plane(),
                Probe::file_exists(KUBELET_CONF),
            ),
        )
        .on(StepTarget::JoiningMasters)
        .retries(2)
        .timeout_secs(600),
        InstallationStep::new(
            "Join Workers",
            "Join every worker node",
            Script::new().run_unless(
                "Join as worker",
                commands::join_worker(),
                Probe::file_exists(KUBELET_CONF),
            ),
        )
        .on(StepTarget::Workers)
        .retries(2)
        .timeout_secs(300),
        InstallationStep::new(
            "Install CNI",
            format!(
                "Install {} Container Network Interface across the cluster",
                config.cni_provider
            ),
            cni_script(config, ADMIN_CONF, Duration::from_secs(240)),
        )
        .on(StepTarget::FirstMaster)
        .configure()
        .retries(3)
        .timeout_secs(300),
        InstallationStep::new(
            "Fetch Kubeconfig",
            "Download the admin kubeconfig from the first master",
            Script::new()
                .check(
                    "API server answers through the load balancer",
                    Probe::contains(kubectl(ADMIN_CONF, "cluster-info"), "running"),
                )
                .fetch_kubeconfig(ADMIN_CONF),
        )
        .on(StepTarget::FirstMaster)
        .configure()
        .retries(2)
        .timeout_secs(60),
        InstallationStep::new(
            "Wait for Cluster Ready",
            "Wait for every node and control plane pod to become ready",
            system_ready_script(ADMIN_CONF),
        )
        .on(StepTarget::FirstMaster)
        .configure()
        .retries(1)
        .timeout_secs(600),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NodeConfig, NodeRole, Settings};
    use crate::steps::{StepAction, StepPhase};

    fn config() -> InstallationConfig {
        let s = Settings::default();
        InstallationConfig::ha_secure(
            &s,
            vec![
                NodeConfig::new("10.0.0.10", NodeRole::Loadbalancer, &s),
                NodeConfig::new("10.0.0.11", NodeRole::Master, &s),
                NodeConfig::new("10.0.0.12", NodeRole::Master, &s),
                NodeConfig::new("10.0.0.13", NodeRole::Master, &s),
                NodeConfig::new("10.0.0.21", NodeRole::Worker, &s),
            ],
        )
    }

    #[test]
    fn test_sequence_targets() {
        let steps = steps(&config());

        let plan: Vec<(&str, StepTarget)> = steps.iter().map(|s| (s.name.as_str(), s.target)).collect();

        assert_eq!(
            plan,
            vec![
                ("Configure Load Balancer", StepTarget::LoadBalancers),
                ("Prepare Nodes", StepTarget::KubernetesNodes),
                ("Bootstrap First Master", StepTarget::FirstMaster),
                ("Generate Join Credentials", StepTarget::FirstMaster),
                ("Join Control Plane", StepTarget::JoiningMasters),
                ("Join Workers", StepTarget::Workers),
                ("Install CNI", StepTarget::FirstMaster),
                ("Fetch Kubeconfig", StepTarget::FirstMaster),
                ("Wait for Cluster Ready", StepTarget::FirstMaster),
            ]
        );
        assert_eq!(steps[6].phase, StepPhase::Configure);
        assert_eq!(steps[5].phase, StepPhase::Install);
    }

    #[test]
    fn test_prepare_nodes_does_not_skip_as_a_whole() {
        let steps = steps(&config());

        let outline = steps[1].action.outline();

        assert!(!outline[0].starts_with("skip when"));
        assert!(outline.iter().any(|l| l.starts_with("swapoff -a")));
        assert!(outline.iter().any(|l| l.contains("containerd config default")));
        assert!(outline.iter().any(|l| l == "check: kubeadm version --output=short"));
    }

    #[test]
    fn test_load_balancer_writes_all_masters() {
        let steps = steps(&config());

        let outline = steps[0].action.outline().join("\n");

        assert!(outline.contains("server master-3 10.0.0.13:6443"));
    }
}
