// file: src/steps/all_in_one.rs
// version: 1.0.0
// guid: 4a8c2e90-3d1f-4b67-8e05-c9f7a1d6b2e4

//! Nine-step sequence for a single-node cluster on the local machine

use super::commands::{self, kubectl, ADMIN_CONF};
use super::{InstallationStep, Probe, Script};
use crate::config::InstallationConfig;
use std::time::Duration;

const POLL: Duration = Duration::from_secs(10);

/// Swap, kernel modules and sysctls
pub fn system_prep_script() -> Script {
    commands::system_prep_commands()
        .into_iter()
        .fold(Script::new(), |script, (description, command)| {
            script.run(description, command)
        })
}

/// kubelet, kubeadm and kubectl from pkgs.k8s.io, skipped when kubeadm exists
pub fn kubernetes_components_script(version: &str) -> Script {
    commands::kubernetes_package_commands(version)
        .into_iter()
        .fold(
            Script::new().skip_when(Probe::non_empty("which kubeadm")),
            |script, (description, command)| script.run(description, command),
        )
        .run_optional("Hold Kubernetes packages", "apt-mark hold kubelet kubeadm kubectl")
        .run("Enable kubelet", "systemctl enable --now kubelet")
        .check(
            "kubeadm is installed",
            Probe::succeeds("kubeadm version --output=short"),
        )
}

/// containerd with the systemd cgroup driver, skipped when already active
pub fn container_runtime_script() -> Script {
    commands::containerd_commands()
        .into_iter()
        .fold(
            Script::new().skip_when(Probe::equals("systemctl is-active containerd", "active")),
            |script, (description, command)| script.run(description, command),
        )
        .run_optional("Restart kubelet", "systemctl restart kubelet.service")
        .check(
            "containerd is running",
            Probe::succeeds("systemctl is-active --quiet containerd"),
        )
}

/// CNI manifest plus a wait for the provider's agent pods
pub fn cni_script(config: &InstallationConfig, kubeconfig: &str, timeout: Duration) -> Script {
    let pods = commands::cni_pods_query(config.cni_provider, kubeconfig);
    commands::cni_install_commands(config, kubeconfig)
        .into_iter()
        .fold(
            Script::new().skip_when(Probe::rows(pods.as_str(), 2, &["Running"])),
            |script, (description, command)| script.run(description, command),
        )
        .wait_for(
            format!("{} pods to be ready", config.cni_provider),
            Probe::rows(pods, 2, &["Running"]),
            POLL,
            timeout,
        )
}

/// Build the all-in-one sequence; every step runs on the local host
pub fn steps(config: &InstallationConfig) -> Vec<InstallationStep> {
    let (apply_storage, storage_pods, patch_default) = commands::storage_commands(ADMIN_CONF);
    let kubeconfig_dir = "$HOME/.kube";

    vec![
        InstallationStep::new(
            "System Configuration",
            "Disable swap, load kernel modules and set networking sysctls",
            system_prep_script(),
        )
        .retries(2)
        .timeout_secs(180),
        InstallationStep::new(
            "Install Kubernetes Components",
            format!("Install kubelet, kubeadm and kubectl {}", config.k8s_version),
            kubernetes_components_script(&config.k8s_version),
        )
        .retries(3)
        .timeout_secs(600),
        InstallationStep::new(
            "Install Container Runtime",
            "Install and configure containerd",
            container_runtime_script(),
        )
        .retries(2)
        .timeout_secs(300),
        InstallationStep::new(
            "Initialize Cluster",
            "Bootstrap the control plane with kubeadm",
            Script::new()
                .skip_when(Probe::file_exists(ADMIN_CONF))
                .run_optional("Pull control plane images", "kubeadm config images pull")
                .run("Run kubeadm init", commands::kubeadm_init_all_in_one(config)),
        )
        .retries(1)
        .timeout_secs(600),
        InstallationStep::new(
            "Configure kubectl",
            "Install the admin kubeconfig for the current user and the installation",
            Script::new()
                .run("Create kube directory", format!("mkdir -p {}", kubeconfig_dir))
                .run(
                    "Copy admin kubeconfig",
                    format!("cp -f {} {}/config", ADMIN_CONF, kubeconfig_dir),
                )
                .run(
                    "Set kubeconfig ownership",
                    format!("chown $(id -u):$(id -g) {}/config", kubeconfig_dir),
                )
                .fetch_kubeconfig(ADMIN_CONF)
                .check(
                    "API server answers",
                    Probe::contains(kubectl(ADMIN_CONF, "cluster-info"), "running"),
                ),
        )
        .configure()
        .retries(2)
        .timeout_secs(60),
        InstallationStep::new(
            "Remove Master Taint",
            "Allow workloads on the control-plane node",
            Script::new().run(
                "Remove control-plane taint",
                format!(
                    "{} || true",
                    kubectl(ADMIN_CONF, "taint nodes --all node-role.kubernetes.io/control-plane-")
                ),
            ),
        )
        .configure()
        .retries(2)
        .timeout_secs(60),
        InstallationStep::new(
            "Install CNI",
            format!("Install {} Container Network Interface", config.cni_provider),
            cni_script(config, ADMIN_CONF, Duration::from_secs(240)),
        )
        .configure()
        .retries(3)
        .timeout_secs(300),
        InstallationStep::new(
            "Configure Storage",
            "Install local-path provisioner as the default StorageClass",
            Script::new()
                .skip_when(Probe::contains(
                    kubectl(ADMIN_CONF, "get storageclass local-path --no-headers"),
                    "local-path",
                ))
                .run("Install local-path provisioner", apply_storage)
                .wait_for_optional(
                    "local-path provisioner to be ready",
                    Probe::rows(storage_pods, 2, &["Running"]),
                    POLL,
                    Duration::from_secs(120),
                )
                .run("Set default StorageClass", patch_default),
        )
        .configure()
        .retries(2)
        .timeout_secs(180),
        InstallationStep::new(
            "Wait for System Ready",
            "Wait for the node and control plane pods to become ready",
            system_ready_script(ADMIN_CONF),
        )
        .configure()
        .retries(1)
        .timeout_secs(300),
    ]
}

/// Nodes Ready, core pods running (warning only), API server answering
pub fn system_ready_script(kubeconfig: &str) -> Script {
    let core_pods = ["kube-apiserver", "kube-controller-manager", "kube-scheduler", "etcd"];

    let script = Script::new().wait_for(
        "nodes to be ready",
        Probe::rows(kubectl(kubeconfig, "get nodes --no-headers"), 1, &["Ready"]),
        POLL,
        Duration::from_secs(180),
    );
    core_pods
        .iter()
        .fold(script, |script, pod| {
            script.wait_for_optional(
                format!("{} pod to be ready", pod),
                Probe::rows(
                    format!(
                        "{} | grep {}",
                        kubectl(kubeconfig, "get pods -n kube-system --no-headers"),
                        pod
                    ),
                    2,
                    &["Running"],
                ),
                POLL,
                Duration::from_secs(60),
            )
        })
        .check(
            "API server answers",
            Probe::contains(kubectl(kubeconfig, "cluster-info"), "running"),
        )
}
