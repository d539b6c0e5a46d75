// file: src/steps/commands.rs
// version: 1.0.0
// guid: 7f3b1d62-8e4a-4c09-9d5b-a2c6e0f41b37

//! Shell command renderers shared by both step sequences
//!
//! Everything here is a pure function of the installation config so the
//! exact commands can be unit tested without a host.

use crate::config::{CniProvider, InstallationConfig, NodeConfig, API_SERVER_PORT};

pub const ADMIN_CONF: &str = "/etc/kubernetes/admin.conf";
pub const KUBELET_CONF: &str = "/etc/kubernetes/kubelet.conf";
pub const CRI_SOCKET: &str = "unix:///var/run/containerd/containerd.sock";
pub const HAPROXY_CFG: &str = "/etc/haproxy/haproxy.cfg";

const KEYRING: &str = "/etc/apt/keyrings/kubernetes-apt-keyring.gpg";
const LOCAL_PATH_MANIFEST: &str =
    "https://raw.githubusercontent.com/rancher/local-path-provisioner/master/deploy/local-path-storage.yaml";

/// `kubectl` pinned to one kubeconfig
pub fn kubectl(kubeconfig: &str, args: &str) -> String {
    format!("kubectl --kubeconfig={} {}", kubeconfig, args)
}

/// `major.minor` part of a version such as `1.30.2`
pub fn minor_version(version: &str) -> String {
    version.split('.').take(2).collect::<Vec<_>>().join(".")
}

/// Kernel modules, sysctls and swap, in execution order
pub fn system_prep_commands() -> Vec<(&'static str, String)> {
    vec![
        ("Disable swap", "swapoff -a".to_string()),
        (
            "Disable swap permanently",
            "sed -i '/ swap / s/^/#/' /etc/fstab".to_string(),
        ),
        (
            "Add kernel modules configuration",
            "printf 'overlay\\nbr_netfilter\\n' > /etc/modules-load.d/k8s.conf".to_string(),
        ),
        ("Load overlay module", "modprobe overlay".to_string()),
        ("Load br_netfilter module", "modprobe br_netfilter".to_string()),
        (
            "Configure sysctl parameters",
            "printf 'net.bridge.bridge-nf-call-iptables  = 1\\nnet.bridge.bridge-nf-call-ip6tables = 1\\nnet.ipv4.ip_forward                 = 1\\n' > /etc/sysctl.d/k8s.conf"
                .to_string(),
        ),
        ("Apply sysctl parameters", "sysctl --system".to_string()),
    ]
}

/// Repository setup and package installation for kubelet, kubeadm and kubectl
pub fn kubernetes_package_commands(version: &str) -> Vec<(&'static str, String)> {
    let minor = minor_version(version);
    vec![
        ("Update package index", "apt-get update".to_string()),
        (
            "Install dependencies",
            "apt-get install -y apt-transport-https ca-certificates curl gpg".to_string(),
        ),
        (
            "Add Kubernetes signing key",
            format!(
                "mkdir -p /etc/apt/keyrings && curl -fsSL https://pkgs.k8s.io/core:/stable:/v{}/deb/Release.key | gpg --batch --yes --dearmor -o {}",
                minor, KEYRING
            ),
        ),
        (
            "Add Kubernetes repository",
            format!(
                "echo 'deb [signed-by={}] https://pkgs.k8s.io/core:/stable:/v{}/deb/ /' > /etc/apt/sources.list.d/kubernetes.list",
                KEYRING, minor
            ),
        ),
        ("Update package index", "apt-get update".to_string()),
        (
            "Install Kubernetes components",
            format!("apt-get install -y {}", package_list(version)),
        ),
    ]
}

/// Package names, pinned when the version names a patch release
pub fn package_list(version: &str) -> String {
    let pinned = version.split('.').count() == 3;
    ["kubelet", "kubeadm", "kubectl"]
        .iter()
        .map(|p| {
            if pinned {
                format!("{}={}-*", p, version)
            } else {
                p.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// containerd install with the systemd cgroup driver
pub fn containerd_commands() -> Vec<(&'static str, String)> {
    vec![
        ("Install containerd", "apt-get install -y containerd".to_string()),
        ("Create containerd config directory", "mkdir -p /etc/containerd".to_string()),
        (
            "Generate containerd config",
            "containerd config default > /etc/containerd/config.toml".to_string(),
        ),
        (
            "Enable systemd cgroup driver",
            "sed -i 's/SystemdCgroup = false/SystemdCgroup = true/' /etc/containerd/config.toml"
                .to_string(),
        ),
        ("Restart containerd", "systemctl restart containerd.service".to_string()),
    ]
}

fn skip_kube_proxy(cni: CniProvider) -> bool {
    matches!(cni, CniProvider::Cilium)
}

/// `kubeadm init` for a single-node cluster
pub fn kubeadm_init_all_in_one(config: &InstallationConfig) -> String {
    let mut command = format!(
        "kubeadm init --pod-network-cidr={} --service-cidr={} --cri-socket={}",
        config.pod_cidr, config.service_cidr, CRI_SOCKET
    );
    if skip_kube_proxy(config.cni_provider) {
        command.push_str(" --skip-phases=addon/kube-proxy");
    }
    command
}

/// `kubeadm init` on the first master, fronted by the load balancer
pub fn kubeadm_init_first_master(config: &InstallationConfig) -> String {
    let mut command = format!(
        "kubeadm init --control-plane-endpoint={} --upload-certs --pod-network-cidr={} --service-cidr={} --cri-socket={}",
        config.control_plane_endpoint(),
        config.pod_cidr,
        config.service_cidr,
        CRI_SOCKET
    );
    if skip_kube_proxy(config.cni_provider) {
        command.push_str(" --skip-phases=addon/kube-proxy");
    }
    command
}

/// Join command for an additional control-plane node
pub fn join_control_plane() -> String {
    format!(
        "{{{{join_command}}}} --control-plane --certificate-key {{{{certificate_key}}}} --cri-socket={}",
        CRI_SOCKET
    )
}

/// Join command for a worker node
pub fn join_worker() -> String {
    format!("{{{{join_command}}}} --cri-socket={}", CRI_SOCKET)
}

pub fn cni_manifest_url(cni: CniProvider) -> &'static str {
    match cni {
        CniProvider::Cilium => {
            "https://raw.githubusercontent.com/cilium/cilium/v1.14.5/install/kubernetes/quick-install.yaml"
        }
        CniProvider::Calico => "https://docs.projectcalico.org/manifests/calico.yaml",
        CniProvider::Flannel => {
            "https://github.com/flannel-io/flannel/releases/latest/download/kube-flannel.yml"
        }
    }
}

/// Apply the CNI manifest, matching its pod network to the cluster's
pub fn cni_install_commands(config: &InstallationConfig, kubeconfig: &str) -> Vec<(&'static str, String)> {
    let url = cni_manifest_url(config.cni_provider);
    match config.cni_provider {
        CniProvider::Cilium => vec![(
            "Apply Cilium manifest",
            kubectl(kubeconfig, &format!("apply -f {}", url)),
        )],
        CniProvider::Calico => vec![
            ("Apply Calico manifest", kubectl(kubeconfig, &format!("apply -f {}", url))),
            (
                "Set Calico IP pool",
                kubectl(
                    kubeconfig,
                    &format!(
                        "set env daemonset/calico-node -n kube-system CALICO_IPV4POOL_CIDR={}",
                        config.pod_cidr
                    ),
                ),
            ),
        ],
        CniProvider::Flannel => vec![(
            "Apply Flannel manifest",
            format!(
                "curl -fsSL {} | sed 's#10.244.0.0/16#{}#' | {}",
                url,
                config.pod_cidr,
                kubectl(kubeconfig, "apply -f -")
            ),
        )],
    }
}

/// `kubectl get pods` for the provider's agent pods
pub fn cni_pods_query(cni: CniProvider, kubeconfig: &str) -> String {
    let (namespace, selector) = cni.pod_selector();
    kubectl(
        kubeconfig,
        &format!("get pods -n {} -l {} --no-headers", namespace, selector),
    )
}

/// local-path provisioner install, readiness query and default-class patch
pub fn storage_commands(kubeconfig: &str) -> (String, String, String) {
    (
        kubectl(kubeconfig, &format!("apply -f {}", LOCAL_PATH_MANIFEST)),
        kubectl(kubeconfig, "get pods -n local-path-storage --no-headers"),
        kubectl(
            kubeconfig,
            r#"patch storageclass local-path -p '{"metadata": {"annotations":{"storageclass.kubernetes.io/is-default-class":"true"}}}'"#,
        ),
    )
}

/// HAProxy config balancing TCP across every master's API server
pub fn haproxy_config(masters: &[&NodeConfig]) -> String {
    let mut cfg = format!(
        "global\n    log /dev/log local0\n    maxconn 4096\n\ndefaults\n    mode tcp\n    log global\n    option tcplog\n    timeout connect 10s\n    timeout client 1m\n    timeout server 1m\n\nfrontend kubernetes-api\n    bind *:{port}\n    default_backend kubernetes-masters\n\nbackend kubernetes-masters\n    balance roundrobin\n    option tcp-check\n",
        port = API_SERVER_PORT
    );
    for (index, master) in masters.iter().enumerate() {
        cfg.push_str(&format!(
            "    server master-{} {}:{} check fall 3 rise 2\n",
            index + 1,
            master.host,
            API_SERVER_PORT
        ));
    }
    cfg
}

/// Write `content` to `path` through a quoted heredoc
pub fn write_file(path: &str, content: &str) -> String {
    format!("cat > {} <<'K8S_EOF'\n{}K8S_EOF", path, content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NodeRole, Settings};

    fn ha_config(cni: CniProvider) -> InstallationConfig {
        let s = Settings::default();
        InstallationConfig::ha_secure(
            &s,
            vec![
                NodeConfig::new("10.0.0.10", NodeRole::Loadbalancer, &s),
                NodeConfig::new("10.0.0.11", NodeRole::Master, &s),
                NodeConfig::new("10.0.0.12", NodeRole::Master, &s),
                NodeConfig::new("10.0.0.13", NodeRole::Master, &s),
            ],
        )
        .with_cni(cni)
    }

    #[test]
    fn test_all_in_one_init_skips_kube_proxy_for_cilium() {
        // Arrange
        let config = InstallationConfig::all_in_one(&Settings::default());

        // Act
        let command = kubeadm_init_all_in_one(&config);

        // Assert
        assert_eq!(
            command,
            "kubeadm init --pod-network-cidr=10.10.0.0/16 --service-cidr=10.96.0.0/12 \
             --cri-socket=unix:///var/run/containerd/containerd.sock --skip-phases=addon/kube-proxy"
        );
    }

    #[test]
    fn test_calico_keeps_kube_proxy() {
        let config = InstallationConfig::all_in_one(&Settings::default()).with_cni(CniProvider::Calico);
        assert!(!kubeadm_init_all_in_one(&config).contains("skip-phases"));
    }

    #[test]
    fn test_first_master_init_uses_load_balancer() {
        let command = kubeadm_init_first_master(&ha_config(CniProvider::Flannel));
        assert!(command.starts_with("kubeadm init --control-plane-endpoint=10.0.0.10:6443 --upload-certs"));
        assert!(!command.contains("skip-phases"));
    }

    #[test]
    fn test_join_commands_reference_facts() {
        assert!(join_control_plane().starts_with("{{join_command}} --control-plane --certificate-key {{certificate_key}}"));
        assert!(join_worker().starts_with("{{join_command}} --cri-socket="));
    }

    #[test]
    fn test_package_pinning() {
        assert_eq!(package_list("1.30"), "kubelet kubeadm kubectl");
        assert_eq!(
            package_list("1.29.4"),
            "kubelet=1.29.4-* kubeadm=1.29.4-* kubectl=1.29.4-*"
        );
        let commands = kubernetes_package_commands("1.29.4");
        assert!(commands[2].1.contains("/v1.29/deb/Release.key"));
    }

    #[test]
    fn test_cni_commands() {
        let calico = cni_install_commands(&ha_config(CniProvider::Calico), ADMIN_CONF);
        assert_eq!(calico.len(), 2);
        assert!(calico[1].1.ends_with("CALICO_IPV4POOL_CIDR=10.10.0.0/16"));

        let flannel = cni_install_commands(&ha_config(CniProvider::Flannel), ADMIN_CONF);
        assert!(flannel[0].1.contains("sed 's#10.244.0.0/16#10.10.0.0/16#'"));

        assert_eq!(
            cni_pods_query(CniProvider::Flannel, ADMIN_CONF),
            "kubectl --kubeconfig=/etc/kubernetes/admin.conf get pods -n kube-flannel -l app=flannel --no-headers"
        );
    }

    #[test]
    fn test_haproxy_backends_follow_master_order() {
        let config = ha_config(CniProvider::Cilium);

        let cfg = haproxy_config(&config.masters());

        assert!(cfg.contains("bind *:6443"));
        let servers: Vec<&str> = cfg.lines().filter(|l| l.trim_start().starts_with("server")).collect();
        assert_eq!(servers.len(), 3);
        assert!(servers[0].contains("master-1 10.0.0.11:6443"));
        assert!(servers[2].contains("master-3 10.0.0.13:6443"));
    }

    #[test]
    fn test_write_file_heredoc() {
        assert_eq!(
            write_file("/etc/haproxy/haproxy.cfg", "a\n"),
            "cat > /etc/haproxy/haproxy.cfg <<'K8S_EOF'\na\nK8S_EOF"
        );
    }
}
