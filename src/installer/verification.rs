// file: src/installer/verification.rs
// version: 1.0.0
// guid: 8c0d4e6a-2f19-4b7c-a5e3-71d9b0f2c845

//! Post-installation health checks run while the installation is `verifying`

use super::cluster_info::{parse_nodes, parse_pod_counts, ClusterInfo};
use super::retry::{CancelFlag, Sleeper};
use crate::config::{InstallationConfig, InstallationMode, NodeConfig, Settings};
use crate::error::InstallerError;
use crate::network::RemoteExecutor;
use crate::steps::commands::{cni_pods_query, kubectl, ADMIN_CONF};
use crate::steps::script::rows_match;
use crate::steps::host_label;
use crate::Result;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where cluster checks run and which kubeconfig they use
pub struct ControlHost<'a> {
    pub host: Option<&'a NodeConfig>,
    pub kubeconfig: String,
}

impl<'a> ControlHost<'a> {
    pub fn for_config(config: &'a InstallationConfig, kubeconfig_path: &Path) -> Self {
        match config.mode {
            InstallationMode::AllInOne => Self {
                host: None,
                kubeconfig: kubeconfig_path.display().to_string(),
            },
            InstallationMode::HaSecure => Self {
                host: config.first_master(),
                kubeconfig: ADMIN_CONF.to_string(),
            },
        }
    }
}

/// Runs the health checks against one installation's cluster
pub struct Verifier<'a> {
    pub installation_id: &'a str,
    pub config: &'a InstallationConfig,
    pub settings: &'a Settings,
    pub executor: &'a dyn RemoteExecutor,
    pub sleeper: &'a dyn Sleeper,
    pub cancel: &'a CancelFlag,
    pub kubeconfig_path: &'a Path,
}

impl<'a> Verifier<'a> {
    /// Poll until every check passes, then gather cluster facts
    pub async fn verify(&self) -> Result<ClusterInfo> {
        let control = ControlHost::for_config(self.config, self.kubeconfig_path);
        let interval = self.settings.verification_poll_interval();
        let attempts = poll_attempts(self.settings.verification_timeout(), interval);

        let mut last_failure = String::from("verification did not run");
        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                return Err(InstallerError::verification("cancelled while verifying"));
            }
            match self.check_once(&control).await {
                Ok(()) => {
                    info!(
                        "Cluster verification passed on {} (attempt {})",
                        host_label(control.host),
                        attempt
                    );
                    return self.gather_cluster_info(&control).await;
                }
                Err(reason) => {
                    debug!("Verification attempt {}/{}: {}", attempt, attempts, reason);
                    last_failure = reason;
                }
            }
            if attempt < attempts {
                self.sleeper.sleep(interval).await;
            }
        }

        warn!("Cluster verification failed: {}", last_failure);
        Err(InstallerError::verification(last_failure))
    }

    async fn query(&self, control: &ControlHost<'_>, args: &str) -> std::result::Result<String, String> {
        let command = kubectl(&control.kubeconfig, args);
        self.raw_query(control, &command).await
    }

    async fn raw_query(&self, control: &ControlHost<'_>, command: &str) -> std::result::Result<String, String> {
        let output = self
            .executor
            .execute(control.host, command, self.settings.verification_command_timeout())
            .await
            .map_err(|e| e.to_string())?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(format!("'{}' failed: {}", command, output.error_text()))
        }
    }

    /// First failing check as a human-readable reason
    async fn check_once(&self, control: &ControlHost<'_>) -> std::result::Result<(), String> {
        let cluster_info = self.query(control, "cluster-info").await?;
        if !cluster_info.contains("running") {
            return Err("API server is not reachable".to_string());
        }

        let nodes = parse_nodes(&self.query(control, "get nodes --no-headers").await?);
        let expected = self.config.expected_node_count();
        let ready = nodes.iter().filter(|n| n.is_ready()).count();
        if nodes.len() != expected || ready != expected {
            return Err(format!(
                "Expected {} Ready nodes, found {} of {} ready",
                expected,
                ready,
                nodes.len()
            ));
        }

        let system_pods = self
            .query(control, "get pods -n kube-system --no-headers")
            .await?;
        let healthy = ["Running".to_string(), "Completed".to_string()];
        if !rows_match(&system_pods, 2, &healthy) {
            return Err("Core system pods in kube-system are not all running".to_string());
        }

        let cni = self.config.cni_provider;
        let cni_pods = self
            .raw_query(control, &cni_pods_query(cni, &control.kubeconfig))
            .await?;
        if !rows_match(&cni_pods, 2, &healthy[..1]) {
            return Err(format!("{} pods are not running", cni));
        }

        Ok(())
    }

    async fn gather_cluster_info(&self, control: &ControlHost<'_>) -> Result<ClusterInfo> {
        let nodes = self
            .query(control, "get nodes -o wide --no-headers")
            .await
            .map(|out| parse_nodes(&out))
            .map_err(InstallerError::verification)?;

        let pod_counts = self
            .raw_query(
                control,
                &format!(
                    "{} | awk '{{print $1}}' | sort | uniq -c",
                    kubectl(&control.kubeconfig, "get pods --all-namespaces --no-headers")
                ),
            )
            .await
            .map(|out| parse_pod_counts(&out))
            .unwrap_or_else(|e| {
                warn!("Could not count pods: {}", e);
                Default::default()
            });

        Ok(ClusterInfo::new(
            self.installation_id,
            self.config,
            self.kubeconfig_path,
            nodes,
            pod_counts,
        ))
    }
}

/// Number of polls that fit in `timeout`, at least one
pub fn poll_attempts(timeout: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return 1;
    }
    ((timeout.as_secs_f64() / interval.as_secs_f64()) as u32).max(1)
}
