// file: src/config/settings.rs
// version: 1.0.0
// guid: 3f1c9a0e-52d4-4c1b-9e7a-1b6f0c2d8e41

//! Process-wide installer settings and their defaults

use super::CniProvider;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Installer settings; every field has a default so partial files load
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub k8s: K8sSettings,
    pub ssh: SshSettings,
    pub preflight: PreflightSettings,
    pub verification: VerificationSettings,
    pub storage: StorageSettings,
}

/// Kubernetes installation defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct K8sSettings {
    /// `major.minor` versions the step sequences know how to install
    pub supported_versions: Vec<String>,
    pub default_version: String,
    pub default_pod_cidr: String,
    pub default_service_cidr: String,
    pub default_cni: CniProvider,
    /// Retries granted to retryable steps that do not set their own
    pub max_retries: u32,
    /// Base spacing between retries; attempt `n` waits `n` times this
    pub retry_delay_secs: u64,
}

impl Default for K8sSettings {
    fn default() -> Self {
        Self {
            supported_versions: vec![
                "1.28".to_string(),
                "1.29".to_string(),
                "1.30".to_string(),
                "1.31".to_string(),
            ],
            default_version: "1.30".to_string(),
            default_pod_cidr: "10.10.0.0/16".to_string(),
            default_service_cidr: "10.96.0.0/12".to_string(),
            default_cni: CniProvider::Cilium,
            max_retries: 3,
            retry_delay_secs: 5,
        }
    }
}

/// SSH connection defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub default_user: String,
    pub default_port: u16,
    pub connection_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            default_user: "ubuntu".to_string(),
            default_port: 22,
            connection_timeout_secs: 30,
            command_timeout_secs: 300,
        }
    }
}

/// Thresholds checked on every host before any step runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightSettings {
    pub min_disk_gb: u64,
    pub min_memory_mb: u64,
    pub required_binaries: Vec<String>,
    pub connectivity_timeout_secs: u64,
}

impl Default for PreflightSettings {
    fn default() -> Self {
        Self {
            min_disk_gb: 10,
            min_memory_mb: 2048,
            required_binaries: vec![
                "bash".to_string(),
                "curl".to_string(),
                "systemctl".to_string(),
                "apt-get".to_string(),
            ],
            connectivity_timeout_secs: 10,
        }
    }
}

/// Post-installation health check budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSettings {
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            poll_interval_secs: 5,
            command_timeout_secs: 30,
        }
    }
}

/// Where installation artifacts are written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub kubeconfig_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        Self {
            kubeconfig_dir: base.join(".kube"),
        }
    }
}

impl Settings {
    /// Override selected fields from `K8S_INSTALLER_*` environment variables
    pub fn apply_env(mut self) -> Self {
        self.apply_vars(|key| std::env::var(key).ok());
        self
    }

    fn apply_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(version) = lookup("K8S_INSTALLER_DEFAULT_VERSION") {
            debug!("Default Kubernetes version overridden: {}", version);
            self.k8s.default_version = version;
        }
        if let Some(cni) = lookup("K8S_INSTALLER_DEFAULT_CNI").and_then(|v| v.parse().ok()) {
            self.k8s.default_cni = cni;
        }
        if let Some(delay) = lookup("K8S_INSTALLER_RETRY_DELAY_SECS").and_then(|v| v.parse().ok()) {
            self.k8s.retry_delay_secs = delay;
        }
        if let Some(retries) = lookup("K8S_INSTALLER_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.k8s.max_retries = retries;
        }
        if let Some(user) = lookup("K8S_INSTALLER_SSH_USER") {
            self.ssh.default_user = user;
        }
        if let Some(dir) = lookup("K8S_INSTALLER_KUBECONFIG_DIR") {
            self.storage.kubeconfig_dir = PathBuf::from(shellexpand::tilde(&dir).into_owned());
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.k8s.retry_delay_secs)
    }

    /// Default per-attempt budget for steps that do not set their own
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh.command_timeout_secs)
    }

    pub fn connectivity_timeout(&self) -> Duration {
        Duration::from_secs(self.preflight.connectivity_timeout_secs)
    }

    pub fn verification_timeout(&self) -> Duration {
        Duration::from_secs(self.verification.timeout_secs)
    }

    pub fn verification_poll_interval(&self) -> Duration {
        Duration::from_secs(self.verification.poll_interval_secs)
    }

    pub fn verification_command_timeout(&self) -> Duration {
        Duration::from_secs(self.verification.command_timeout_secs)
    }

    /// Kubeconfig written for one installation
    pub fn kubeconfig_path(&self, installation_id: &str) -> PathBuf {
        self.storage
            .kubeconfig_dir
            .join(format!("config-{}", installation_id))
    }

    /// Whether `version` (`1.30` or `1.30.2`) belongs to a supported minor line
    pub fn is_supported_version(&self, version: &str) -> bool {
        let minor: Vec<&str> = version.split('.').take(2).collect();
        let minor = minor.join(".");
        self.k8s.supported_versions.iter().any(|v| *v == minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.k8s.default_version, "1.30");
        assert_eq!(settings.k8s.default_cni, CniProvider::Cilium);
        assert_eq!(settings.retry_delay(), Duration::from_secs(5));
        assert_eq!(settings.k8s.max_retries, 3);
        assert_eq!(settings.ssh.default_port, 22);
    }

    #[test]
    fn test_supported_version_accepts_patch_releases() {
        let settings = Settings::default();
        assert!(settings.is_supported_version("1.30"));
        assert!(settings.is_supported_version("1.29.4"));
        assert!(!settings.is_supported_version("1.10.0"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("K8S_INSTALLER_DEFAULT_CNI", "calico"),
            ("K8S_INSTALLER_RETRY_DELAY_SECS", "1"),
            ("K8S_INSTALLER_MAX_RETRIES", "1"),
            ("K8S_INSTALLER_KUBECONFIG_DIR", "/srv/kube"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings.apply_vars(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(settings.k8s.default_cni, CniProvider::Calico);
        assert_eq!(settings.retry_delay(), Duration::from_secs(1));
        assert_eq!(settings.k8s.max_retries, 1);
        assert_eq!(
            settings.kubeconfig_path("ab12cd34"),
            PathBuf::from("/srv/kube/config-ab12cd34")
        );
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let settings: Settings = serde_yaml::from_str("k8s:\n  retry_delay_secs: 2\n").unwrap();
        assert_eq!(settings.k8s.retry_delay_secs, 2);
        assert_eq!(settings.k8s.default_version, "1.30");
        assert_eq!(settings.preflight.min_disk_gb, 10);
    }
}
