// file: src/installer/preflight.rs
// version: 1.0.0
// guid: e2a7c4f9-1b58-4d03-86ae-5f9c0b3d7e62

//! Pre-installation checks run while the installation is `validating`

use crate::config::{InstallationConfig, InstallationMode, NodeConfig, NodeRole, Settings};
use crate::network::RemoteExecutor;
use crate::steps::host_label;
use tracing::{debug, info, warn};

/// Hosts checked before any step runs; `None` is the local machine
pub fn preflight_hosts(config: &InstallationConfig) -> Vec<Option<&NodeConfig>> {
    match config.mode {
        InstallationMode::AllInOne => vec![None],
        InstallationMode::HaSecure => config.nodes.iter().map(Some).collect(),
    }
}

/// Run every check on every host and return the failures
///
/// An unreachable host skips its remaining checks.
pub async fn run_preflight(
    config: &InstallationConfig,
    settings: &Settings,
    executor: &dyn RemoteExecutor,
) -> Vec<String> {
    let mut failures = Vec::new();

    for host in preflight_hosts(config) {
        let label = host_label(host).to_string();
        let before = failures.len();
        check_host(host, &label, settings, executor, &mut failures).await;
        if failures.len() == before {
            info!("Pre-flight checks passed on {}", label);
        }
    }

    failures
}

async fn check_host(
    host: Option<&NodeConfig>,
    label: &str,
    settings: &Settings,
    executor: &dyn RemoteExecutor,
    failures: &mut Vec<String>,
) {
    if !executor.test_connectivity(host).await {
        warn!("{} is unreachable", label);
        failures.push(format!("{}: host is unreachable", label));
        return;
    }

    match executor.gather_system_info(host).await {
        Ok(info) => {
            debug!("System info for {}: {:?}", label, info);
            let is_load_balancer = host.map(|h| h.role == NodeRole::Loadbalancer).unwrap_or(false);

            if !is_load_balancer {
                match info.memory_mb() {
                    Some(mb) if mb < settings.preflight.min_memory_mb => failures.push(format!(
                        "{}: insufficient memory ({} MB, need {} MB)",
                        label, mb, settings.preflight.min_memory_mb
                    )),
                    Some(_) => {}
                    None => failures.push(format!("{}: could not determine memory", label)),
                }
            }

            match info.disk_free_gb() {
                Some(gb) if gb < settings.preflight.min_disk_gb => failures.push(format!(
                    "{}: insufficient disk space ({} GB free, need {} GB)",
                    label, gb, settings.preflight.min_disk_gb
                )),
                Some(_) => {}
                None => failures.push(format!("{}: could not determine free disk space", label)),
            }
        }
        Err(e) => {
            failures.push(format!("{}: failed to gather system info: {}", label, e));
            return;
        }
    }

    for binary in &settings.preflight.required_binaries {
        let command = format!("command -v {}", binary);
        match executor
            .execute(host, &command, settings.connectivity_timeout())
            .await
        {
            Ok(output) if output.success() => {}
            Ok(_) => failures.push(format!("{}: required binary '{}' not found", label, binary)),
            Err(e) => failures.push(format!("{}: could not check for '{}': {}", label, binary, e)),
        }
    }
}
