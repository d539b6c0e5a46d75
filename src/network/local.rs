// file: src/network/local.rs
// version: 2.0.0
// guid: local001-2345-6789-abcd-ef0123456789

//! Local command execution for all-in-one installations

use super::executor::{connectivity_ok, CommandOutput, SystemInfo, CONNECTIVITY_PROBE};
use crate::error::InstallerError;
use crate::Result;
use std::path::Path;
use std::time::Duration;
use sysinfo::{Disks, System};
use tokio::process::Command;
use tracing::{debug, info};

/// Runs commands through `bash -c` on this machine
#[derive(Debug, Default, Clone)]
pub struct LocalClient;

impl LocalClient {
    pub fn new() -> Self {
        Self
    }

    /// Execute command locally, killing it if `timeout` elapses
    pub async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        debug!("Executing local command: {}", command);

        let child = Command::new("bash")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| {
                InstallerError::timeout(format!(
                    "Command timed out after {}s on localhost: {}",
                    timeout.as_secs(),
                    command
                ))
            })?
            .map_err(|e| {
                InstallerError::connectivity("localhost", format!("Failed to spawn bash: {}", e))
            })?;

        let result = CommandOutput::new(
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );

        if result.success() {
            debug!("Command executed successfully: {} bytes", result.stdout.len());
        } else {
            debug!(
                "Command exited with {}: {}",
                result.exit_code,
                result.error_text()
            );
        }
        Ok(result)
    }

    pub async fn test_connectivity(&self, timeout: Duration) -> bool {
        match self.execute(CONNECTIVITY_PROBE, timeout).await {
            Ok(output) => connectivity_ok(&output),
            Err(_) => false,
        }
    }

    /// Describe this machine without shelling out
    pub async fn gather_system_info(&self) -> Result<SystemInfo> {
        tokio::task::spawn_blocking(collect_local_info)
            .await
            .map_err(|e| InstallerError::internal(format!("System info task failed: {}", e)))
    }

    /// Copy a file on this machine, creating the destination directory
    pub async fn copy_file(&self, source: &str, destination: &Path) -> Result<()> {
        info!("Local mode: copying {} to {}", source, destination.display());

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, destination).await?;
        Ok(())
    }
}

fn collect_local_info() -> SystemInfo {
    let system = System::new_all();
    let disks = Disks::new_with_refreshed_list();

    let root_free = disks
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .map(|d| d.available_space() / (1024 * 1024 * 1024));

    let unknown = || "unknown".to_string();
    let mut info = SystemInfo::new()
        .with(SystemInfo::HOSTNAME, System::host_name().unwrap_or_else(unknown))
        .with(SystemInfo::OS, System::long_os_version().unwrap_or_else(unknown))
        .with(SystemInfo::KERNEL, System::kernel_version().unwrap_or_else(unknown))
        .with(SystemInfo::ARCH, std::env::consts::ARCH)
        .with(
            SystemInfo::MEMORY_MB,
            (system.total_memory() / (1024 * 1024)).to_string(),
        )
        .with(SystemInfo::CPU_CORES, system.cpus().len().to_string())
        .with(SystemInfo::UPTIME, format!("{}s", System::uptime()));

    if let Some(free) = root_free {
        info.insert(SystemInfo::DISK_FREE_GB, free.to_string());
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_captures_streams_and_exit_code() {
        let client = LocalClient::new();

        let output = client
            .execute("echo out; echo err >&2; exit 3", Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let client = LocalClient::new();

        let err = client
            .execute("sleep 5", Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(matches!(err, InstallerError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_local_connectivity() {
        assert!(LocalClient::new().test_connectivity(Duration::from_secs(10)).await);
    }

    #[tokio::test]
    async fn test_copy_file_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("admin.conf");
        std::fs::write(&source, "apiVersion: v1\n").unwrap();
        let destination = dir.path().join("kube").join("config-ab12cd34");

        LocalClient::new()
            .copy_file(source.to_str().unwrap(), &destination)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(destination).unwrap(), "apiVersion: v1\n");
    }
}
