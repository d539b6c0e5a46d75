// file: src/network/executor.rs
// version: 2.0.0
// guid: exec0001-2345-6789-abcd-ef0123456789

//! Command execution trait for SSH and local execution

use crate::config::NodeConfig;
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Exit status and captured streams of one command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::new(0, stdout, "")
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self::new(exit_code, "", stderr)
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Best description of a failure: stderr, else stdout, else the exit code
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        if !stderr.is_empty() {
            stderr.to_string()
        } else if !stdout.is_empty() {
            stdout.to_string()
        } else {
            format!("exit code {}", self.exit_code)
        }
    }
}

/// Facts about one host gathered during pre-flight
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SystemInfo(BTreeMap<String, String>);

impl SystemInfo {
    pub const HOSTNAME: &'static str = "hostname";
    pub const OS: &'static str = "os";
    pub const KERNEL: &'static str = "kernel";
    pub const ARCH: &'static str = "arch";
    pub const MEMORY_MB: &'static str = "memory_mb";
    pub const DISK_FREE_GB: &'static str = "disk_free_gb";
    pub const CPU_CORES: &'static str = "cpu_cores";
    pub const UPTIME: &'static str = "uptime";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn number(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn memory_mb(&self) -> Option<u64> {
        self.number(Self::MEMORY_MB)
    }

    pub fn disk_free_gb(&self) -> Option<u64> {
        self.number(Self::DISK_FREE_GB)
    }

    pub fn cpu_cores(&self) -> Option<u64> {
        self.number(Self::CPU_CORES)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// Runs commands on the local machine or on a node over SSH
///
/// `host: None` always means the machine this process runs on.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command`, failing only when it cannot be run at all
    ///
    /// A non-zero exit status is reported through `CommandOutput`, not as an
    /// error. Exceeding `timeout` yields `InstallerError::Timeout`; failing
    /// to reach the host yields `InstallerError::Connectivity`.
    async fn execute(
        &self,
        host: Option<&NodeConfig>,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput>;

    /// Whether a trivial command round-trips to the host
    async fn test_connectivity(&self, host: Option<&NodeConfig>) -> bool;

    /// Hostname, OS, kernel, memory, disk and CPU facts for the host
    async fn gather_system_info(&self, host: Option<&NodeConfig>) -> Result<SystemInfo>;

    /// Copy `remote` on the host to `local` on this machine
    async fn fetch_file(&self, host: Option<&NodeConfig>, remote: &str, local: &Path)
        -> Result<()>;

    /// Close every pooled connection
    async fn close_all(&self);
}

/// Probe command used by connectivity checks
pub const CONNECTIVITY_PROBE: &str = "echo 'connectivity_test'";

/// Shell commands that describe a Linux host, keyed by `SystemInfo` field
pub const SYSTEM_INFO_COMMANDS: &[(&str, &str)] = &[
    (SystemInfo::HOSTNAME, "hostname"),
    (SystemInfo::OS, ". /etc/os-release && echo \"$PRETTY_NAME\""),
    (SystemInfo::KERNEL, "uname -r"),
    (SystemInfo::ARCH, "uname -m"),
    (SystemInfo::MEMORY_MB, "free -m | awk '/^Mem:/{print $2}'"),
    (
        SystemInfo::DISK_FREE_GB,
        "df -BG --output=avail / | tail -1 | tr -dc '0-9'",
    ),
    (SystemInfo::CPU_CORES, "nproc"),
    (SystemInfo::UPTIME, "uptime -p"),
];

/// Whether a connectivity probe came back intact
pub fn connectivity_ok(output: &CommandOutput) -> bool {
    output.success() && output.stdout.contains("connectivity_test")
}

/// Gather `SystemInfo` by running `SYSTEM_INFO_COMMANDS` through an executor
///
/// Individual commands that fail are recorded as `unknown`; only transport
/// errors abort the gathering.
pub async fn gather_with_commands(
    executor: &dyn RemoteExecutor,
    host: Option<&NodeConfig>,
    timeout: Duration,
) -> Result<SystemInfo> {
    let mut info = SystemInfo::new();
    for (key, command) in SYSTEM_INFO_COMMANDS {
        let output = executor.execute(host, command, timeout).await?;
        let value = if output.success() {
            output.stdout.trim().to_string()
        } else {
            debug!("System info command for {} failed: {}", key, output.error_text());
            "unknown".to_string()
        };
        info.insert(*key, value);
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text_prefers_stderr() {
        assert_eq!(
            CommandOutput::new(1, "partial", "permission denied\n").error_text(),
            "permission denied"
        );
        assert_eq!(CommandOutput::new(2, "usage\n", "").error_text(), "usage");
        assert_eq!(CommandOutput::new(127, "", "").error_text(), "exit code 127");
    }

    #[test]
    fn test_system_info_numbers() {
        let info = SystemInfo::new()
            .with(SystemInfo::MEMORY_MB, "7951")
            .with(SystemInfo::DISK_FREE_GB, " 42\n")
            .with(SystemInfo::CPU_CORES, "unknown");

        assert_eq!(info.memory_mb(), Some(7951));
        assert_eq!(info.disk_free_gb(), Some(42));
        assert_eq!(info.cpu_cores(), None);
    }

    #[test]
    fn test_connectivity_probe_requires_marker() {
        assert!(connectivity_ok(&CommandOutput::ok("connectivity_test\n")));
        assert!(!connectivity_ok(&CommandOutput::ok("")));
        assert!(!connectivity_ok(&CommandOutput::failed(255, "refused")));
    }
}
