// file: src/network/mock.rs
// version: 1.1.0
// guid: 9a3d5f70-2c18-4e6b-b4a9-d71e0c58f2a6

//! Scripted in-memory executor
//!
//! Lets unit and integration tests drive an installation without a host:
//! commands are answered from substring rules and logged per host.

use super::executor::{CommandOutput, RemoteExecutor, SystemInfo};
use crate::config::NodeConfig;
use crate::error::InstallerError;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

enum Reply {
    Output(CommandOutput),
    Unreachable,
}

/// Answers commands by first matching substring; unmatched commands succeed silently
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Vec<(String, Reply)>,
    unreachable: HashSet<String>,
    system_info: Option<SystemInfo>,
    log: Mutex<Vec<(String, String)>>,
    closed: Mutex<u32>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Responses of a single-node cluster that is up and healthy
    pub fn healthy_cluster() -> Self {
        Self::new()
            .respond("uniq -c", CommandOutput::ok("      6 kube-system\n"))
            .respond(
                "cluster-info",
                CommandOutput::ok("Kubernetes control plane is running at https://127.0.0.1:6443"),
            )
            .respond(
                "get nodes",
                CommandOutput::ok("node-1   Ready   control-plane   5m   v1.30.2   10.0.0.1\n"),
            )
            .respond(
                "get pods",
                CommandOutput::ok(
                    "cilium-x7k2p            1/1   Running   0   5m\n\
                     kube-apiserver-node-1   1/1   Running   0   5m\n",
                ),
            )
    }

    /// Add a rule; earlier rules win
    pub fn respond(mut self, pattern: &str, output: CommandOutput) -> Self {
        self.rules.push((pattern.to_string(), Reply::Output(output)));
        self
    }

    /// Put a rule in front of every existing one
    pub fn respond_first(mut self, pattern: &str, output: CommandOutput) -> Self {
        self.rules
            .insert(0, (pattern.to_string(), Reply::Output(output)));
        self
    }

    pub fn drop_connection(mut self, pattern: &str) -> Self {
        self.rules.push((pattern.to_string(), Reply::Unreachable));
        self
    }

    pub fn unreachable_host(mut self, host: &str) -> Self {
        self.unreachable.insert(host.to_string());
        self
    }

    pub fn with_system_info(mut self, info: SystemInfo) -> Self {
        self.system_info = Some(info);
        self
    }

    /// `(host, command)` pairs in execution order
    pub fn commands(&self) -> Vec<(String, String)> {
        lock(&self.log).clone()
    }

    pub fn ran(&self, fragment: &str) -> bool {
        self.count(fragment) > 0
    }

    pub fn ran_on(&self, host: &str, fragment: &str) -> bool {
        lock(&self.log)
            .iter()
            .any(|(h, c)| h == host && c.contains(fragment))
    }

    pub fn count(&self, fragment: &str) -> usize {
        lock(&self.log)
            .iter()
            .filter(|(_, c)| c.contains(fragment))
            .count()
    }

    pub fn close_count(&self) -> u32 {
        *lock(&self.closed)
    }
}

fn label(host: Option<&NodeConfig>) -> String {
    host.map(|h| h.host.clone()).unwrap_or_else(|| "localhost".to_string())
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        host: Option<&NodeConfig>,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput> {
        let host = label(host);
        lock(&self.log).push((host.clone(), command.to_string()));

        if self.unreachable.contains(&host) {
            return Err(InstallerError::connectivity(host, "connection refused"));
        }
        for (pattern, reply) in &self.rules {
            if command.contains(pattern.as_str()) {
                return match reply {
                    Reply::Output(output) => Ok(output.clone()),
                    Reply::Unreachable => Err(InstallerError::connectivity(host, "connection reset")),
                };
            }
        }
        Ok(CommandOutput::ok(""))
    }

    async fn test_connectivity(&self, host: Option<&NodeConfig>) -> bool {
        !self.unreachable.contains(&label(host))
    }

    async fn gather_system_info(&self, _host: Option<&NodeConfig>) -> Result<SystemInfo> {
        Ok(self.system_info.clone().unwrap_or_else(|| {
            SystemInfo::new()
                .with(SystemInfo::HOSTNAME, "test-node")
                .with(SystemInfo::MEMORY_MB, "8192")
                .with(SystemInfo::DISK_FREE_GB, "100")
                .with(SystemInfo::CPU_CORES, "4")
        }))
    }

    async fn fetch_file(&self, host: Option<&NodeConfig>, remote: &str, local: &Path) -> Result<()> {
        lock(&self.log).push((label(host), format!("fetch {} {}", remote, local.display())));
        Ok(())
    }

    async fn close_all(&self) {
        *lock(&self.closed) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NodeRole, Settings};

    #[tokio::test]
    async fn test_respond_first_overrides_earlier_rules() {
        // Arrange
        let exec = ScriptedExecutor::healthy_cluster()
            .respond_first("get nodes", CommandOutput::failed(1, "refused"));

        // Act
        let nodes = exec.execute(None, "kubectl get nodes", Duration::from_secs(1)).await.unwrap();
        let info = exec.execute(None, "kubectl cluster-info", Duration::from_secs(1)).await.unwrap();

        // Assert
        assert!(!nodes.success());
        assert!(info.stdout.contains("is running"));
    }

    #[tokio::test]
    async fn test_log_records_host_per_command() {
        // Arrange
        let exec = ScriptedExecutor::new().unreachable_host("10.0.0.9");
        let node = NodeConfig::new("10.0.0.9", NodeRole::Worker, &Settings::default());

        // Act
        exec.execute(None, "hostname", Duration::from_secs(1)).await.unwrap();
        let refused = exec.execute(Some(&node), "uptime", Duration::from_secs(1)).await;

        // Assert
        assert!(refused.is_err());
        assert!(exec.ran_on("localhost", "hostname"));
        assert!(exec.ran_on("10.0.0.9", "uptime"));
        assert!(!exec.ran_on("localhost", "uptime"));
        assert!(!exec.test_connectivity(Some(&node)).await);
    }
}
