// file: src/network/pool.rs
// version: 1.0.0
// guid: 6b0e3c2a-91d7-4f58-8a4e-2c7d5f1b9e03

//! Per-installation executor that pools one SSH session per node

use super::executor::{
    connectivity_ok, gather_with_commands, CommandOutput, RemoteExecutor, SystemInfo,
    CONNECTIVITY_PROBE,
};
use super::local::LocalClient;
use super::ssh::SshClient;
use crate::config::NodeConfig;
use crate::error::InstallerError;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

type PooledSession = Arc<Mutex<SshClient>>;

/// Routes `None` to the local machine and nodes to pooled SSH sessions
///
/// Sessions live until `close_all`, which the installer calls once it
/// reaches a terminal state.
pub struct ExecutorPool {
    local: LocalClient,
    sessions: tokio::sync::Mutex<HashMap<String, PooledSession>>,
    system_info_timeout: Duration,
}

impl ExecutorPool {
    pub fn new(system_info_timeout: Duration) -> Self {
        Self {
            local: LocalClient::new(),
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            system_info_timeout,
        }
    }

    /// Number of open sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn session(&self, node: &NodeConfig) -> Result<PooledSession> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(&node.host) {
            return Ok(Arc::clone(existing));
        }

        let target = node.clone();
        let connect = tokio::task::spawn_blocking(move || SshClient::connect(&target));
        let client = tokio::time::timeout(node.ssh_timeout(), connect)
            .await
            .map_err(|_| {
                InstallerError::connectivity(
                    &node.host,
                    format!(
                        "Could not establish SSH session within {}s",
                        node.ssh_timeout_secs
                    ),
                )
            })?
            .map_err(|e| InstallerError::internal(format!("SSH connect task failed: {}", e)))??;

        let session = Arc::new(Mutex::new(client));
        sessions.insert(node.host.clone(), Arc::clone(&session));
        Ok(session)
    }

    async fn forget(&self, host: &str) {
        if self.sessions.lock().await.remove(host).is_some() {
            debug!("Dropped broken SSH session to {}", host);
        }
    }

    async fn execute_remote(
        &self,
        node: &NodeConfig,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let session = self.session(node).await?;
        let command_owned = command.to_string();
        let host = node.host.clone();

        let task = tokio::task::spawn_blocking(move || {
            let mut client = session
                .lock()
                .map_err(|_| InstallerError::internal(format!("SSH session to {} poisoned", host)))?;
            client.execute(&command_owned, timeout)
        });

        let grace = timeout + node.ssh_timeout();
        let result = match tokio::time::timeout(grace, task).await {
            Ok(joined) => joined
                .map_err(|e| InstallerError::internal(format!("SSH command task failed: {}", e)))?,
            Err(_) => Err(InstallerError::timeout(format!(
                "Command timed out after {}s on {}: {}",
                timeout.as_secs(),
                node.host,
                command
            ))),
        };

        if matches!(
            result,
            Err(InstallerError::Connectivity { .. }) | Err(InstallerError::Timeout(_))
        ) {
            self.forget(&node.host).await;
        }
        result
    }
}

#[async_trait]
impl RemoteExecutor for ExecutorPool {
    async fn execute(
        &self,
        host: Option<&NodeConfig>,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        match host {
            None => self.local.execute(command, timeout).await,
            Some(node) => self.execute_remote(node, command, timeout).await,
        }
    }

    async fn test_connectivity(&self, host: Option<&NodeConfig>) -> bool {
        let timeout = host
            .map(NodeConfig::ssh_timeout)
            .unwrap_or(self.system_info_timeout);
        match self.execute(host, CONNECTIVITY_PROBE, timeout).await {
            Ok(output) => connectivity_ok(&output),
            Err(e) => {
                warn!("Connectivity test failed: {}", e);
                false
            }
        }
    }

    async fn gather_system_info(&self, host: Option<&NodeConfig>) -> Result<SystemInfo> {
        match host {
            None => self.local.gather_system_info().await,
            Some(_) => gather_with_commands(self, host, self.system_info_timeout).await,
        }
    }

    async fn fetch_file(
        &self,
        host: Option<&NodeConfig>,
        remote: &str,
        local: &Path,
    ) -> Result<()> {
        let node = match host {
            None => return self.local.copy_file(remote, local).await,
            Some(node) => node,
        };

        let session = self.session(node).await?;
        let remote = remote.to_string();
        let local: PathBuf = local.to_path_buf();
        let host = node.host.clone();
        tokio::task::spawn_blocking(move || {
            let mut client = session
                .lock()
                .map_err(|_| InstallerError::internal(format!("SSH session to {} poisoned", host)))?;
            client.download_file(&remote, &local)
        })
        .await
        .map_err(|e| InstallerError::internal(format!("SCP task failed: {}", e)))?
    }

    async fn close_all(&self) {
        let drained: Vec<(String, PooledSession)> = self.sessions.lock().await.drain().collect();
        if drained.is_empty() {
            return;
        }
        info!("Closing {} SSH sessions", drained.len());

        for (host, session) in drained {
            let closed = tokio::task::spawn_blocking(move || {
                if let Ok(mut client) = session.lock() {
                    client.disconnect();
                }
            })
            .await;
            if let Err(e) = closed {
                warn!("Failed to close SSH session to {}: {}", host, e);
            }
        }
    }
}
