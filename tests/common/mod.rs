// file: tests/common/mod.rs
// version: 1.0.0
// guid: 4c8f2a61-7e3b-4d95-a0c7-b19e5d6f3a28

//! Shared fixtures: factories, node configs and a recording sleeper

#![allow(dead_code)]

use async_trait::async_trait;
use k8s_auto_installer::config::{InstallationConfig, NodeConfig, NodeRole, Settings};
use k8s_auto_installer::installer::{ExecutorFactory, InstallerFactory, Sleeper};
use k8s_auto_installer::network::RemoteExecutor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use k8s_auto_installer::network::mock::ScriptedExecutor;

/// Records requested delays without waiting
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

/// Factory whose installers all share `executor` and `sleeper`
pub fn factory_with(
    executor: Arc<ScriptedExecutor>,
    sleeper: Arc<RecordingSleeper>,
) -> InstallerFactory {
    let executor_factory: ExecutorFactory =
        Arc::new(move || Arc::clone(&executor) as Arc<dyn RemoteExecutor>);
    InstallerFactory::with_executor_factory(test_settings(), executor_factory, sleeper)
}

/// Defaults with kubeconfigs written under the system temp dir
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.storage.kubeconfig_dir = std::env::temp_dir().join("k8s-auto-installer-tests");
    settings
}

pub fn node(host: &str, role: NodeRole) -> NodeConfig {
    NodeConfig::new(host, role, &test_settings())
}

/// Load balancer, three masters and one worker
pub fn ha_config() -> InstallationConfig {
    InstallationConfig::ha_secure(
        &test_settings(),
        vec![
            node("10.0.0.10", NodeRole::Loadbalancer),
            node("10.0.0.11", NodeRole::Master),
            node("10.0.0.12", NodeRole::Master),
            node("10.0.0.13", NodeRole::Master),
            node("10.0.0.21", NodeRole::Worker),
        ],
    )
}
