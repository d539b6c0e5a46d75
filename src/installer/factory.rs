// file: src/installer/factory.rs
// version: 1.0.0
// guid: 5d2f8a10-6c3e-4b97-9e41-a8b7c0d3f256

//! Builds installers: mode dispatch, validation and dependency wiring

use super::retry::{Sleeper, TokioSleeper};
use super::Installer;
use crate::config::{validate_installation, InstallationConfig, InstallationMode, Settings};
use crate::network::{ExecutorPool, RemoteExecutor};
use crate::steps::{all_in_one, ha_secure, InstallationStep};
use crate::Result;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Creates the executor for one installation
pub type ExecutorFactory = Arc<dyn Fn() -> Arc<dyn RemoteExecutor> + Send + Sync>;

/// Short installation identifier, e.g. `3f9a0c1e`
pub fn new_installation_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Step sequence for the config's mode
pub fn step_sequence(config: &InstallationConfig) -> Vec<InstallationStep> {
    match config.mode {
        InstallationMode::AllInOne => all_in_one::steps(config),
        InstallationMode::HaSecure => ha_secure::steps(config),
    }
}

/// Validates configs and wires each installer to its own executor
#[derive(Clone)]
pub struct InstallerFactory {
    settings: Arc<Settings>,
    executor_factory: ExecutorFactory,
    sleeper: Arc<dyn Sleeper>,
}

impl InstallerFactory {
    /// Production wiring: a fresh SSH pool per installation and real sleeps
    pub fn new(settings: Settings) -> Self {
        let system_info_timeout = settings.connectivity_timeout();
        let executor_factory: ExecutorFactory = Arc::new(move || {
            Arc::new(ExecutorPool::new(system_info_timeout)) as Arc<dyn RemoteExecutor>
        });
        Self::with_executor_factory(settings, executor_factory, Arc::new(TokioSleeper))
    }

    pub fn with_executor_factory(
        settings: Settings,
        executor_factory: ExecutorFactory,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            executor_factory,
            sleeper,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn validate(&self, config: &InstallationConfig) -> Result<()> {
        validate_installation(config, &self.settings)
    }

    /// Validate and build an installer under a fresh identifier
    pub fn create_installer(&self, config: InstallationConfig) -> Result<Installer> {
        self.create_installer_with_id(new_installation_id(), config)
    }

    pub fn create_installer_with_id(
        &self,
        id: impl Into<String>,
        config: InstallationConfig,
    ) -> Result<Installer> {
        let steps = step_sequence(&config);
        self.create_with_steps(id, config, steps)
    }

    /// Validate and build an installer running `steps` instead of the mode's sequence
    pub fn create_with_steps(
        &self,
        id: impl Into<String>,
        config: InstallationConfig,
        steps: Vec<InstallationStep>,
    ) -> Result<Installer> {
        self.validate(&config)?;
        let id = id.into();
        info!(
            "Creating {} installer {} ({} steps)",
            config.mode,
            id,
            steps.len()
        );

        Ok(Installer::new(
            id,
            config,
            Arc::clone(&self.settings),
            steps,
            (self.executor_factory)(),
            Arc::clone(&self.sleeper),
        ))
    }
}
