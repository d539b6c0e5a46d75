// file: src/installer/service.rs
// version: 1.0.0
// guid: 9e4b7c21-0d8a-4f63-b1a5-c6f2e8d4a370

//! Top-level entry point: create, track, cancel and delete installations

use super::factory::{new_installation_id, InstallerFactory};
use super::progress::InstallationProgress;
use super::registry::Registry;
use super::Installer;
use crate::config::InstallationConfig;
use crate::error::InstallerError;
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// Owns the registry; one per process
pub struct InstallerService {
    factory: InstallerFactory,
    registry: Registry,
}

impl InstallerService {
    pub fn new(factory: InstallerFactory) -> Self {
        Self {
            factory,
            registry: Registry::new(),
        }
    }

    pub fn factory(&self) -> &InstallerFactory {
        &self.factory
    }

    /// Validate, register and start an installation; returns its id immediately
    pub async fn create_installer(&self, config: InstallationConfig) -> Result<String> {
        self.factory.validate(&config)?;

        let mut id = new_installation_id();
        while self.registry.contains(&id).await {
            id = new_installation_id();
        }

        let installer = self.factory.create_installer_with_id(id, config)?;
        self.submit(Arc::new(installer)).await
    }

    /// Register an already built installer and run it in the background
    pub async fn submit(&self, installer: Arc<Installer>) -> Result<String> {
        let id = installer.id().to_string();
        self.registry.insert(Arc::clone(&installer)).await?;
        info!("Installation {} submitted ({})", id, installer.mode());

        tokio::spawn(installer.run_guarded());
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Arc<Installer>> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| InstallerError::not_found(format!("Installation {}", id)))
    }

    pub async fn progress(&self, id: &str) -> Result<InstallationProgress> {
        Ok(self.get(id).await?.progress().await)
    }

    pub async fn cancel(&self, id: &str) -> Result<()> {
        self.get(id).await?.cancel().await
    }

    /// Forget a finished installation
    pub async fn delete(&self, id: &str) -> Result<()> {
        let installer = self.get(id).await?;
        let status = installer.status().await;
        if !status.is_terminal() {
            return Err(InstallerError::validation(format!(
                "Installation {} is still {}; cancel it before deleting",
                id, status
            )));
        }

        self.registry.remove(id).await;
        info!("Installation {} deleted", id);
        Ok(())
    }

    /// Progress of every installation, oldest first
    pub async fn list(&self) -> Vec<InstallationProgress> {
        let mut all = Vec::new();
        for installer in self.registry.list().await {
            all.push(installer.progress().await);
        }
        all.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.installation_id.cmp(&b.installation_id))
        });
        all
    }

    /// Cancel everything still running and clear the registry
    pub async fn shutdown(&self) {
        let installers = self.registry.drain().await;
        info!("Shutting down {} installations", installers.len());

        for installer in installers {
            if installer.status().await.is_terminal() {
                continue;
            }
            if let Err(e) = installer.cancel().await {
                warn!("Could not cancel installation {}: {}", installer.id(), e);
            }
        }
    }
}
