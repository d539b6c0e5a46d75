// file: src/installer/registry.rs
// version: 1.0.0
// guid: 1a6e9d3c-4f07-4b28-8c5d-e3b2a7f0c914

//! Installation id to installer lookup

use super::Installer;
use crate::error::InstallerError;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Concurrency-safe map of installations
///
/// The lock is held only for the map operation itself, never while an
/// installation runs.
#[derive(Default)]
pub struct Registry {
    installers: RwLock<HashMap<String, Arc<Installer>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, installer: Arc<Installer>) -> Result<()> {
        let mut installers = self.installers.write().await;
        if installers.contains_key(installer.id()) {
            return Err(InstallerError::internal(format!(
                "Installation {} is already registered",
                installer.id()
            )));
        }
        installers.insert(installer.id().to_string(), installer);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Installer>> {
        self.installers.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.installers.read().await.contains_key(id)
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Installer>> {
        self.installers.write().await.remove(id)
    }

    pub async fn list(&self) -> Vec<Arc<Installer>> {
        self.installers.read().await.values().cloned().collect()
    }

    /// Remove and return every installer
    pub async fn drain(&self) -> Vec<Arc<Installer>> {
        self.installers.write().await.drain().map(|(_, v)| v).collect()
    }

    pub async fn len(&self) -> usize {
        self.installers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.installers.read().await.is_empty()
    }
}
