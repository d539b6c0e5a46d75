// file: src/config/loader.rs
// version: 2.0.0
// guid: d4e5f6g7-h8i9-0123-4567-890123defghi

//! Configuration file loading and environment variable substitution

use super::{InstallationConfig, Settings};
use crate::error::InstallerError;
use crate::Result;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Configuration loader with `${VAR}` substitution
pub struct ConfigLoader {
    env_vars: HashMap<String, String>,
}

impl ConfigLoader {
    /// Create a loader seeded with the process environment
    pub fn new() -> Self {
        Self {
            env_vars: std::env::vars().collect(),
        }
    }

    /// Create a loader that only knows the given variables
    pub fn with_vars(env_vars: HashMap<String, String>) -> Self {
        Self { env_vars }
    }

    /// Load an installation request from a YAML file
    ///
    /// The request is parsed but not validated; validation needs settings
    /// and happens when an installer is created.
    pub fn load_installation_config<P: AsRef<Path>>(&self, path: P) -> Result<InstallationConfig> {
        let content = self.read(path.as_ref(), "installation config")?;
        let expanded = self.expand_env_vars(&content)?;
        let config: InstallationConfig = serde_yaml::from_str(&expanded)?;
        debug!(
            "Loaded {} config with {} nodes from {}",
            config.mode,
            config.nodes.len(),
            path.as_ref().display()
        );
        Ok(config)
    }

    /// Load settings from a YAML file, then apply environment overrides
    pub fn load_settings<P: AsRef<Path>>(&self, path: P) -> Result<Settings> {
        let content = self.read(path.as_ref(), "settings")?;
        let expanded = self.expand_env_vars(&content)?;
        let settings: Settings = serde_yaml::from_str(&expanded)?;
        Ok(settings.apply_env())
    }

    /// Settings from `path` when given, defaults otherwise
    pub fn load_settings_or_default(&self, path: Option<&Path>) -> Result<Settings> {
        match path {
            Some(path) => self.load_settings(path),
            None => Ok(Settings::default().apply_env()),
        }
    }

    fn read(&self, path: &Path, what: &str) -> Result<String> {
        fs::read_to_string(path).map_err(|e| {
            InstallerError::config(format!(
                "Failed to read {} file {}: {}",
                what,
                path.display(),
                e
            ))
        })
    }

    /// Expand environment variables in configuration content
    fn expand_env_vars(&self, content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| InstallerError::config(format!("Invalid regex pattern: {}", e)))?;

        let mut result = content.to_string();
        let mut missing_vars = Vec::new();

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let placeholder = &cap[0];

            if let Some(value) = self.env_vars.get(var_name) {
                result = result.replace(placeholder, value);
            } else if !missing_vars.iter().any(|v| v == var_name) {
                missing_vars.push(var_name.to_string());
            }
        }

        if !missing_vars.is_empty() {
            return Err(InstallerError::config(format!(
                "Missing environment variables: {}",
                missing_vars.join(", ")
            )));
        }

        Ok(result)
    }

    /// Set environment variable for substitution
    pub fn set_env_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env_vars.insert(key.into(), value.into());
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CniProvider, InstallationMode, NodeRole};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_env_var_expansion() {
        let mut loader = ConfigLoader::with_vars(HashMap::new());
        loader.set_env_var("TEST_VAR", "test_value");

        let result = loader.expand_env_vars("key: ${TEST_VAR}").unwrap();
        assert_eq!(result, "key: test_value");
    }

    #[test]
    fn test_missing_env_var_listed_once() {
        let loader = ConfigLoader::with_vars(HashMap::new());

        let err = loader
            .expand_env_vars("a: ${MISSING_VAR}\nb: ${MISSING_VAR}")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing environment variables: MISSING_VAR"
        );
    }

    #[test]
    fn test_load_ha_config() -> Result<()> {
        // Arrange
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            r#"
mode: ha_secure
k8s_version: "1.29"
cni_provider: calico
nodes:
  - host: 10.0.0.10
    role: loadbalancer
  - host: 10.0.0.11
    role: master
    ssh_password: ${{NODE_PASSWORD}}
"#
        )?;
        let mut loader = ConfigLoader::with_vars(HashMap::new());
        loader.set_env_var("NODE_PASSWORD", "s3cret");

        // Act
        let config = loader.load_installation_config(file.path())?;

        // Assert
        assert_eq!(config.mode, InstallationMode::HaSecure);
        assert_eq!(config.cni_provider, CniProvider::Calico);
        assert_eq!(config.nodes[1].role, NodeRole::Master);
        assert_eq!(config.nodes[1].ssh_password.as_deref(), Some("s3cret"));
        Ok(())
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let loader = ConfigLoader::with_vars(HashMap::new());
        let err = loader
            .load_installation_config("/nonexistent/cluster.yaml")
            .unwrap_err();
        assert!(matches!(err, InstallerError::Config(_)));
    }

    #[test]
    fn test_load_settings_partial_file() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "preflight:\n  min_disk_gb: 20\n")?;

        let settings = ConfigLoader::with_vars(HashMap::new()).load_settings(file.path())?;

        assert_eq!(settings.preflight.min_disk_gb, 20);
        assert_eq!(settings.preflight.min_memory_mb, 2048);
        Ok(())
    }
}
