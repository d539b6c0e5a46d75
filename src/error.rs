// file: src/error.rs
// version: 3.0.0
// guid: 57b83a63-07b6-4534-aa6c-51e8797254e0

use thiserror::Error;

/// Result type alias for the installer
pub type Result<T> = std::result::Result<T, InstallerError>;

/// Error types for the Kubernetes auto installer
#[derive(Error, Debug)]
pub enum InstallerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Connectivity error for {host}: {message}")]
    Connectivity { host: String, message: String },

    #[error("Step '{step}' failed on {host}: {message}")]
    StepExecution {
        step: String,
        host: String,
        command: Option<String>,
        exit_code: Option<i32>,
        message: String,
    },

    #[error("Verification error: {0}")]
    Verification(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Installation {id} is already {status}")]
    AlreadyTerminal { id: String, status: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl InstallerError {
    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new connectivity error
    pub fn connectivity(host: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Connectivity {
            host: host.into(),
            message: msg.into(),
        }
    }

    /// Create a step execution error without command context
    pub fn step(step: impl Into<String>, host: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::StepExecution {
            step: step.into(),
            host: host.into(),
            command: None,
            exit_code: None,
            message: msg.into(),
        }
    }

    /// Create a step execution error for a failed command
    pub fn command_failed(
        step: impl Into<String>,
        host: impl Into<String>,
        command: impl Into<String>,
        exit_code: Option<i32>,
        msg: impl Into<String>,
    ) -> Self {
        Self::StepExecution {
            step: step.into(),
            host: host.into(),
            command: Some(command.into()),
            exit_code,
            message: msg.into(),
        }
    }

    /// Create a new verification error
    pub fn verification(msg: impl Into<String>) -> Self {
        Self::Verification(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a step may be attempted again after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connectivity { .. } | Self::StepExecution { .. } | Self::Timeout(_) | Self::Io(_)
        )
    }
}
