// file: src/logging/logger.rs
// version: 2.0.0
// guid: j0k1l2m3-n4o5-6789-0123-456789jklmno

//! Logger initialization and installation spans

use crate::Result;
use tracing::Instrument;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system for interactive use
pub fn init_logger(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init()
        .map_err(|e| {
            crate::error::InstallerError::config(format!("Failed to initialize logger: {}", e))
        })?;

    Ok(())
}

/// Initialize structured JSON logging (for embedding in services)
pub fn init_json_logger() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_current_span(true))
        .try_init()
        .map_err(|e| {
            crate::error::InstallerError::config(format!(
                "Failed to initialize JSON logger: {}",
                e
            ))
        })?;

    Ok(())
}

/// Span wrapping everything one installation logs
pub fn installation_span(installation_id: &str, mode: &str) -> tracing::Span {
    tracing::info_span!("installation", id = installation_id, mode = mode)
}

/// Create an async scoped logger for operations
pub async fn with_async_operation_span<F, Fut, R>(operation: &str, f: F) -> R
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = R>,
{
    let span = tracing::info_span!("operation", name = operation);
    async move { f().await }.instrument(span).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logger_twice_reports_error() {
        // Arrange
        let _ = init_logger(false, true);

        // Act
        let second = init_logger(true, false);

        // Assert
        // A global subscriber can only be installed once per process
        assert!(second.is_err());
    }

    #[test]
    fn test_installation_span_metadata() {
        let span = installation_span("abcd1234", "all_in_one");
        // Disabled spans have no metadata when no subscriber is listening
        if let Some(meta) = span.metadata() {
            assert_eq!(meta.name(), "installation");
        }
    }

    #[tokio::test]
    async fn test_with_async_operation_span() {
        // Arrange
        let operation = "async_test_operation";

        // Act
        let result = with_async_operation_span(operation, || async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            42
        })
        .await;

        // Assert
        assert_eq!(result, 42);
    }
}
