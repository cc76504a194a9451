//! Error types for probefan
//!
//! Centralized error handling using thiserror. Per-task failures are not
//! errors at this level: they travel inside an `Outcome` as a `TaskError`.

use thiserror::Error;

/// All error types that can occur in probefan
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Provider identifier did not resolve to a known provider or alias
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Provider resolved but no adapter is registered for it
    #[error("No adapter registered for provider: {0}")]
    AdapterMissing(String),

    /// Progress run id not found
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Batch document could not be expanded into tasks
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// Configuration value rejected
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for probefan operations
pub type Result<T> = std::result::Result<T, ProbeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_error() {
        let err = ProbeError::UnknownProvider("bard".to_string());
        assert_eq!(err.to_string(), "Unknown provider: bard");
    }

    #[test]
    fn test_adapter_missing_error() {
        let err = ProbeError::AdapterMissing("perplexity".to_string());
        assert_eq!(err.to_string(), "No adapter registered for provider: perplexity");
    }

    #[test]
    fn test_run_not_found_error() {
        let err = ProbeError::RunNotFound("run-1".to_string());
        assert_eq!(err.to_string(), "Run not found: run-1");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ProbeError = io_err.into();
        assert!(matches!(err, ProbeError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_err = serde_yaml::from_str::<Vec<String>>("{ not: [a list").unwrap_err();
        let err: ProbeError = yaml_err.into();
        assert!(matches!(err, ProbeError::Yaml(_)));
    }
}
