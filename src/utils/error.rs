use thiserror::Error;

/// Custom error types for the request security subsystem
#[derive(Error, Debug)]
pub enum SecurityError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Audit export serialization errors
    #[error("Export error: {0}")]
    Export(#[from] serde_json::Error),

    /// Permission checker failures
    #[error("Permission check failed: {0}")]
    PermissionCheck(String),

    /// Invalid request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal errors
    #[error("Internal security error: {0}")]
    Internal(String),
}

/// Result type for request security operations
pub type SecurityResult<T> = Result<T, SecurityError>;
