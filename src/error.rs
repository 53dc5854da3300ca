//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout pgferry.
//! All errors are structured and map to stable error codes for JSON output.
//!
//! # Error Categories
//! - `DuplicateNode` / `UnknownNode`: Dependency graph misuse
//! - `Catalog`: Catalog metadata could not be read for an object
//! - `Driver`: The database reported a failed statement
//! - `ImportAborted`: An import stopped because `error_mode` is `abort`
//! - `InvalidInput`: Malformed input or missing required parameters
//! - `ConnectionFailed`: Database connection errors
//! - `ConfigError`: Configuration file or profile registry errors
//! - `Io` / `Json` / `Csv`: Wrapped library errors

use thiserror::Error;

/// Main error type for pgferry operations
#[derive(Error, Debug)]
pub enum FerryError {
    /// A node with the same oid was already added to the dependency graph
    #[error("Duplicate node in dependency graph: {0}")]
    DuplicateNode(String),

    /// An edge references an oid that was never added to the graph
    #[error("Unknown node in dependency graph: {0}")]
    UnknownNode(String),

    /// Catalog metadata could not be fetched
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// The driver reported a non-zero status for a statement
    #[error("Statement failed: {message}")]
    Driver { sql: String, message: String },

    /// Import terminated because a statement failed under `error_mode = abort`
    #[error("Import aborted: {message}")]
    ImportAborted { sql: String, message: String },

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Database connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Configuration error (file not found, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error while reading input or writing a dump
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV writer error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl FerryError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateNode(_) => "DUPLICATE_NODE",
            Self::UnknownNode(_) => "UNKNOWN_NODE",
            Self::Catalog(_) => "CATALOG_ERROR",
            Self::Driver { .. } => "STATEMENT_FAILED",
            Self::ImportAborted { .. } => "IMPORT_ABORTED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Csv(_) => "CSV_ERROR",
        }
    }

    /// Get human-readable error message
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// The SQL text attached to statement-level errors
    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Driver { sql, .. } | Self::ImportAborted { sql, .. } => Some(sql),
            _ => None,
        }
    }

    /// Create a catalog error
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog(message.into())
    }

    /// Create a driver error for a failed statement
    pub fn driver(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Driver { sql: sql.into(), message: message.into() }
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}

/// Result type alias for pgferry operations
pub type Result<T> = std::result::Result<T, FerryError>;
