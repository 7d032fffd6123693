use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Quarry
#[derive(Error, Debug)]
pub enum QuarryError {
    /// Bad input shape or values (client-fixable)
    #[error("Validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    /// Query text normalised to nothing
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Bad pagination or call arguments
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Document id does not exist
    #[error("Document not found: {id}")]
    NotFound { id: String },

    /// Embedding has the wrong number of dimensions
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Downstream I/O exceeded its deadline
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    /// Optional dependency is down
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Invariant violation
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Server / IPC errors
    #[error("Server error: {0}")]
    Server(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl QuarryError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn timeout(operation: impl Into<String>, after_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after_ms,
        }
    }

    /// Collapse onto the wire-level error taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::ValidationError,
            Self::InvalidQuery(_) => ErrorKind::InvalidQuery,
            Self::InvalidArguments(_) => ErrorKind::InvalidArguments,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Json { .. } => ErrorKind::ValidationError,
            _ => ErrorKind::Internal,
        }
    }
}

/// Error kinds exposed to API callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    InvalidQuery,
    InvalidArguments,
    NotFound,
    DimensionMismatch,
    Timeout,
    Unavailable,
    Internal,
}

impl ErrorKind {
    /// HTTP-style status code for this kind
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ValidationError
            | Self::InvalidQuery
            | Self::InvalidArguments
            | Self::DimensionMismatch => 400,
            Self::NotFound => 404,
            Self::Timeout => 504,
            Self::Unavailable => 503,
            Self::Internal => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable)
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Quarry operations
pub type Result<T> = std::result::Result<T, QuarryError>;
