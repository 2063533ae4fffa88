//! Error handling for the mining coordinator
//!
//! Error types covering configuration, chain validation, worker supervision and
//! the overall session deadline, with enough context to tell fatal failures apart
//! from caller-level ones.

use thiserror::Error;

/// Result type alias for mining operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the mining coordinator
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A block failed hash or link validation on append or audit
    #[error("Chain validation failed at block {index}: {message}")]
    Validation { index: usize, message: String },

    /// The mining session did not finish before its deadline
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Worker supervision errors
    #[error("Worker error: worker {worker}: {message}")]
    Worker { worker: String, message: String },

    /// Coordinator bookkeeping invariant violations
    #[error("Protocol violation: {message}")]
    Protocol { message: String },

    /// Payload generation errors
    #[error("Payload error: {message}")]
    Payload { message: String },

    /// Cancellation errors for async operations
    #[error("Operation was cancelled: {operation}")]
    Cancelled { operation: String },

    /// Invalid state errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a chain validation error for the block at `index`
    pub fn validation(index: usize, message: impl Into<String>) -> Self {
        Self::Validation {
            index,
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a worker error
    pub fn worker(worker: impl ToString, message: impl Into<String>) -> Self {
        Self::Worker {
            worker: worker.to_string(),
            message: message.into(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a payload error
    pub fn payload(message: impl Into<String>) -> Self {
        Self::Payload {
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Whether this error aborts a running mining session outright
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Validation { .. } | Error::Protocol { .. })
    }

    /// Whether this error is the overall deadline expiring
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Config { .. } => "config",
            Error::Validation { .. } => "validation",
            Error::Timeout { .. } => "timeout",
            Error::Worker { .. } => "worker",
            Error::Protocol { .. } => "protocol",
            Error::Payload { .. } => "payload",
            Error::Cancelled { .. } => "cancelled",
            Error::InvalidState { .. } => "invalid_state",
        }
    }
}
