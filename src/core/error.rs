use thiserror::Error;

#[derive(Error, Debug)]
pub enum LanternError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Trace not found: {0}")]
    TraceNotFound(String),

    #[error("Invalid window: min timestamp {min_ts} is greater than max timestamp {max_ts}")]
    InvalidWindow { min_ts: i64, max_ts: i64 },

    #[error("Argument must not be null: {0}")]
    NullArgument(&'static str),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("OTEL protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("GRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Timeout error: operation took longer than {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Buffer full: cannot accept more telemetry")]
    BufferFull,

    #[error("Ingestion buffer closed")]
    BufferClosed,
}

/// Result type alias for Lantern operations
pub type Result<T> = std::result::Result<T, LanternError>;

impl LanternError {
    /// Creates a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a new conversion error
    pub fn conversion<S: Into<String>>(msg: S) -> Self {
        Self::Conversion(msg.into())
    }

    /// Creates a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Creates a new protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Creates a new not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Returns true if this error is worth retrying at the ingestion boundary
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Storage(_) | Self::Io(_) | Self::Network(_) => true,
            Self::Timeout { .. } => true,
            Self::Grpc(status) => {
                matches!(status.code(), tonic::Code::Unavailable | tonic::Code::DeadlineExceeded)
            },
            _ => false,
        }
    }

    /// Returns true if the error was caused by caller input
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvalidWindow { .. } | Self::NullArgument(_))
    }

    /// Returns the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::InvalidWindow { .. } | Self::NullArgument(_) => {
                "validation"
            },
            Self::Conversion(_) => "conversion",
            Self::Storage(_) => "storage",
            Self::NotFound(_) | Self::TraceNotFound(_) => "not_found",
            Self::Cancelled => "cancelled",
            Self::Protocol(_) => "protocol",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) | Self::Encoding(_) => "serialization",
            Self::Grpc(_) | Self::Network(_) => "network",
            Self::Join(_) => "async",
            Self::Timeout { .. } => "timeout",
            Self::BufferFull | Self::BufferClosed => "buffer",
        }
    }
}

impl From<bincode::Error> for LanternError {
    fn from(err: bincode::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = LanternError::validation("limit must be positive");
        assert_eq!(err.to_string(), "Validation error: limit must be positive");
        assert_eq!(err.category(), "validation");
        assert!(err.is_validation());
    }

    #[test]
    fn test_error_recoverability() {
        assert!(LanternError::storage("disk full").is_recoverable());
        assert!(!LanternError::validation("bad step").is_recoverable());
        assert!(!LanternError::Cancelled.is_recoverable());
        assert!(LanternError::Timeout { timeout_ms: 5000 }.is_recoverable());
    }

    #[test]
    fn test_invalid_window_message() {
        let err = LanternError::InvalidWindow { min_ts: 20, max_ts: 10 };
        assert_eq!(
            err.to_string(),
            "Invalid window: min timestamp 20 is greater than max timestamp 10"
        );
        assert_eq!(err.category(), "validation");
    }
}
