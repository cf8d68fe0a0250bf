//! Unified error handling for gateway services
//!
//! Every service keeps its own domain error type and converts it into
//! [`GatewayError`] at the process boundary, where the exit path and the
//! log line only need a code and a category. The category also decides
//! whether a failed connection attempt is worth repeating.

use thiserror::Error;

// ============================================================================
// GatewayError - Main error type
// ============================================================================

/// Process-boundary error for all gateway services
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    #[error("Upstream error: {service}: {message}")]
    Upstream { service: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using GatewayError
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayErrorTrait for GatewayError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::Communication(_) => "COMMUNICATION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Decode(_) => "DECODE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ResourceBusy(_) => "RESOURCE_BUSY",
            Self::Upstream { .. } => "UPSTREAM_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::Communication(_) => ErrorCategory::Connection,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Decode(_) | Self::Validation(_) => ErrorCategory::Validation,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::ResourceBusy(_) => ErrorCategory::ResourceBusy,
            Self::Upstream { .. } => ErrorCategory::Network,
            Self::Io(_) | Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}

// ============================================================================
// Gateway Error Trait
// ============================================================================

/// Error category - used for classification and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Timeout,
    Validation,
    NotFound,
    Protocol,
    Connection,
    Internal,
    ResourceBusy,
}

/// Gateway error capability trait
///
/// Service error types keep their own variants and gain a common outward
/// interface by implementing this trait.
pub trait GatewayErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Error code for logs
    fn error_code(&self) -> &'static str;

    fn category(&self) -> ErrorCategory;

    /// Whether the error is retryable (category-based by default)
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::ResourceBusy
                | ErrorCategory::Connection
        )
    }
}
