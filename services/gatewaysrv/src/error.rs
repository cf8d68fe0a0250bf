//! Error handling for the gateway service
//!
//! Read failures on individual objects are not errors at this level; they
//! travel as [`crate::model::ReadFailure`] values to the verifier. This type
//! covers configuration, transport plumbing and collaborator failures.

use errors::{ErrorCategory, GatewayError, GatewayErrorTrait};
use thiserror::Error;

/// Gateway service error type
#[derive(Error, Debug, Clone)]
pub enum GatewaySrvError {
    /// Configuration-related errors (fatal at bootstrap)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    IoError(String),

    /// Protocol errors (malformed frames, exception responses)
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Connection establishment and maintenance errors
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Data handling errors (parsing, encoding, conversion)
    #[error("Data error: {0}")]
    DataError(String),

    /// Operation timeout errors
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Shared resource errors
    #[error("Resource error: {0}")]
    ResourceError(String),

    /// Device errors (unknown device, no poller)
    #[error("Device error: {0}")]
    DeviceError(String),

    /// Object errors (unknown object, duplicate key)
    #[error("Object error: {0}")]
    ObjectError(String),

    /// Validation errors (invalid parameter, unsupported operation)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Upstream server errors (login, download, upload)
    #[error("Upstream error: {0}")]
    UpstreamError(String),

    /// State and life-cycle errors
    #[error("State error: {0}")]
    StateError(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the gateway service
pub type Result<T> = std::result::Result<T, GatewaySrvError>;

impl GatewaySrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        GatewaySrvError::ConfigError(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        GatewaySrvError::IoError(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        GatewaySrvError::ProtocolError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        GatewaySrvError::ConnectionError(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        GatewaySrvError::DataError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        GatewaySrvError::TimeoutError(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        GatewaySrvError::ResourceError(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        GatewaySrvError::DeviceError(msg.into())
    }

    pub fn object(msg: impl Into<String>) -> Self {
        GatewaySrvError::ObjectError(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        GatewaySrvError::ValidationError(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        GatewaySrvError::UpstreamError(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        GatewaySrvError::StateError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        GatewaySrvError::InternalError(msg.into())
    }

    pub fn device_not_found(id: u32) -> Self {
        GatewaySrvError::DeviceError(format!("Device not found: {}", id))
    }

    pub fn object_not_found(key: impl std::fmt::Display) -> Self {
        GatewaySrvError::ObjectError(format!("Object not found: {}", key))
    }

    pub fn not_connected() -> Self {
        GatewaySrvError::ConnectionError("Not connected".to_string())
    }

    /// Variant name, used as the reliability tag of unexpected read failures
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "ConfigError",
            Self::IoError(_) => "IoError",
            Self::ProtocolError(_) => "ProtocolError",
            Self::ConnectionError(_) => "ConnectionError",
            Self::DataError(_) => "DataError",
            Self::TimeoutError(_) => "TimeoutError",
            Self::ResourceError(_) => "ResourceError",
            Self::DeviceError(_) => "DeviceError",
            Self::ObjectError(_) => "ObjectError",
            Self::ValidationError(_) => "ValidationError",
            Self::UpstreamError(_) => "UpstreamError",
            Self::StateError(_) => "StateError",
            Self::InternalError(_) => "InternalError",
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::ConfigError(_))
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<std::io::Error> for GatewaySrvError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            GatewaySrvError::TimeoutError(err.to_string())
        } else {
            GatewaySrvError::IoError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewaySrvError {
    fn from(err: serde_json::Error) -> Self {
        GatewaySrvError::DataError(format!("JSON: {err}"))
    }
}

impl From<serde_yaml::Error> for GatewaySrvError {
    fn from(err: serde_yaml::Error) -> Self {
        GatewaySrvError::DataError(format!("YAML: {err}"))
    }
}

impl From<figment::Error> for GatewaySrvError {
    fn from(err: figment::Error) -> Self {
        GatewaySrvError::ConfigError(format!("Failed to parse config: {err}"))
    }
}

impl From<reqwest::Error> for GatewaySrvError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewaySrvError::TimeoutError(format!("HTTP: {err}"))
        } else {
            GatewaySrvError::UpstreamError(format!("HTTP: {err}"))
        }
    }
}

impl From<tokio::time::error::Elapsed> for GatewaySrvError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        GatewaySrvError::TimeoutError(err.to_string())
    }
}

impl From<tokio_serial::Error> for GatewaySrvError {
    fn from(err: tokio_serial::Error) -> Self {
        GatewaySrvError::ConnectionError(format!("Serial: {err}"))
    }
}

impl From<tokio_modbus::Error> for GatewaySrvError {
    fn from(err: tokio_modbus::Error) -> Self {
        match err {
            tokio_modbus::Error::Transport(e) => {
                GatewaySrvError::ConnectionError(format!("Modbus transport: {e}"))
            },
            other => GatewaySrvError::ProtocolError(format!("Modbus: {other}")),
        }
    }
}

impl From<tokio_modbus::ExceptionCode> for GatewaySrvError {
    fn from(code: tokio_modbus::ExceptionCode) -> Self {
        GatewaySrvError::ProtocolError(format!("Modbus exception: {code}"))
    }
}

// ============================================================================
// Extension trait for adding context to errors
// ============================================================================

/// Extension trait for adding context to errors
pub trait ErrorExt<T> {
    fn config_error(self, msg: &str) -> Result<T>;
    fn io_error(self, msg: &str) -> Result<T>;
    fn protocol_error(self, msg: &str) -> Result<T>;
    fn connection_error(self, msg: &str) -> Result<T>;
    fn data_error(self, msg: &str) -> Result<T>;
    fn context(self, msg: &str) -> Result<T>;
}

impl<T, E> ErrorExt<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn config_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| GatewaySrvError::ConfigError(format!("{msg}: {e}")))
    }

    fn io_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| GatewaySrvError::IoError(format!("{msg}: {e}")))
    }

    fn protocol_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| GatewaySrvError::ProtocolError(format!("{msg}: {e}")))
    }

    fn connection_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| GatewaySrvError::ConnectionError(format!("{msg}: {e}")))
    }

    fn data_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| GatewaySrvError::DataError(format!("{msg}: {e}")))
    }

    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| GatewaySrvError::InternalError(format!("{msg}: {e}")))
    }
}

// ============================================================================
// Conversion to GatewayError at the process boundary
// ============================================================================

impl From<GatewaySrvError> for GatewayError {
    fn from(err: GatewaySrvError) -> Self {
        match err {
            GatewaySrvError::ConfigError(msg) => GatewayError::Configuration(msg),
            GatewaySrvError::IoError(msg) => GatewayError::Io(std::io::Error::other(msg)),
            GatewaySrvError::ProtocolError(msg) => GatewayError::Protocol {
                protocol: "gatewaysrv".to_string(),
                message: msg,
            },
            GatewaySrvError::ConnectionError(msg) => GatewayError::Communication(msg),
            GatewaySrvError::DataError(msg) => GatewayError::Decode(msg),
            GatewaySrvError::TimeoutError(msg) => GatewayError::Timeout(msg),
            GatewaySrvError::ResourceError(msg) => GatewayError::ResourceBusy(msg),
            GatewaySrvError::DeviceError(msg) | GatewaySrvError::ObjectError(msg) => {
                if msg.contains("not found") {
                    GatewayError::NotFound { resource: msg }
                } else {
                    GatewayError::Validation(msg)
                }
            },
            GatewaySrvError::ValidationError(msg) => GatewayError::Validation(msg),
            GatewaySrvError::UpstreamError(msg) => GatewayError::Upstream {
                service: "http".to_string(),
                message: msg,
            },
            GatewaySrvError::StateError(msg) => GatewayError::Internal(msg),
            GatewaySrvError::InternalError(msg) => GatewayError::Internal(msg),
        }
    }
}

impl GatewayErrorTrait for GatewaySrvError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "GATEWAYSRV_CONFIG_ERROR",
            Self::IoError(_) => "GATEWAYSRV_IO_ERROR",
            Self::ProtocolError(_) => "GATEWAYSRV_PROTOCOL_ERROR",
            Self::ConnectionError(_) => "GATEWAYSRV_CONNECTION_ERROR",
            Self::DataError(_) => "GATEWAYSRV_DATA_ERROR",
            Self::TimeoutError(_) => "GATEWAYSRV_TIMEOUT",
            Self::ResourceError(_) => "GATEWAYSRV_RESOURCE_ERROR",
            Self::DeviceError(_) => "GATEWAYSRV_DEVICE_ERROR",
            Self::ObjectError(_) => "GATEWAYSRV_OBJECT_ERROR",
            Self::ValidationError(_) => "GATEWAYSRV_VALIDATION_ERROR",
            Self::UpstreamError(_) => "GATEWAYSRV_UPSTREAM_ERROR",
            Self::StateError(_) => "GATEWAYSRV_STATE_ERROR",
            Self::InternalError(_) => "GATEWAYSRV_INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError(_) => ErrorCategory::Configuration,
            // Socket and serial I/O
            Self::IoError(_) => ErrorCategory::Connection,
            Self::ProtocolError(_) => ErrorCategory::Protocol,
            Self::ConnectionError(_) => ErrorCategory::Connection,
            Self::DataError(_) => ErrorCategory::Validation,
            Self::TimeoutError(_) => ErrorCategory::Timeout,
            Self::ResourceError(_) => ErrorCategory::ResourceBusy,
            Self::DeviceError(_) => ErrorCategory::NotFound,
            Self::ObjectError(_) => ErrorCategory::NotFound,
            Self::ValidationError(_) => ErrorCategory::Validation,
            Self::UpstreamError(_) => ErrorCategory::Network,
            Self::StateError(_) => ErrorCategory::ResourceBusy,
            Self::InternalError(_) => ErrorCategory::Internal,
        }
    }
}
