//! # Error Types
//!
//! Error types for the secrets store driver using `thiserror`.

use std::path::PathBuf;

/// Custom result type for driver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the secrets store driver
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Request validation errors, never retried
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String, field: Option<String> },

    /// Provider name that cannot be mapped to a local socket
    #[error("Invalid provider name '{name}': {reason}")]
    InvalidProviderName { name: String, reason: String },

    /// Provider socket does not exist (yet)
    #[error("Provider '{name}' not found at {}", .address.display())]
    ProviderNotFound { name: String, address: PathBuf },

    /// Transport or protocol failure talking to a provider
    #[error("Provider RPC error: {message}")]
    GrpcProvider {
        message: String,
        #[source]
        source: Option<Box<tonic::Status>>,
    },

    /// Application error reported by the provider itself
    #[error("Mount request failed with provider error code {code}")]
    ProviderError { code: String },

    /// Filesystem mount / unmount failures
    #[error("Mount error at {}: {message}", .target.display())]
    Mount {
        target: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Resource not found errors
    #[error("Resource not found: {resource_type} with ID '{id}'")]
    NotFound { resource_type: String, id: String },

    /// Resource already exists
    #[error("Resource already exists: {resource_type} with ID '{id}'")]
    AlreadyExists { resource_type: String, id: String },

    /// Write conflicts against the status store
    #[error("Resource conflict: {message}")]
    Conflict { message: String, resource_type: String },

    /// Timeout errors
    #[error("Operation timed out: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument { message: message.into(), field: None }
    }

    /// Create an invalid argument error naming the offending field
    pub fn invalid_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::InvalidArgument { message: message.into(), field: Some(field.into()) }
    }

    pub fn invalid_provider_name<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Self::InvalidProviderName { name: name.into(), reason: reason.into() }
    }

    pub fn provider_not_found<N: Into<String>>(name: N, address: PathBuf) -> Self {
        Self::ProviderNotFound { name: name.into(), address }
    }

    /// Create a provider RPC error without an underlying status
    pub fn grpc_provider<S: Into<String>>(message: S) -> Self {
        Self::GrpcProvider { message: message.into(), source: None }
    }

    /// Create a provider RPC error from a transport status
    pub fn grpc_status<S: Into<String>>(message: S, status: tonic::Status) -> Self {
        Self::GrpcProvider { message: message.into(), source: Some(Box::new(status)) }
    }

    pub fn provider_error<S: Into<String>>(code: S) -> Self {
        Self::ProviderError { code: code.into() }
    }

    /// Create a mount error
    pub fn mount<S: Into<String>>(target: impl Into<PathBuf>, message: S) -> Self {
        Self::Mount { target: target.into(), message: message.into(), source: None }
    }

    /// Create a mount error with the underlying OS error
    pub fn mount_io<S: Into<String>>(
        target: impl Into<PathBuf>,
        message: S,
        source: std::io::Error,
    ) -> Self {
        Self::Mount { target: target.into(), message: message.into(), source: Some(source) }
    }

    /// Create an I/O error with context
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Io { source, context: context.into() }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create an already-exists error
    pub fn already_exists<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::AlreadyExists { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create a conflict error
    pub fn conflict<M: Into<String>, R: Into<String>>(message: M, resource_type: R) -> Self {
        Self::Conflict { message: message.into(), resource_type: resource_type.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), duration_ms }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Stable reason string used for metrics labels and log fields.
    ///
    /// Provider-reported codes are passed through verbatim.
    pub fn code(&self) -> &str {
        match self {
            Error::Config { .. } => "ConfigError",
            Error::InvalidArgument { .. } => "InvalidArgument",
            Error::InvalidProviderName { .. } => "InvalidProviderName",
            Error::ProviderNotFound { .. } => "ProviderNotFound",
            Error::GrpcProvider { .. } => "GRPCProviderError",
            Error::ProviderError { code } => code.as_str(),
            Error::Mount { .. } => "FailedToMount",
            Error::Io { .. } => "IOError",
            Error::Serialization { .. } => "SerializationError",
            Error::NotFound { .. } => "NotFound",
            Error::AlreadyExists { .. } => "AlreadyExists",
            Error::Conflict { .. } => "Conflict",
            Error::Timeout { .. } => "DeadlineExceeded",
            Error::Internal { .. } => "InternalError",
        }
    }

    /// gRPC status code the node service should surface for this error
    pub fn grpc_code(&self) -> tonic::Code {
        match self {
            Error::InvalidArgument { .. } | Error::InvalidProviderName { .. } => {
                tonic::Code::InvalidArgument
            }
            Error::NotFound { .. } | Error::ProviderNotFound { .. } => tonic::Code::NotFound,
            Error::AlreadyExists { .. } => tonic::Code::AlreadyExists,
            Error::Conflict { .. } => tonic::Code::Aborted,
            Error::Timeout { .. } => tonic::Code::DeadlineExceeded,
            _ => tonic::Code::Internal,
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ProviderNotFound { .. }
                | Error::Conflict { .. }
                | Error::Timeout { .. }
                | Error::Io { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::config(format!("Validation failed: {}", message))
    }
}

impl From<Error> for tonic::Status {
    fn from(error: Error) -> Self {
        tonic::Status::new(error.grpc_code(), error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = Error::config("Test configuration error");
        assert!(matches!(error, Error::Config { .. }));
        assert_eq!(error.to_string(), "Configuration error: Test configuration error");
    }

    #[test]
    fn test_invalid_field() {
        let error = Error::invalid_field("Target path missing in request", "target_path");
        if let Error::InvalidArgument { field, .. } = &error {
            assert_eq!(field.as_deref(), Some("target_path"));
        } else {
            panic!("expected invalid argument");
        }
        assert_eq!(error.grpc_code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            Error::provider_not_found("vault", PathBuf::from("/p/vault.sock")).code(),
            "ProviderNotFound"
        );
        assert_eq!(Error::grpc_provider("missing object versions").code(), "GRPCProviderError");
        assert_eq!(Error::invalid_provider_name("../x", "traversal").code(), "InvalidProviderName");
        assert_eq!(Error::mount("/tmp/x", "boom").code(), "FailedToMount");
        assert_eq!(Error::provider_error("AuthFailure").code(), "AuthFailure");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(Error::timeout("mount", 1000).is_retryable());
        assert!(Error::conflict("stale", "status").is_retryable());
        assert!(!Error::invalid_argument("bad").is_retryable());
        assert!(!Error::provider_error("Denied").is_retryable());
    }

    #[test]
    fn test_error_conversions() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_error.into();
        assert!(matches!(err, Error::Io { .. }));

        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_error.into();
        assert!(matches!(err, Error::Serialization { .. }));

        let status: tonic::Status = Error::not_found("pod", "default/web").into();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }
}
