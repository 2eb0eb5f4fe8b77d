//! Error types for the load generator.

use thiserror::Error;

/// Result type alias using LoadGenError.
pub type LoadResult<T> = Result<T, LoadGenError>;

/// Primary error type for engine construction and lifecycle.
#[derive(Debug, Error)]
pub enum LoadGenError {
    // === Configuration Errors ===
    #[error("Invalid configuration for '{field}': {message}")]
    InvalidConfig { field: String, message: String },

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Unknown workload profile: {0}")]
    UnknownProfile(String),

    // === Lifecycle Errors ===
    #[error("Failed to create any client instances ({attempted} attempted)")]
    NoClients { attempted: usize },

    #[error("Engine is not in a runnable state: {0}")]
    InvalidState(String),

    // === Infrastructure Errors ===
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl LoadGenError {
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        LoadGenError::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for errors the user fixes by changing the configuration.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            LoadGenError::InvalidConfig { .. }
                | LoadGenError::UnknownOperation(_)
                | LoadGenError::UnknownProfile(_)
        )
    }
}

/// Coarse classification of a store client failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientErrorKind {
    Connection,
    Timeout,
    Response,
    Closed,
    Unsupported,
    Other,
}

impl ClientErrorKind {
    /// Tag used in the error-kind histogram and telemetry labels.
    pub fn as_tag(&self) -> &'static str {
        match self {
            ClientErrorKind::Connection => "ConnectionError",
            ClientErrorKind::Timeout => "TimeoutError",
            ClientErrorKind::Response => "ResponseError",
            ClientErrorKind::Closed => "ClientClosed",
            ClientErrorKind::Unsupported => "UnsupportedOperation",
            ClientErrorKind::Other => "ClientError",
        }
    }
}

/// Error returned by a store client through the facade.
#[derive(Debug, Clone, Error)]
#[error("{}: {message}", kind.as_tag())]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: ClientErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Connection, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Timeout, message)
    }

    pub fn response(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Response, message)
    }

    pub fn closed() -> Self {
        Self::new(ClientErrorKind::Closed, "client has been closed")
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Unsupported, message)
    }

    pub fn kind_tag(&self) -> &'static str {
        self.kind.as_tag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_display_includes_kind() {
        let err = ClientError::timeout("read timed out");
        assert_eq!(err.to_string(), "TimeoutError: read timed out");
        assert_eq!(err.kind_tag(), "TimeoutError");
    }

    #[test]
    fn test_config_error_classification() {
        assert!(LoadGenError::invalid_config("test.clients", "must be > 0").is_config_error());
        assert!(LoadGenError::UnknownOperation("FLUSHALL".into()).is_config_error());
        assert!(!LoadGenError::NoClients { attempted: 4 }.is_config_error());
    }
}
