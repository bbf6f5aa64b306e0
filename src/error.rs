//! Error types for the XCP gateway

use thiserror::Error;

/// Main error type for the XCP gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    // Symbol resolver errors
    #[error("Malformed firmware image: {0}")]
    MalformedImage(String),

    #[error("Unsupported firmware format: {0}")]
    UnsupportedFormat(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Invalid symbol path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    // Protocol master errors
    #[error("Timeout waiting for controller response")]
    Timeout,

    #[error("Controller rejected connection: {0}")]
    Rejected(String),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Controller unavailable: {0}")]
    ControllerUnavailable(String),

    // Gateway errors
    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    #[error("Unknown controller: {0}")]
    UnknownController(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<goblin::error::Error> for GatewayError {
    fn from(error: goblin::error::Error) -> Self {
        GatewayError::MalformedImage(error.to_string())
    }
}

impl From<gimli::Error> for GatewayError {
    fn from(error: gimli::Error) -> Self {
        GatewayError::MalformedImage(format!("DWARF parse error: {}", error))
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// True for errors that are reported to the originating client and
    /// must never tear down the serving process.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GatewayError::SymbolNotFound(_)
                | GatewayError::InvalidPath { .. }
                | GatewayError::MalformedCommand(_)
                | GatewayError::UnknownController(_)
        )
    }
}
