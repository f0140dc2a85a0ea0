//! Error types for the dispatch engine
//!
//! Dispatch failures are mostly behavioural (a blocked send, a cancelled
//! child, a missing service) and are reported through `Delivery` values rather
//! than errors. `DispatchError` covers the remaining cases: bad configuration
//! and failures raised by node behaviours.

use crate::message::MessageType;

/// Errors produced by the engine or returned by node behaviours
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Invalid configuration: {message} (field: {field:?})")]
    InvalidConfig {
        message: String,
        field: Option<&'static str>,
    },

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(MessageType),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Handler failed: {0}")]
    Handler(#[from] anyhow::Error),
}

impl DispatchError {
    /// Create an invalid configuration error
    pub fn invalid_config(message: impl Into<String>, field: Option<&'static str>) -> Self {
        DispatchError::InvalidConfig {
            message: message.into(),
            field,
        }
    }

    /// Create an unknown message type error
    pub fn unknown_message_type(kind: &MessageType) -> Self {
        DispatchError::UnknownMessageType(kind.clone())
    }

    /// Create a handler error from any displayable failure
    pub fn handler(msg: impl std::fmt::Display) -> Self {
        DispatchError::Handler(anyhow::anyhow!("{}", msg))
    }

    /// Check if this error comes from loading or validating configuration
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            DispatchError::InvalidConfig { .. }
                | DispatchError::ConfigParse(_)
                | DispatchError::ConfigSerialize(_)
                | DispatchError::Io(_)
        )
    }

    /// Short category label used in structured log fields
    pub fn category(&self) -> &'static str {
        match self {
            DispatchError::InvalidConfig { .. }
            | DispatchError::ConfigParse(_)
            | DispatchError::ConfigSerialize(_) => "config",
            DispatchError::Io(_) => "io",
            DispatchError::UnknownMessageType(_) => "unknown_message",
            DispatchError::Cancelled => "cancelled",
            DispatchError::Handler(_) => "handler",
        }
    }
}

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;
