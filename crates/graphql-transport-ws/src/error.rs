//! Error handling for the client.

use thiserror::Error;

use crate::types::OperationId;

/// The main result type used throughout the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
///
/// Every error that reaches the `on_error` callback is fatal: the protocol
/// loop has stopped and will not reconnect.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The client or the server broke the protocol.
    #[error("Protocol violation: {message}")]
    Protocol { message: String },

    /// An operation id was subscribed twice.
    #[error("Operation {id} was subscribed twice")]
    DuplicateOperation { id: OperationId },

    /// An inbound frame could not be decoded or failed validation.
    #[error("Invalid message: {message}")]
    InvalidMessage { message: String },

    /// The socket closed with a code that forbids retrying.
    #[error("Fatal close event: code={code}, reason={reason}")]
    FatalClose { code: u16, reason: String },

    /// The connection params provider failed.
    #[error("Connection params error: {message}")]
    ConnectionParams { message: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// WebSocket errors
    #[error("WebSocket error: {message}")]
    WebSocket { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The client has been disposed or stopped after a fatal error.
    #[error("Client has been disposed")]
    Disposed,

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

#[cfg(feature = "tungstenite")]
impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket {
            message: e.to_string(),
        }
    }
}

impl ClientError {
    /// Create a protocol violation error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an invalid message error.
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::InvalidMessage {
            message: message.into(),
        }
    }

    /// Create a fatal close error.
    pub fn fatal_close(code: u16, reason: impl Into<String>) -> Self {
        Self::FatalClose {
            code,
            reason: reason.into(),
        }
    }

    /// Create a connection params error.
    pub fn connection_params(message: impl Into<String>) -> Self {
        Self::ConnectionParams {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a WebSocket error.
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
