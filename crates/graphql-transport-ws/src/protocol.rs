//! Wire frames of the `graphql-transport-ws` protocol.
//!
//! Every frame is a JSON object with a `type` discriminator. [`Frame::decode`]
//! performs the structural validation the protocol requires; a frame that
//! fails it is a protocol violation by the server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{ClientError, ClientResult},
    types::OperationId,
};

/// WebSocket sub-protocol negotiated with the server.
pub const GRAPHQL_TRANSPORT_WS_PROTOCOL: &str = "graphql-transport-ws";

/// A JSON object payload.
pub type JsonObject = serde_json::Map<String, Value>;

/// Request carried by a `subscribe` frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    /// Name of the operation to run when the document holds several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Operation document.
    pub query: String,
    /// Operation variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<JsonObject>,
}

impl SubscribePayload {
    /// Create a payload for the given document.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            operation_name: None,
            query: query.into(),
            variables: None,
        }
    }

    /// Set the operation name.
    #[must_use]
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Set the operation variables.
    #[must_use]
    pub fn variables(mut self, variables: JsonObject) -> Self {
        self.variables = Some(variables);
        self
    }
}

/// An execution error reported by the server in an `error` frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    /// Human-readable message.
    pub message: String,
    /// Remaining fields (`locations`, `path`, `extensions`, ...).
    #[serde(flatten)]
    pub extra: JsonObject,
}

/// A protocol frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Client handshake request.
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<JsonObject>,
    },
    /// Server handshake acknowledgment.
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<JsonObject>,
    },
    /// Client operation request.
    Subscribe {
        id: OperationId,
        payload: SubscribePayload,
    },
    /// Operation result.
    Next { id: OperationId, payload: JsonObject },
    /// Operation execution errors; terminal for the operation.
    Error {
        id: OperationId,
        payload: Vec<GraphQLError>,
    },
    /// Operation completion, sent by either side.
    Complete { id: OperationId },
}

impl Frame {
    /// Value of the `type` discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionInit { .. } => "connection_init",
            Self::ConnectionAck { .. } => "connection_ack",
            Self::Subscribe { .. } => "subscribe",
            Self::Next { .. } => "next",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }

    /// Parse and validate an inbound frame.
    pub fn decode(text: &str) -> ClientResult<Self> {
        let frame: Self = serde_json::from_str(text)
            .map_err(|e| ClientError::invalid_message(format!("{e}: {text}")))?;

        if let Self::Error { id, payload } = &frame
            && payload.is_empty()
        {
            return Err(ClientError::invalid_message(format!(
                "error frame for {id} carries no errors"
            )));
        }

        Ok(frame)
    }

    /// Serialize an outbound frame.
    pub fn encode(&self) -> ClientResult<String> {
        serde_json::to_string(self).map_err(Into::into)
    }
}
