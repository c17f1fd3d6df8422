//! Messages exchanged between the loops over the [`Router`](crate::router::Router).
//!
//! Each category names its producer and consumer. Matching is exhaustive
//! everywhere so a new variant is a compile error, not a silent drop.

use crate::{
    connection::ConnectionEpoch,
    protocol::{GraphQLError, JsonObject, SubscribePayload},
    types::{CloseEvent, OperationId},
};

/// Client → protocol requests.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    /// Register an operation.
    Subscribe {
        id: OperationId,
        payload: SubscribePayload,
    },
    /// Stop an operation.
    Unsubscribe { id: OperationId },
    /// Close the connection and stop the protocol loop.
    Disconnect,
}

/// Transport → protocol socket lifecycle events.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// The socket is open.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// The socket reported an error; a `Closed` follows.
    Error(String),
    /// The socket closed. Emitted exactly once per opened socket.
    Closed(CloseEvent),
}

/// Protocol → transport commands.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportCommand {
    /// Open a socket for the given attempt.
    Open { epoch: ConnectionEpoch },
    /// Write a text frame.
    Send { epoch: ConnectionEpoch, text: String },
    /// Close the socket.
    Close {
        epoch: ConnectionEpoch,
        code: u16,
        reason: String,
    },
}

impl TransportCommand {
    /// Attempt this command belongs to.
    pub fn epoch(&self) -> ConnectionEpoch {
        match self {
            Self::Open { epoch } | Self::Send { epoch, .. } | Self::Close { epoch, .. } => *epoch,
        }
    }
}

/// Protocol → subscription results, addressed by operation id.
#[derive(Clone, Debug, PartialEq)]
pub enum OperationEvent {
    /// A result for the operation.
    Next {
        id: OperationId,
        payload: JsonObject,
    },
    /// Execution errors; terminal.
    Error {
        id: OperationId,
        errors: Vec<GraphQLError>,
    },
    /// The server finished the operation; terminal.
    Complete { id: OperationId },
}

impl OperationEvent {
    /// Operation this event is addressed to.
    pub fn id(&self) -> &OperationId {
        match self {
            Self::Next { id, .. } | Self::Error { id, .. } | Self::Complete { id } => id,
        }
    }
}

/// Connection lifecycle notifications for listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum Instrumentation {
    /// A socket is about to be requested.
    Connecting,
    /// The handshake was acknowledged, with the ack payload.
    Connected(Option<JsonObject>),
    /// The socket closed.
    Disconnected(CloseEvent),
}

/// Everything that travels over the router.
#[derive(Clone, Debug, PartialEq)]
pub enum RouterMessage {
    Client(ClientMessage),
    Transport(TransportEvent),
    Command(TransportCommand),
    Operation(OperationEvent),
    Instrumentation(Instrumentation),
}

impl From<ClientMessage> for RouterMessage {
    fn from(msg: ClientMessage) -> Self {
        Self::Client(msg)
    }
}

impl From<TransportEvent> for RouterMessage {
    fn from(event: TransportEvent) -> Self {
        Self::Transport(event)
    }
}

impl From<TransportCommand> for RouterMessage {
    fn from(cmd: TransportCommand) -> Self {
        Self::Command(cmd)
    }
}

impl From<OperationEvent> for RouterMessage {
    fn from(event: OperationEvent) -> Self {
        Self::Operation(event)
    }
}

impl From<Instrumentation> for RouterMessage {
    fn from(event: Instrumentation) -> Self {
        Self::Instrumentation(event)
    }
}
