//! # graphql-transport-ws
//!
//! Reconnecting client for the `graphql-transport-ws` WebSocket protocol.
//!
//! Many concurrent queries and subscriptions share one logical connection.
//! Results are multiplexed by operation id, and transport failures are
//! recovered transparently without losing registered operations.
//!
//! ## Features
//!
//! - **Lazy connection**: the socket opens on the first subscribe
//! - **Reconnect with replay**: exponential backoff with jitter, active
//!   operations are re-subscribed after every acknowledged handshake
//! - **Fatal close codes**: protocol violations (`4400`, `4401`, `4409`, ...)
//!   stop the client instead of retrying forever
//! - **Pluggable socket**: implement [`Transport`] or use the default
//!   `tokio-tungstenite` socket (feature `tungstenite`)
//! - **Callbacks or streams**: deliver results to a [`Sink`] or consume an
//!   [`OperationStream`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use graphql_transport_ws::{Client, ClientConfig, OperationEvent, SubscribePayload};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("ws://localhost:4000/graphql")
//!         .on_error(|e| eprintln!("client stopped: {e}"));
//!     let client = Client::new(config)?;
//!
//!     let (_subscription, mut events) =
//!         client.subscribe_stream(SubscribePayload::new("subscription { greetings }"))?;
//!     while let Some(event) = events.next().await {
//!         if let OperationEvent::Next { payload, .. } = event {
//!             println!("{payload:?}");
//!         }
//!     }
//!
//!     client.dispose().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod listeners;
pub mod message;
pub mod operation;
pub mod pending;
pub mod protocol;
pub mod reconnect;
pub mod router;
pub mod transport;
pub mod types;

#[cfg(feature = "tungstenite")]
pub mod websocket;

// Re-export commonly used types
pub use client::Client;
pub use config::{BoxError, ClientConfig, ConnectionParams, ParamsFuture, ParamsResult};
pub use connection::ConnectionEpoch;
pub use error::{ClientError, ClientResult};
pub use listeners::Listeners;
pub use message::{OperationEvent, TransportEvent};
pub use operation::{OperationStream, Sink, Subscription};
pub use protocol::{
    Frame, GRAPHQL_TRANSPORT_WS_PROTOCOL, GraphQLError, JsonObject, SubscribePayload,
};
pub use reconnect::{BackoffConfig, ExponentialBackoff};
pub use transport::{EventSender, Socket, Transport};
pub use types::{CloseEvent, FATAL_CLOSE_CODES, OperationId};
#[cfg(feature = "tungstenite")]
pub use websocket::TungsteniteTransport;
