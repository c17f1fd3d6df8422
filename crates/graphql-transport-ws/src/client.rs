//! User-facing client API.
//!
//! The [`Client`] runs one logical connection shared by every operation. It
//! connects lazily on the first subscribe, reconnects with backoff and replays
//! active operations after each reconnect.

use std::sync::Arc;

use tokio::{runtime::Handle, sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    config::ClientConfig,
    connection::ProtocolLoop,
    error::{ClientError, ClientResult},
    listeners::{self, Listeners},
    message::ClientMessage,
    operation::{self, OperationStream, Sink, Subscription},
    protocol::{JsonObject, SubscribePayload},
    router::Router,
    transport::{Transport, TransportLoop},
    types::{CloseEvent, OperationId},
};

/// Client for the `graphql-transport-ws` protocol.
///
/// Cheap to clone; all clones share the connection. The connection is shut
/// down by [`dispose`](Self::dispose) or when the last clone is dropped.
///
/// # Example
///
/// ```rust,no_run
/// use graphql_transport_ws::{Client, ClientConfig, SubscribePayload};
/// use futures_util::StreamExt;
///
/// # async fn example() -> graphql_transport_ws::ClientResult<()> {
/// let client = Client::new(ClientConfig::new("ws://localhost:4000/graphql"))?;
///
/// let (_subscription, mut events) =
///     client.subscribe_stream(SubscribePayload::new("subscription { ticks }"))?;
/// while let Some(event) = events.next().await {
///     println!("{event:?}");
/// }
///
/// client.dispose().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    router: Router,
    cancel: CancellationToken,
    runtime: Handle,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Client {
    /// Create a client and start its background tasks.
    ///
    /// Must be called from within a Tokio runtime. No socket is opened until
    /// the first operation is subscribed.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        config.validate().map_err(ClientError::config)?;
        let runtime = Handle::try_current()
            .map_err(|_| ClientError::config("Client must be created inside a Tokio runtime"))?;

        let ClientConfig {
            url,
            connection_params,
            transport,
            backoff,
            listeners,
        } = config;
        let transport = match transport {
            Some(transport) => transport,
            None => default_transport()?,
        };

        let router = Router::new();
        let cancel = CancellationToken::new();
        let protocol_loop = ProtocolLoop::new(router.clone(), connection_params, backoff);
        let transport_loop = TransportLoop::new(router.clone(), transport, url.clone());
        listeners::spawn_forwarder(&router, listeners.clone());

        let supervisor = tokio::spawn(supervise(
            protocol_loop,
            transport_loop,
            cancel.clone(),
            listeners,
        ));

        info!(url = %url, "GraphQL WebSocket client created");

        Ok(Self {
            inner: Arc::new(ClientInner {
                router,
                cancel,
                runtime,
                supervisor: Mutex::new(Some(supervisor)),
            }),
        })
    }

    /// Run an operation, delivering its results to `sink`.
    ///
    /// The operation lives as long as the returned [`Subscription`]: dropping
    /// the handle unsubscribes, so a handle discarded right away means the
    /// operation may never reach the server. Keep it, or call
    /// [`Subscription::detach`] to run until the server completes it.
    pub fn subscribe<S: Sink>(
        &self,
        payload: SubscribePayload,
        sink: S,
    ) -> ClientResult<Subscription> {
        self.ensure_running()?;
        let _guard = self.inner.runtime.enter();
        Ok(operation::spawn_operation(
            &self.inner.router,
            OperationId::new(),
            payload,
            sink,
            self.inner.cancel.child_token(),
        ))
    }

    /// Run an operation and consume its results as a stream.
    ///
    /// As with [`subscribe`](Self::subscribe), dropping the returned
    /// [`Subscription`] unsubscribes. The stream then ends.
    pub fn subscribe_stream(
        &self,
        payload: SubscribePayload,
    ) -> ClientResult<(Subscription, OperationStream)> {
        self.ensure_running()?;
        let _guard = self.inner.runtime.enter();
        Ok(operation::spawn_stream_operation(
            &self.inner.router,
            OperationId::new(),
            payload,
            self.inner.cancel.child_token(),
        ))
    }

    /// Register a callback invoked before every connection attempt.
    pub fn on_connecting(&self, f: impl Fn() + Send + Sync + 'static) {
        self.add_listeners(Listeners::new().on_connecting(f));
    }

    /// Register a callback invoked with the ack payload after every handshake.
    pub fn on_connected(&self, f: impl Fn(Option<JsonObject>) + Send + Sync + 'static) {
        self.add_listeners(Listeners::new().on_connected(f));
    }

    /// Register a callback invoked whenever the socket closes.
    pub fn on_closed(&self, f: impl Fn(CloseEvent) + Send + Sync + 'static) {
        self.add_listeners(Listeners::new().on_closed(f));
    }

    /// Returns true once the client was disposed or stopped on a fatal error.
    pub fn is_disposed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Close the connection, cancel every operation and wait for shutdown.
    pub async fn dispose(&self) -> ClientResult<()> {
        self.inner.router.publish(ClientMessage::Disconnect);
        self.inner.cancel.cancel();

        let supervisor = self.inner.supervisor.lock().await.take();
        if let Some(handle) = supervisor {
            handle
                .await
                .map_err(|e| ClientError::internal(format!("Supervisor task failed: {e}")))?;
            info!("GraphQL WebSocket client disposed");
        }
        Ok(())
    }

    fn ensure_running(&self) -> ClientResult<()> {
        if self.is_disposed() {
            return Err(ClientError::Disposed);
        }
        Ok(())
    }

    fn add_listeners(&self, listeners: Listeners) {
        let _guard = self.inner.runtime.enter();
        listeners::spawn_forwarder(&self.inner.router, listeners);
    }
}

#[cfg(feature = "tungstenite")]
fn default_transport() -> ClientResult<Arc<dyn Transport>> {
    Ok(Arc::new(crate::websocket::TungsteniteTransport::new()))
}

#[cfg(not(feature = "tungstenite"))]
fn default_transport() -> ClientResult<Arc<dyn Transport>> {
    Err(ClientError::config(
        "No transport configured and the `tungstenite` feature is disabled",
    ))
}

/// Run both loops until either stops, then stop the other.
async fn supervise(
    protocol_loop: ProtocolLoop,
    transport_loop: TransportLoop,
    cancel: CancellationToken,
    listeners: Listeners,
) {
    let protocol = async {
        let result = protocol_loop.run(cancel.clone()).await;
        cancel.cancel();
        result
    };
    let transport = async {
        let result = transport_loop.run(cancel.clone()).await;
        cancel.cancel();
        result
    };

    let (protocol, transport) = tokio::join!(protocol, transport);
    match protocol.and(transport) {
        Ok(()) => info!("GraphQL WebSocket client stopped"),
        Err(e) => {
            error!(error = %e, "GraphQL WebSocket client stopped on fatal error");
            listeners.notify_error(&e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        protocol::GraphQLError,
        transport::{EventSender, Socket},
    };

    struct NullSink;

    impl Sink for NullSink {
        fn next(&mut self, _payload: JsonObject) {}
        fn error(&mut self, _errors: Vec<GraphQLError>) {}
        fn complete(&mut self) {}
    }

    struct SilentTransport;

    struct SilentSocket;

    impl Transport for SilentTransport {
        fn open(&self, _url: &str, _protocol: &str, _events: EventSender) -> Box<dyn Socket> {
            Box::new(SilentSocket)
        }
    }

    #[async_trait::async_trait]
    impl Socket for SilentSocket {
        async fn send(&mut self, _text: String) -> ClientResult<()> {
            Ok(())
        }

        async fn close(&mut self, _code: u16, _reason: String) -> ClientResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_new_requires_runtime() {
        let err = Client::new(ClientConfig::new("ws://localhost:4000/graphql")).unwrap_err();
        assert!(matches!(err, ClientError::Config { .. }));
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let err = Client::new(ClientConfig::new("")).unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: URL cannot be empty");
    }

    #[tokio::test]
    async fn test_subscribe_after_dispose_fails() {
        let client =
            Client::new(ClientConfig::new("ws://localhost:4000/graphql").transport(SilentTransport))
                .unwrap();
        assert!(!client.is_disposed());

        client.dispose().await.unwrap();
        assert!(client.is_disposed());
        assert!(matches!(
            client.subscribe(SubscribePayload::new("{ a }"), NullSink),
            Err(ClientError::Disposed)
        ));
        assert!(matches!(
            client.subscribe_stream(SubscribePayload::new("{ a }")),
            Err(ClientError::Disposed)
        ));

        // Second dispose is a no-op.
        client.dispose().await.unwrap();
    }
}
