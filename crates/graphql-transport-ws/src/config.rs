//! Client configuration.

use std::{fmt, future::Future, pin::Pin, sync::Arc};

use crate::{
    error::{ClientError, ClientResult},
    listeners::Listeners,
    protocol::JsonObject,
    reconnect::BackoffConfig,
    transport::Transport,
};

/// Error type returned by connection params providers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a connection params provider.
pub type ParamsResult = Result<Option<JsonObject>, BoxError>;

/// Future returned by an async connection params provider.
pub type ParamsFuture = Pin<Box<dyn Future<Output = ParamsResult> + Send>>;

/// Payload of the `connection_init` frame, computed once per connection attempt.
#[derive(Clone, Default)]
pub enum ConnectionParams {
    /// Send `connection_init` without a payload.
    #[default]
    None,
    /// Send the same payload on every attempt.
    Static(JsonObject),
    /// Compute the payload synchronously.
    Sync(Arc<dyn Fn() -> ParamsResult + Send + Sync>),
    /// Await the payload, e.g. to refresh a token.
    Async(Arc<dyn Fn() -> ParamsFuture + Send + Sync>),
}

impl ConnectionParams {
    /// Build from a synchronous provider.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> ParamsResult + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Build from an asynchronous provider.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ParamsResult> + Send + 'static,
    {
        Self::Async(Arc::new(move || Box::pin(f())))
    }

    /// Produce the payload for one attempt. Provider failures are fatal.
    pub(crate) async fn resolve(&self) -> ClientResult<Option<JsonObject>> {
        let result = match self {
            Self::None => return Ok(None),
            Self::Static(payload) => return Ok(Some(payload.clone())),
            Self::Sync(provider) => provider(),
            Self::Async(provider) => provider().await,
        };
        result.map_err(|e| ClientError::connection_params(e.to_string()))
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Static(payload) => f.debug_tuple("Static").field(payload).finish(),
            Self::Sync(_) => write!(f, "Sync(<fn>)"),
            Self::Async(_) => write!(f, "Async(<fn>)"),
        }
    }
}

impl From<JsonObject> for ConnectionParams {
    fn from(payload: JsonObject) -> Self {
        Self::Static(payload)
    }
}

/// Configuration for [`Client`](crate::Client).
#[derive(Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:4000/graphql`.
    pub url: String,
    /// Payload sent with `connection_init`.
    pub connection_params: ConnectionParams,
    /// Socket implementation. Defaults to the tungstenite transport.
    pub transport: Option<Arc<dyn Transport>>,
    /// Reconnect delay parameters.
    pub backoff: BackoffConfig,
    /// Lifecycle and error callbacks.
    pub listeners: Listeners,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("connection_params", &self.connection_params)
            .field("transport", &self.transport.is_some())
            .field("backoff", &self.backoff)
            .field("listeners", &self.listeners)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connection_params: ConnectionParams::None,
            transport: None,
            backoff: BackoffConfig::default(),
            listeners: Listeners::default(),
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the `connection_init` payload or provider.
    #[must_use]
    pub fn connection_params(mut self, params: impl Into<ConnectionParams>) -> Self {
        self.connection_params = params.into();
        self
    }

    /// Replace the socket implementation.
    #[must_use]
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Set the reconnect delay parameters.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the lifecycle callbacks.
    #[must_use]
    pub fn listeners(mut self, listeners: Listeners) -> Self {
        self.listeners = listeners;
        self
    }

    /// Set the callback invoked once when the client stops on a fatal error.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&ClientError) + Send + Sync + 'static) -> Self {
        self.listeners = self.listeners.on_error(f);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }
        if self.transport.is_none()
            && !self.url.starts_with("ws://")
            && !self.url.starts_with("wss://")
        {
            return Err("URL must start with ws:// or wss://".to_string());
        }
        self.backoff.validate()
    }
}
