//! Connection lifecycle callbacks.
//!
//! All callbacks are optional:
//!
//! - [`on_connecting`](Listeners::on_connecting): a socket is about to be requested
//! - [`on_connected`](Listeners::on_connected): the server acknowledged the handshake
//! - [`on_closed`](Listeners::on_closed): the socket closed, with its close event
//! - [`on_error`](Listeners::on_error): the client stopped on a fatal error
//!
//! # Example
//!
//! ```rust
//! use graphql_transport_ws::Listeners;
//!
//! let listeners = Listeners::new()
//!     .on_connected(|ack| println!("connected, ack payload: {ack:?}"))
//!     .on_closed(|event| println!("closed with {event}"));
//! ```

use std::{fmt, sync::Arc};

use tokio::task::JoinHandle;

use crate::{
    error::ClientError,
    message::{Instrumentation, RouterMessage},
    protocol::JsonObject,
    router::{self, Router},
    types::CloseEvent,
};

/// Type alias for the on_connecting callback.
pub type OnConnectingCallback = Arc<dyn Fn() + Send + Sync>;

/// Type alias for the on_connected callback.
pub type OnConnectedCallback = Arc<dyn Fn(Option<JsonObject>) + Send + Sync>;

/// Type alias for the on_closed callback.
pub type OnClosedCallback = Arc<dyn Fn(CloseEvent) + Send + Sync>;

/// Type alias for the on_error callback.
pub type OnErrorCallback = Arc<dyn Fn(&ClientError) + Send + Sync>;

/// Lifecycle callbacks registered at construction.
#[derive(Clone, Default)]
pub struct Listeners {
    pub(crate) on_connecting: Option<OnConnectingCallback>,
    pub(crate) on_connected: Option<OnConnectedCallback>,
    pub(crate) on_closed: Option<OnClosedCallback>,
    pub(crate) on_error: Option<OnErrorCallback>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("on_connecting", &self.on_connecting.is_some())
            .field("on_connected", &self.on_connected.is_some())
            .field("on_closed", &self.on_closed.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl Listeners {
    /// Create an empty set of listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called before every connection attempt.
    #[must_use]
    pub fn on_connecting(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connecting = Some(Arc::new(f));
        self
    }

    /// Called with the `connection_ack` payload after every successful handshake.
    #[must_use]
    pub fn on_connected(mut self, f: impl Fn(Option<JsonObject>) + Send + Sync + 'static) -> Self {
        self.on_connected = Some(Arc::new(f));
        self
    }

    /// Called whenever the socket closes, fatal or not.
    #[must_use]
    pub fn on_closed(mut self, f: impl Fn(CloseEvent) + Send + Sync + 'static) -> Self {
        self.on_closed = Some(Arc::new(f));
        self
    }

    /// Called once if the client stops on a fatal error.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&ClientError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    fn has_lifecycle(&self) -> bool {
        self.on_connecting.is_some() || self.on_connected.is_some() || self.on_closed.is_some()
    }

    pub(crate) fn dispatch(&self, event: Instrumentation) {
        match event {
            Instrumentation::Connecting => {
                if let Some(f) = &self.on_connecting {
                    f();
                }
            }
            Instrumentation::Connected(payload) => {
                if let Some(f) = &self.on_connected {
                    f(payload);
                }
            }
            Instrumentation::Disconnected(close) => {
                if let Some(f) = &self.on_closed {
                    f(close);
                }
            }
        }
    }

    pub(crate) fn notify_error(&self, error: &ClientError) {
        if let Some(f) = &self.on_error {
            f(error);
        }
    }
}

/// Forward instrumentation events from the router to `listeners`.
///
/// The task lives as long as the router. Returns `None` when no lifecycle
/// callback is set.
pub(crate) fn spawn_forwarder(router: &Router, listeners: Listeners) -> Option<JoinHandle<()>> {
    if !listeners.has_lifecycle() {
        return None;
    }
    let mut events = router.subscribe(router::is_instrumentation);

    Some(tokio::spawn(async move {
        while let Some(msg) = events.recv().await {
            if let RouterMessage::Instrumentation(event) = msg {
                listeners.dispatch(event);
            }
        }
    }))
}
