//! Ordered fan-out of [`RouterMessage`]s to filtered subscribers.
//!
//! A single background task owns the subscriber list. Registrations and
//! publishes travel over the same channel, so a subscriber registered before
//! a publish call always observes that message, and every subscriber sees
//! messages in publish order.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{
    message::{ClientMessage, RouterMessage, TransportEvent},
    types::OperationId,
};

type Filter = Box<dyn Fn(&RouterMessage) -> bool + Send>;

struct Subscriber {
    filter: Filter,
    tx: mpsc::UnboundedSender<RouterMessage>,
}

enum RouterCommand {
    Register(Subscriber),
    Publish(RouterMessage),
}

/// Cheaply cloneable handle to the router task.
#[derive(Clone, Debug)]
pub struct Router {
    tx: mpsc::UnboundedSender<RouterCommand>,
}

impl Router {
    /// Spawn the router task on the current Tokio runtime.
    ///
    /// The task stops once every handle is dropped, which ends all receivers.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(router_task(rx));
        Self { tx }
    }

    /// Enqueue a message for delivery. Never blocks.
    pub fn publish(&self, msg: impl Into<RouterMessage>) {
        if self.tx.send(RouterCommand::Publish(msg.into())).is_err() {
            debug!("router task stopped, message dropped");
        }
    }

    /// Register a listener receiving every later message matching `filter`.
    pub fn subscribe<F>(&self, filter: F) -> RouterReceiver
    where
        F: Fn(&RouterMessage) -> bool + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = Subscriber {
            filter: Box::new(filter),
            tx,
        };
        // On failure the sender is dropped with the command and the receiver
        // reports end of stream.
        let _ = self.tx.send(RouterCommand::Register(subscriber));
        RouterReceiver { rx }
    }
}

impl Default for Router {
    /// Same as [`Router::new`]; must be called inside a Tokio runtime.
    fn default() -> Self {
        Self::new()
    }
}

async fn router_task(mut rx: mpsc::UnboundedReceiver<RouterCommand>) {
    let mut subscribers: Vec<Subscriber> = Vec::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RouterCommand::Register(subscriber) => subscribers.push(subscriber),
            RouterCommand::Publish(msg) => {
                trace!(?msg, "routing message");
                subscribers.retain(|subscriber| {
                    if subscriber.tx.is_closed() {
                        return false;
                    }
                    if (subscriber.filter)(&msg) {
                        return subscriber.tx.send(msg.clone()).is_ok();
                    }
                    true
                });
            }
        }
    }

    debug!("router task stopped");
}

/// Receiving end of a router subscription. Dropping it releases the listener.
#[derive(Debug)]
pub struct RouterReceiver {
    rx: mpsc::UnboundedReceiver<RouterMessage>,
}

impl RouterReceiver {
    /// Wait for the next matching message. `None` once the router has stopped.
    pub async fn recv(&mut self) -> Option<RouterMessage> {
        self.rx.recv().await
    }

    /// Take a message if one is already buffered.
    pub fn try_recv(&mut self) -> Option<RouterMessage> {
        self.rx.try_recv().ok()
    }
}

impl Stream for RouterReceiver {
    type Item = RouterMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Messages consumed by the protocol loop.
pub fn is_for_protocol(msg: &RouterMessage) -> bool {
    matches!(
        msg,
        RouterMessage::Transport(_)
            | RouterMessage::Client(
                ClientMessage::Subscribe { .. }
                    | ClientMessage::Unsubscribe { .. }
                    | ClientMessage::Disconnect
            )
    )
}

/// Messages consumed by the transport loop, including its own close notification.
pub fn is_for_transport(msg: &RouterMessage) -> bool {
    matches!(
        msg,
        RouterMessage::Command(_) | RouterMessage::Transport(TransportEvent::Closed(_))
    )
}

/// Results addressed to a single operation.
pub fn is_for_operation(id: OperationId) -> impl Fn(&RouterMessage) -> bool + Send + 'static {
    move |msg| matches!(msg, RouterMessage::Operation(event) if *event.id() == id)
}

/// Connection lifecycle notifications.
pub fn is_instrumentation(msg: &RouterMessage) -> bool {
    matches!(msg, RouterMessage::Instrumentation(_))
}
