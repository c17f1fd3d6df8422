//! Per-operation tasks delivering results to the caller.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures_util::Stream;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    message::{ClientMessage, OperationEvent, RouterMessage},
    protocol::{GraphQLError, JsonObject, SubscribePayload},
    router::{self, Router, RouterReceiver},
    types::OperationId,
};

/// Receives the results of one operation.
///
/// After `error` or `complete` no further call is made.
pub trait Sink: Send + 'static {
    /// A result arrived.
    fn next(&mut self, payload: JsonObject);

    /// The operation failed.
    fn error(&mut self, errors: Vec<GraphQLError>);

    /// The server finished the operation.
    fn complete(&mut self);
}

/// Spawn the task for one operation.
///
/// The listener is registered and the subscribe published before returning,
/// so no result can be missed.
pub(crate) fn spawn_operation<S: Sink>(
    router: &Router,
    id: OperationId,
    payload: SubscribePayload,
    sink: S,
    cancel: CancellationToken,
) -> Subscription {
    let results = router.subscribe(router::is_for_operation(id.clone()));
    router.publish(ClientMessage::Subscribe {
        id: id.clone(),
        payload,
    });

    let handle = tokio::spawn(run_operation(
        router.clone(),
        id.clone(),
        results,
        sink,
        cancel.clone(),
    ));

    Subscription {
        id,
        cancel,
        handle,
        detached: false,
    }
}

async fn run_operation<S: Sink>(
    router: Router,
    id: OperationId,
    mut results: RouterReceiver,
    mut sink: S,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%id, "Operation cancelled");
                router.publish(ClientMessage::Unsubscribe { id });
                return;
            }
            msg = results.recv() => msg,
        };

        match msg {
            Some(RouterMessage::Operation(OperationEvent::Next { payload, .. })) => {
                sink.next(payload);
            }
            Some(RouterMessage::Operation(OperationEvent::Error { errors, .. })) => {
                debug!(%id, errors = errors.len(), "Operation failed");
                sink.error(errors);
                return;
            }
            Some(RouterMessage::Operation(OperationEvent::Complete { .. })) => {
                debug!(%id, "Operation completed");
                sink.complete();
                return;
            }
            Some(other) => warn!(%id, ?other, "Unexpected message for operation"),
            None => return,
        }
    }
}

/// Handle to a running operation.
///
/// Dropping the handle unsubscribes. Use [`detach`](Self::detach) to let the
/// operation run until the server completes it.
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes the operation"]
pub struct Subscription {
    id: OperationId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    detached: bool,
}

impl Subscription {
    /// Id of the operation.
    pub fn id(&self) -> &OperationId {
        &self.id
    }

    /// Stop the operation. Calling it more than once has no further effect.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    /// Returns true once the sink got its terminal call or the operation was cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the operation to finish.
    pub async fn finished(mut self) {
        if let Err(e) = (&mut self.handle).await {
            warn!(id = %self.id, error = %e, "Operation task failed");
        }
    }

    /// Keep the operation running after the handle is dropped.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.detached {
            self.cancel.cancel();
        }
    }
}

/// [`Sink`] feeding an [`OperationStream`].
struct ChannelSink {
    id: OperationId,
    tx: mpsc::UnboundedSender<OperationEvent>,
}

impl Sink for ChannelSink {
    fn next(&mut self, payload: JsonObject) {
        let _ = self.tx.send(OperationEvent::Next {
            id: self.id.clone(),
            payload,
        });
    }

    fn error(&mut self, errors: Vec<GraphQLError>) {
        let _ = self.tx.send(OperationEvent::Error {
            id: self.id.clone(),
            errors,
        });
    }

    fn complete(&mut self) {
        let _ = self.tx.send(OperationEvent::Complete {
            id: self.id.clone(),
        });
    }
}

/// Stream of results for one operation.
///
/// Ends after `Error` or `Complete`, or when the operation is unsubscribed.
#[derive(Debug)]
pub struct OperationStream {
    rx: mpsc::UnboundedReceiver<OperationEvent>,
}

impl Stream for OperationStream {
    type Item = OperationEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

pub(crate) fn spawn_stream_operation(
    router: &Router,
    id: OperationId,
    payload: SubscribePayload,
    cancel: CancellationToken,
) -> (Subscription, OperationStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = ChannelSink { id: id.clone(), tx };
    let subscription = spawn_operation(router, id, payload, sink, cancel);
    (subscription, OperationStream { rx })
}
