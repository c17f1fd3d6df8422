//! Protocol loop: the connection lifecycle state machine.
//!
//! ```text
//! Idle ──subscribe──▶ Connecting ──opened──▶ AwaitingAck ──ack──▶ Active
//!                         ▲                       │                 │
//!                         └──── retry (backoff) ◀─┴──── closed ─────┘
//! ```
//!
//! The loop exclusively owns the [`PendingOperations`] set and replays it
//! after every acknowledged handshake, so operations survive reconnects.
//! Any fatal close code or protocol violation stops the loop for good.

use std::{convert::Infallible, fmt};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::ConnectionParams,
    error::{ClientError, ClientResult},
    message::{
        ClientMessage, Instrumentation, OperationEvent, RouterMessage, TransportCommand,
        TransportEvent,
    },
    pending::PendingOperations,
    protocol::{Frame, JsonObject},
    reconnect::{BackoffConfig, ExponentialBackoff},
    router::{self, Router, RouterReceiver},
    types::{CloseEvent, NORMAL_CLOSURE},
};

/// Sequence number of a socket attempt.
///
/// Commands are tagged with the epoch they were issued for so the transport
/// can discard the ones addressed to a socket that already closed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionEpoch(u64);

impl ConnectionEpoch {
    /// The epoch following this one.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Raw counter value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of one phase of a connection attempt.
enum Phase<T> {
    /// The phase completed and the attempt continues.
    Ready(T),
    /// The socket closed.
    Closed(CloseEvent),
    /// The client asked to disconnect.
    Disconnect,
}

enum Flow {
    Continue,
    Disconnect,
}

pub(crate) struct ProtocolLoop {
    router: Router,
    inbox: RouterReceiver,
    params: ConnectionParams,
    backoff: BackoffConfig,
    pending: PendingOperations,
    epoch: ConnectionEpoch,
}

impl ProtocolLoop {
    /// Create the loop. Its router listener is registered immediately.
    pub(crate) fn new(router: Router, params: ConnectionParams, backoff: BackoffConfig) -> Self {
        let inbox = router.subscribe(router::is_for_protocol);
        Self {
            router,
            inbox,
            params,
            backoff,
            pending: PendingOperations::new(),
            epoch: ConnectionEpoch::default(),
        }
    }

    /// Drive the connection until disconnect, cancellation or a fatal error.
    pub(crate) async fn run(mut self, cancel: CancellationToken) -> ClientResult<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Protocol loop cancelled");
                Ok(())
            }
            result = self.drive() => result,
        }
    }

    async fn drive(&mut self) -> ClientResult<()> {
        if !self.idle().await? {
            debug!("Disconnect requested before the first subscribe");
            return Ok(());
        }

        let mut backoff = ExponentialBackoff::new(self.backoff);
        loop {
            match self.attempt(&mut backoff).await? {
                Some(close) => self.retry(close, &mut backoff).await?,
                None => {
                    info!(epoch = %self.epoch, "Disconnected");
                    return Ok(());
                }
            }
        }
    }

    /// Wait for the first operation. Returns false on an early disconnect.
    async fn idle(&mut self) -> ClientResult<bool> {
        match self.next_message().await? {
            RouterMessage::Client(ClientMessage::Subscribe { id, payload }) => {
                self.pending.insert(id, payload)?;
                Ok(true)
            }
            RouterMessage::Client(ClientMessage::Disconnect) => Ok(false),
            RouterMessage::Client(ClientMessage::Unsubscribe { id }) => Err(ClientError::protocol(
                format!("First message must be a subscribe, got unsubscribe for {id}"),
            )),
            other => Err(ClientError::protocol(format!(
                "First message must be a subscribe, got {other:?}"
            ))),
        }
    }

    /// One socket lifetime. Returns the close event, or `None` on disconnect.
    async fn attempt(
        &mut self,
        backoff: &mut ExponentialBackoff,
    ) -> ClientResult<Option<CloseEvent>> {
        self.epoch = self.epoch.next();
        info!(epoch = %self.epoch, pending = self.pending.len(), "Connecting");
        self.router.publish(Instrumentation::Connecting);
        self.router.publish(TransportCommand::Open { epoch: self.epoch });

        match self.wait_open().await? {
            Phase::Ready(()) => {}
            Phase::Closed(close) => return Ok(Some(close)),
            Phase::Disconnect => return Ok(None),
        }

        let payload = self.params.resolve().await?;
        self.send(&Frame::ConnectionInit { payload })?;

        let ack = match self.wait_ack().await? {
            Phase::Ready(ack) => ack,
            Phase::Closed(close) => return Ok(Some(close)),
            Phase::Disconnect => return Ok(None),
        };

        info!(epoch = %self.epoch, pending = self.pending.len(), "Connection acknowledged");
        self.router.publish(Instrumentation::Connected(ack));
        *backoff = ExponentialBackoff::new(self.backoff);

        for (id, payload) in self.pending.iter() {
            self.send(&Frame::Subscribe {
                id: id.clone(),
                payload: payload.clone(),
            })?;
        }

        match self.active().await? {
            Phase::Ready(never) => match never {},
            Phase::Closed(close) => Ok(Some(close)),
            Phase::Disconnect => Ok(None),
        }
    }

    async fn wait_open(&mut self) -> ClientResult<Phase<()>> {
        loop {
            match self.next_message().await? {
                RouterMessage::Transport(TransportEvent::Opened) => return Ok(Phase::Ready(())),
                RouterMessage::Transport(TransportEvent::Closed(close)) => {
                    return Ok(Phase::Closed(close));
                }
                RouterMessage::Transport(TransportEvent::Error(error)) => {
                    warn!(epoch = %self.epoch, %error, "Socket error while connecting");
                }
                RouterMessage::Transport(TransportEvent::Message(_)) => {
                    return Err(ClientError::protocol(
                        "Received a message before the socket opened",
                    ));
                }
                RouterMessage::Client(msg) => {
                    if let Flow::Disconnect = self.handle_client(msg, false)? {
                        return Ok(Phase::Disconnect);
                    }
                }
                other => return Err(unexpected(&other)),
            }
        }
    }

    async fn wait_ack(&mut self) -> ClientResult<Phase<Option<JsonObject>>> {
        loop {
            match self.next_message().await? {
                RouterMessage::Transport(TransportEvent::Message(text)) => {
                    return match Frame::decode(&text)? {
                        Frame::ConnectionAck { payload } => Ok(Phase::Ready(payload)),
                        other => Err(ClientError::protocol(format!(
                            "Expected connection_ack, received {}",
                            other.kind()
                        ))),
                    };
                }
                RouterMessage::Transport(TransportEvent::Closed(close)) => {
                    return Ok(Phase::Closed(close));
                }
                RouterMessage::Transport(TransportEvent::Error(error)) => {
                    warn!(epoch = %self.epoch, %error, "Socket error during handshake");
                }
                RouterMessage::Transport(TransportEvent::Opened) => {
                    return Err(ClientError::protocol("Socket reported opened twice"));
                }
                RouterMessage::Client(msg) => {
                    if let Flow::Disconnect = self.handle_client(msg, false)? {
                        return Ok(Phase::Disconnect);
                    }
                }
                other => return Err(unexpected(&other)),
            }
        }
    }

    async fn active(&mut self) -> ClientResult<Phase<Infallible>> {
        loop {
            match self.next_message().await? {
                RouterMessage::Transport(TransportEvent::Message(text)) => {
                    self.handle_frame(Frame::decode(&text)?)?;
                }
                RouterMessage::Transport(TransportEvent::Closed(close)) => {
                    return Ok(Phase::Closed(close));
                }
                RouterMessage::Transport(TransportEvent::Error(error)) => {
                    warn!(epoch = %self.epoch, %error, "Socket error");
                }
                RouterMessage::Transport(TransportEvent::Opened) => {
                    return Err(ClientError::protocol("Socket reported opened twice"));
                }
                RouterMessage::Client(msg) => {
                    if let Flow::Disconnect = self.handle_client(msg, true)? {
                        return Ok(Phase::Disconnect);
                    }
                }
                other => return Err(unexpected(&other)),
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> ClientResult<()> {
        match frame {
            Frame::Next { id, payload } => {
                self.router.publish(OperationEvent::Next { id, payload });
            }
            Frame::Error { id, payload } => {
                self.pending.remove(&id);
                self.router.publish(OperationEvent::Error { id, errors: payload });
            }
            Frame::Complete { id } => {
                self.pending.remove(&id);
                self.router.publish(OperationEvent::Complete { id });
            }
            other => {
                return Err(ClientError::protocol(format!(
                    "Unexpected {} frame on an active connection",
                    other.kind()
                )));
            }
        }
        Ok(())
    }

    /// Apply a client request. Wire frames are only sent once `active`.
    fn handle_client(&mut self, msg: ClientMessage, active: bool) -> ClientResult<Flow> {
        match msg {
            ClientMessage::Subscribe { id, payload } => {
                self.pending.insert(id.clone(), payload.clone())?;
                if active {
                    self.send(&Frame::Subscribe { id, payload })?;
                }
            }
            ClientMessage::Unsubscribe { id } => {
                if self.pending.remove(&id).is_none() {
                    debug!(%id, "Unsubscribe for unknown operation ignored");
                } else if active {
                    self.send(&Frame::Complete { id })?;
                }
            }
            ClientMessage::Disconnect => {
                self.router.publish(TransportCommand::Close {
                    epoch: self.epoch,
                    code: NORMAL_CLOSURE,
                    reason: "Normal Closure".to_string(),
                });
                return Ok(Flow::Disconnect);
            }
        }
        Ok(Flow::Continue)
    }

    async fn retry(
        &mut self,
        close: CloseEvent,
        backoff: &mut ExponentialBackoff,
    ) -> ClientResult<()> {
        self.router.publish(Instrumentation::Disconnected(close.clone()));

        if close.is_fatal() {
            return Err(ClientError::fatal_close(close.code, close.reason));
        }

        let delay = backoff.next_delay();
        info!(
            epoch = %self.epoch,
            code = close.code,
            reason = %close.reason,
            attempt = backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "Connection closed, reconnecting"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    fn send(&self, frame: &Frame) -> ClientResult<()> {
        let text = frame.encode()?;
        debug!(epoch = %self.epoch, kind = frame.kind(), "Sending frame");
        self.router.publish(TransportCommand::Send {
            epoch: self.epoch,
            text,
        });
        Ok(())
    }

    async fn next_message(&mut self) -> ClientResult<RouterMessage> {
        self.inbox
            .recv()
            .await
            .ok_or_else(|| ClientError::internal("Router stopped"))
    }
}

fn unexpected(msg: &RouterMessage) -> ClientError {
    ClientError::internal(format!("Protocol loop received {msg:?}"))
}
