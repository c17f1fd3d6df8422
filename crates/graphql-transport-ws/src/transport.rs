//! Socket abstraction and the loop that owns one socket at a time.
//!
//! The loop turns [`TransportCommand`]s from the router into socket calls and
//! socket events into [`TransportEvent`]s on the router. Each attempt runs
//! `WaitOpen -> Open -> Closed` and the loop repeats for the client lifetime.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    connection::ConnectionEpoch,
    error::{ClientError, ClientResult},
    message::{RouterMessage, TransportCommand, TransportEvent},
    protocol::GRAPHQL_TRANSPORT_WS_PROTOCOL,
    router::{self, Router, RouterReceiver},
    types::{CloseEvent, NORMAL_CLOSURE},
};

/// Channel a socket reports its lifecycle events on.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Factory for duplex text sockets.
pub trait Transport: Send + Sync + 'static {
    /// Start opening a socket to `url` negotiating `protocol`.
    ///
    /// Must return without waiting for the connection. The socket reports
    /// `Opened`, `Message`, `Error` and exactly one `Closed` on `events`;
    /// a failed connect is reported as `Error` followed by `Closed`.
    fn open(&self, url: &str, protocol: &str, events: EventSender) -> Box<dyn Socket>;
}

/// An open (or opening) socket.
#[async_trait]
pub trait Socket: Send {
    /// Write a text frame.
    async fn send(&mut self, text: String) -> ClientResult<()>;

    /// Close the socket with a code and reason.
    async fn close(&mut self, code: u16, reason: String) -> ClientResult<()>;
}

/// How an attempt ended.
enum AttemptEnd {
    Closed,
    Cancelled,
}

pub(crate) struct TransportLoop {
    router: Router,
    transport: Arc<dyn Transport>,
    url: String,
    commands: RouterReceiver,
    last_ended: ConnectionEpoch,
}

impl TransportLoop {
    /// Create the loop. Its router listener is registered immediately.
    pub(crate) fn new(router: Router, transport: Arc<dyn Transport>, url: String) -> Self {
        let commands = router.subscribe(router::is_for_transport);
        Self {
            router,
            transport,
            url,
            commands,
            last_ended: ConnectionEpoch::default(),
        }
    }

    pub(crate) async fn run(mut self, cancel: CancellationToken) -> ClientResult<()> {
        loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                msg = self.commands.recv() => msg,
            };
            let Some(msg) = msg else {
                return Ok(());
            };

            let epoch = match msg {
                RouterMessage::Command(TransportCommand::Open { epoch })
                    if epoch > self.last_ended =>
                {
                    epoch
                }
                RouterMessage::Command(cmd) if cmd.epoch() <= self.last_ended => {
                    debug!(epoch = %cmd.epoch(), ?cmd, "Discarding command for ended connection");
                    continue;
                }
                RouterMessage::Command(cmd) => {
                    return Err(ClientError::protocol(format!(
                        "Received {cmd:?} before open"
                    )));
                }
                // Our own close notification from the attempt that just ended.
                RouterMessage::Transport(_) => continue,
                other => {
                    return Err(ClientError::internal(format!(
                        "Transport loop received {other:?}"
                    )));
                }
            };

            let end = self.run_attempt(epoch, &cancel).await?;
            self.last_ended = epoch;
            if let AttemptEnd::Cancelled = end {
                return Ok(());
            }
        }
    }

    async fn run_attempt(
        &mut self,
        epoch: ConnectionEpoch,
        cancel: &CancellationToken,
    ) -> ClientResult<AttemptEnd> {
        info!(url = %self.url, %epoch, "Opening socket");
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut socket = self
            .transport
            .open(&self.url, GRAPHQL_TRANSPORT_WS_PROTOCOL, events_tx);

        let mut events_open = true;
        let mut closed = false;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    if !closed {
                        debug!(%epoch, "Closing socket on shutdown");
                        if let Err(e) = socket
                            .close(NORMAL_CLOSURE, "Normal Closure".to_string())
                            .await
                        {
                            warn!(error = %e, "Failed to close socket on shutdown");
                        }
                    }
                    return Ok(AttemptEnd::Cancelled);
                }

                event = events_rx.recv(), if events_open => match event {
                    Some(_) if closed => {}
                    Some(event) => {
                        closed = matches!(event, TransportEvent::Closed(_));
                        self.router.publish(event);
                    }
                    None => {
                        events_open = false;
                        if !closed {
                            closed = true;
                            warn!(%epoch, "Socket went away without a close event");
                            self.router.publish(TransportEvent::Closed(CloseEvent::abnormal(
                                "socket event channel ended",
                            )));
                        }
                    }
                },

                msg = self.commands.recv() => {
                    let Some(msg) = msg else {
                        return Ok(AttemptEnd::Cancelled);
                    };
                    match msg {
                        RouterMessage::Command(TransportCommand::Send {
                            epoch: target,
                            text,
                        }) if target == epoch => {
                            if let Err(e) = socket.send(text).await {
                                warn!(%epoch, error = %e, "Failed to send frame");
                            }
                        }
                        RouterMessage::Command(TransportCommand::Close {
                            epoch: target,
                            code,
                            reason,
                        }) if target == epoch => {
                            debug!(%epoch, code, %reason, "Closing socket");
                            if let Err(e) = socket.close(code, reason).await {
                                warn!(%epoch, error = %e, "Failed to close socket");
                            }
                            return Ok(AttemptEnd::Closed);
                        }
                        RouterMessage::Command(cmd) if cmd.epoch() < epoch => {
                            debug!(
                                epoch = %cmd.epoch(),
                                ?cmd,
                                "Discarding command for ended connection"
                            );
                        }
                        RouterMessage::Command(cmd) => {
                            return Err(ClientError::protocol(format!(
                                "Received {cmd:?} while connection {epoch} is open"
                            )));
                        }
                        RouterMessage::Transport(TransportEvent::Closed(close)) => {
                            debug!(%epoch, %close, "Socket closed");
                            return Ok(AttemptEnd::Closed);
                        }
                        other => {
                            return Err(ClientError::internal(format!(
                                "Transport loop received {other:?}"
                            )));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Mutex,
        time::Duration,
    };

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Open(String, String),
        Send(String),
        Close(u16, String),
    }

    #[derive(Default)]
    struct RecordingTransport {
        calls: Arc<Mutex<Vec<Call>>>,
        sockets: Mutex<Vec<EventSender>>,
    }

    impl RecordingTransport {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn events(&self, n: usize) -> EventSender {
            self.sockets.lock().unwrap()[n].clone()
        }
    }

    impl Transport for RecordingTransport {
        fn open(&self, url: &str, protocol: &str, events: EventSender) -> Box<dyn Socket> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Open(url.to_string(), protocol.to_string()));
            self.sockets.lock().unwrap().push(events);
            Box::new(RecordingSocket {
                calls: self.calls.clone(),
            })
        }
    }

    struct RecordingSocket {
        calls: Arc<Mutex<Vec<Call>>>,
    }

    #[async_trait]
    impl Socket for RecordingSocket {
        async fn send(&mut self, text: String) -> ClientResult<()> {
            self.calls.lock().unwrap().push(Call::Send(text));
            Ok(())
        }

        async fn close(&mut self, code: u16, reason: String) -> ClientResult<()> {
            self.calls.lock().unwrap().push(Call::Close(code, reason));
            Ok(())
        }
    }

    struct Harness {
        router: Router,
        transport: Arc<RecordingTransport>,
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<ClientResult<()>>,
        protocol: RouterReceiver,
    }

    fn start() -> Harness {
        let router = Router::new();
        let transport = Arc::new(RecordingTransport::default());
        let protocol = router.subscribe(router::is_for_protocol);
        let cancel = CancellationToken::new();
        let transport_loop =
            TransportLoop::new(router.clone(), transport.clone(), "ws://test".to_string());
        let handle = tokio::spawn(transport_loop.run(cancel.clone()));
        Harness {
            router,
            transport,
            cancel,
            handle,
            protocol,
        }
    }

    fn epoch(n: u64) -> ConnectionEpoch {
        (0..n).fold(ConnectionEpoch::default(), |e, _| e.next())
    }

    async fn next_event(rx: &mut RouterReceiver) -> RouterMessage {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_open_forward_and_send() {
        let mut h = start();
        h.router.publish(TransportCommand::Open { epoch: epoch(1) });
        settle().await;

        let events = h.transport.events(0);
        events.send(TransportEvent::Opened).unwrap();
        events
            .send(TransportEvent::Message("hello".to_string()))
            .unwrap();

        assert_eq!(next_event(&mut h.protocol).await, TransportEvent::Opened.into());
        assert_eq!(
            next_event(&mut h.protocol).await,
            TransportEvent::Message("hello".to_string()).into()
        );

        h.router.publish(TransportCommand::Send {
            epoch: epoch(1),
            text: "frame".to_string(),
        });
        settle().await;

        assert_eq!(
            h.transport.calls(),
            vec![
                Call::Open("ws://test".to_string(), "graphql-transport-ws".to_string()),
                Call::Send("frame".to_string()),
            ]
        );

        h.cancel.cancel();
        h.handle.await.unwrap().unwrap();
        assert_eq!(
            h.transport.calls().last(),
            Some(&Call::Close(1000, "Normal Closure".to_string()))
        );
    }

    #[tokio::test]
    async fn test_send_before_open_is_fatal() {
        let h = start();
        h.router.publish(TransportCommand::Send {
            epoch: epoch(1),
            text: "early".to_string(),
        });

        let result = tokio::time::timeout(Duration::from_secs(1), h.handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ClientError::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_stale_commands_after_close_are_discarded() {
        let mut h = start();
        h.router.publish(TransportCommand::Open { epoch: epoch(1) });
        settle().await;

        h.transport
            .events(0)
            .send(TransportEvent::Closed(CloseEvent::new(4500, "oops")))
            .unwrap();
        assert_eq!(
            next_event(&mut h.protocol).await,
            TransportEvent::Closed(CloseEvent::new(4500, "oops")).into()
        );

        h.router.publish(TransportCommand::Send {
            epoch: epoch(1),
            text: "late".to_string(),
        });
        h.router.publish(TransportCommand::Open { epoch: epoch(2) });
        settle().await;

        assert!(!h.handle.is_finished());
        let calls = h.transport.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[1], Call::Open(..)));
        assert!(!calls.contains(&Call::Send("late".to_string())));

        h.cancel.cancel();
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dropped_event_channel_synthesizes_abnormal_close() {
        let mut h = start();
        h.router.publish(TransportCommand::Open { epoch: epoch(1) });
        settle().await;

        // Drop the only remaining sender.
        h.transport.sockets.lock().unwrap().clear();

        assert_eq!(
            next_event(&mut h.protocol).await,
            TransportEvent::Closed(CloseEvent::abnormal("socket event channel ended")).into()
        );

        h.cancel.cancel();
        h.handle.await.unwrap().unwrap();
        // Already closed, so shutdown does not close again.
        assert!(
            !h.transport
                .calls()
                .iter()
                .any(|call| matches!(call, Call::Close(..)))
        );
    }

    #[tokio::test]
    async fn test_close_command_ends_attempt() {
        let h = start();
        h.router.publish(TransportCommand::Open { epoch: epoch(1) });
        h.router.publish(TransportCommand::Close {
            epoch: epoch(1),
            code: 1000,
            reason: "Normal Closure".to_string(),
        });
        h.router.publish(TransportCommand::Open { epoch: epoch(2) });
        settle().await;

        let calls = h.transport.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1], Call::Close(1000, "Normal Closure".to_string()));
        assert!(matches!(calls[2], Call::Open(..)));

        h.cancel.cancel();
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_open_while_open_is_fatal() {
        let h = start();
        h.router.publish(TransportCommand::Open { epoch: epoch(1) });
        h.router.publish(TransportCommand::Open { epoch: epoch(2) });

        let result = tokio::time::timeout(Duration::from_secs(1), h.handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ClientError::Protocol { .. })));
    }
}
