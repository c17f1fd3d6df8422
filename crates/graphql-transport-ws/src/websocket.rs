//! Default [`Transport`] built on `tokio-tungstenite`.
//!
//! Each socket is driven by its own IO task. The [`Socket`] handle only
//! queues commands for that task, so `open` returns immediately and the
//! connection result arrives as an event.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{HeaderValue, header::SEC_WEBSOCKET_PROTOCOL},
        protocol::{CloseFrame, Message, frame::coding::CloseCode},
    },
};
use tracing::{debug, warn};

use crate::{
    error::{ClientError, ClientResult},
    message::TransportEvent,
    transport::{EventSender, Socket, Transport},
    types::{CloseEvent, NO_STATUS_RECEIVED, NORMAL_CLOSURE},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens plain `ws://` sockets with `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    /// Create the transport. Sockets are opened lazily by the client.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for TungsteniteTransport {
    fn open(&self, url: &str, protocol: &str, events: EventSender) -> Box<dyn Socket> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(socket_task(
            url.to_string(),
            protocol.to_string(),
            events,
            cmd_rx,
        ));
        Box::new(TungsteniteSocket { cmd_tx })
    }
}

enum SocketCommand {
    Send(String),
    Close { code: u16, reason: String },
}

struct TungsteniteSocket {
    cmd_tx: mpsc::UnboundedSender<SocketCommand>,
}

#[async_trait]
impl Socket for TungsteniteSocket {
    async fn send(&mut self, text: String) -> ClientResult<()> {
        self.cmd_tx
            .send(SocketCommand::Send(text))
            .map_err(|_| ClientError::websocket("Socket task has stopped"))
    }

    async fn close(&mut self, code: u16, reason: String) -> ClientResult<()> {
        self.cmd_tx
            .send(SocketCommand::Close { code, reason })
            .map_err(|_| ClientError::websocket("Socket task has stopped"))
    }
}

async fn connect(url: &str, protocol: &str) -> ClientResult<WsStream> {
    let mut request = url.into_client_request()?;
    let protocol = HeaderValue::from_str(protocol)
        .map_err(|e| ClientError::websocket(format!("Invalid sub-protocol header: {e}")))?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, protocol);

    let (ws, _response) = connect_async(request).await?;
    Ok(ws)
}

async fn socket_task(
    url: String,
    protocol: String,
    events: EventSender,
    mut cmd_rx: mpsc::UnboundedReceiver<SocketCommand>,
) {
    let connecting = connect(&url, &protocol);
    tokio::pin!(connecting);

    let ws = loop {
        tokio::select! {
            result = &mut connecting => match result {
                Ok(ws) => break ws,
                Err(e) => {
                    warn!(url = %url, error = %e, "WebSocket connect failed");
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    let close = CloseEvent::abnormal(e.to_string());
                    let _ = events.send(TransportEvent::Closed(close));
                    return;
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(SocketCommand::Send(_)) => {
                    debug!("Dropping frame queued before the socket opened");
                }
                Some(SocketCommand::Close { code, reason }) => {
                    let _ = events.send(TransportEvent::Closed(CloseEvent::new(code, reason)));
                    return;
                }
                None => return,
            },
        }
    };

    debug!(url = %url, "WebSocket connected");
    let _ = events.send(TransportEvent::Opened);
    let close = io_loop(ws, &events, &mut cmd_rx).await;
    debug!(url = %url, %close, "WebSocket closed");
    let _ = events.send(TransportEvent::Closed(close));
}

async fn io_loop(
    ws: WsStream,
    events: &EventSender,
    cmd_rx: &mut mpsc::UnboundedReceiver<SocketCommand>,
) -> CloseEvent {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(SocketCommand::Send(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        return CloseEvent::abnormal(e.to_string());
                    }
                }
                Some(SocketCommand::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        debug!(error = %e, "Close frame not delivered");
                    }
                    return CloseEvent::new(code, reason);
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    return CloseEvent::new(NORMAL_CLOSURE, "socket released");
                }
            },

            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(text.to_string()));
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => {
                        let _ = events.send(TransportEvent::Message(text));
                    }
                    Err(_) => warn!(len = data.len(), "Dropping non UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(f) => CloseEvent::new(u16::from(f.code), f.reason.to_string()),
                        None => CloseEvent::new(NO_STATUS_RECEIVED, ""),
                    };
                }
                // Ping/pong are answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    return CloseEvent::abnormal(e.to_string());
                }
                None => return CloseEvent::abnormal("WebSocket stream ended"),
            },
        }
    }
}
