//! Scripted in-memory transport for driving the client from tests.

#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use graphql_transport_ws::{
    BackoffConfig, ClientResult, CloseEvent, EventSender, GraphQLError, JsonObject, Sink, Socket,
    Transport, TransportEvent,
};
use serde_json::{Value, json};
use tokio::{sync::mpsc, time::timeout};

pub const WAIT: Duration = Duration::from_secs(2);

/// Backoff short enough for tests, without jitter.
pub fn fast_backoff() -> BackoffConfig {
    BackoffConfig {
        base_delay: Duration::from_millis(20),
        min_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(100),
        jitter_min: Duration::ZERO,
        jitter_max: Duration::ZERO,
    }
}

/// What the client did to a socket.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketCall {
    Send(Value),
    Close(u16, String),
}

/// Server side of one socket opened by the client.
pub struct MockConnection {
    pub url: String,
    pub protocol: String,
    events: EventSender,
    calls: mpsc::UnboundedReceiver<SocketCall>,
}

impl MockConnection {
    pub fn open(&self) {
        let _ = self.events.send(TransportEvent::Opened);
    }

    pub fn send(&self, frame: Value) {
        let _ = self.events.send(TransportEvent::Message(frame.to_string()));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.events.send(TransportEvent::Closed(CloseEvent::new(code, reason)));
    }

    pub async fn recv(&mut self) -> SocketCall {
        timeout(WAIT, self.calls.recv())
            .await
            .expect("timed out waiting for socket call")
            .expect("socket dropped")
    }

    pub async fn recv_frame(&mut self) -> Value {
        match self.recv().await {
            SocketCall::Send(frame) => frame,
            other => panic!("expected frame, got {other:?}"),
        }
    }

    /// Collect the `subscribe` frames the client sends right after the ack.
    pub async fn recv_subscribes(&mut self, n: usize) -> Vec<Value> {
        let mut frames = Vec::with_capacity(n);
        for _ in 0..n {
            let frame = self.recv_frame().await;
            assert_eq!(frame["type"], "subscribe", "unexpected frame {frame}");
            frames.push(frame);
        }
        frames
    }

    /// Open the socket and acknowledge `connection_init`.
    pub async fn handshake(&mut self, ack_payload: Option<Value>) -> Value {
        self.open();
        let init = self.recv_frame().await;
        assert_eq!(init["type"], "connection_init");
        match ack_payload {
            Some(payload) => self.send(json!({"type": "connection_ack", "payload": payload})),
            None => self.send(json!({"type": "connection_ack"})),
        }
        init
    }

    /// Assert nothing else is written within `wait`.
    pub async fn assert_idle(&mut self, wait: Duration) {
        if let Ok(call) = timeout(wait, self.calls.recv()).await {
            panic!("unexpected socket call {call:?}");
        }
    }
}

/// Test-side handle receiving every socket the client opens.
pub struct MockServer {
    connections: mpsc::UnboundedReceiver<MockConnection>,
}

impl MockServer {
    pub async fn accept(&mut self) -> MockConnection {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for connection")
            .expect("transport dropped")
    }

    pub async fn assert_no_connection(&mut self, wait: Duration) {
        if let Ok(Some(conn)) = timeout(wait, self.connections.recv()).await {
            panic!("unexpected connection to {}", conn.url);
        }
    }
}

pub struct MockTransport {
    connections: mpsc::UnboundedSender<MockConnection>,
}

pub fn mock_transport() -> (MockTransport, MockServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MockTransport { connections: tx },
        MockServer { connections: rx },
    )
}

impl Transport for MockTransport {
    fn open(&self, url: &str, protocol: &str, events: EventSender) -> Box<dyn Socket> {
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        let _ = self.connections.send(MockConnection {
            url: url.to_string(),
            protocol: protocol.to_string(),
            events,
            calls: calls_rx,
        });
        Box::new(MockSocket { calls: calls_tx })
    }
}

struct MockSocket {
    calls: mpsc::UnboundedSender<SocketCall>,
}

#[async_trait]
impl Socket for MockSocket {
    async fn send(&mut self, text: String) -> ClientResult<()> {
        let frame = serde_json::from_str(&text)?;
        let _ = self.calls.send(SocketCall::Send(frame));
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: String) -> ClientResult<()> {
        let _ = self.calls.send(SocketCall::Close(code, reason));
        Ok(())
    }
}

/// Everything a sink was called with.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Next(Value),
    Error(Vec<String>),
    Complete,
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub async fn wait_for(&self, n: usize) -> Vec<SinkCall> {
        timeout(WAIT, async {
            loop {
                let calls = self.calls();
                if calls.len() >= n {
                    return calls;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for sink calls")
    }
}

impl Sink for RecordingSink {
    fn next(&mut self, payload: JsonObject) {
        self.calls
            .lock()
            .unwrap()
            .push(SinkCall::Next(Value::Object(payload)));
    }

    fn error(&mut self, errors: Vec<GraphQLError>) {
        self.calls
            .lock()
            .unwrap()
            .push(SinkCall::Error(errors.into_iter().map(|e| e.message).collect()));
    }

    fn complete(&mut self) {
        self.calls.lock().unwrap().push(SinkCall::Complete);
    }
}
