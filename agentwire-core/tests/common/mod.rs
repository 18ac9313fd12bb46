//! Shared helpers for integration tests: an in-memory transport and a
//! scripted fake server on its far side.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use agentwire_core::connection::{ClientConfig, Connection};
use agentwire_core::error::WireResult;
use agentwire_core::messages::Implementation;
use agentwire_core::transport::{
    EventReceiver, EventSender, ExitReason, Transport, TransportEvent, TransportInfo,
};
use agentwire_core::WireError;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Install a test subscriber once; harmless if one is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentwire_core=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Client side of the in-memory pipe.
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<Bytes>,
    events: EventSender,
    connected: Arc<AtomicBool>,
    sends: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, line: Bytes) -> WireResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(agentwire_core::error::TransportError::NotConnected {
                transport_type: "channel".to_string(),
                reason: "transport stopped".to_string(),
            }
            .into());
        }
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.outbound
            .send(line)
            .map_err(|_| WireError::closed("fake server gone"))
    }

    async fn stop(&mut self) -> WireResult<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::Exit(ExitReason::Stopped));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn get_info(&self) -> TransportInfo {
        let mut info = TransportInfo::new("channel");
        info.lines_sent = self.sends.load(Ordering::SeqCst) as u64;
        info
    }
}

/// Server side of the in-memory pipe.
pub struct FakeServer {
    inbound: mpsc::UnboundedReceiver<Bytes>,
    events: EventSender,
    sends: Arc<AtomicUsize>,
    connected: Arc<AtomicBool>,
}

/// Create a connected transport pair.
pub fn channel_transport() -> (Box<dyn Transport>, EventReceiver, FakeServer) {
    let (outbound, inbound) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let connected = Arc::new(AtomicBool::new(true));
    let sends = Arc::new(AtomicUsize::new(0));

    let transport = ChannelTransport {
        outbound,
        events: events_tx.clone(),
        connected: connected.clone(),
        sends: sends.clone(),
    };
    let server = FakeServer {
        inbound,
        events: events_tx,
        sends,
        connected,
    };
    (Box::new(transport), events_rx, server)
}

impl FakeServer {
    /// Next line the client wrote, parsed.
    pub async fn recv(&mut self) -> Value {
        let line = self.inbound.recv().await.expect("client closed the pipe");
        assert_eq!(line.last(), Some(&b'\n'), "every frame ends with a newline");
        serde_json::from_slice(&line).expect("client wrote invalid JSON")
    }

    /// Next line if one is already queued.
    pub fn try_recv(&mut self) -> Option<Value> {
        self.inbound
            .try_recv()
            .ok()
            .map(|line| serde_json::from_slice(&line).expect("client wrote invalid JSON"))
    }

    /// Number of `send` calls the client transport accepted.
    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    /// Deliver a message to the client.
    pub fn push(&self, message: Value) {
        self.push_raw(&message.to_string());
    }

    /// Deliver an arbitrary line to the client.
    pub fn push_raw(&self, line: &str) {
        let _ = self.events.send(TransportEvent::Line(line.to_string()));
    }

    /// Deliver any transport event.
    pub fn push_event(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Simulate the process exiting.
    pub fn exit(&self, code: i32) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self
            .events
            .send(TransportEvent::Exit(ExitReason::Exited { code: Some(code) }));
    }

    /// Answer a request with a result.
    pub fn reply(&self, id: &Value, result: Value) {
        self.push(json!({"jsonrpc": "2.0", "id": id, "result": result}));
    }

    /// Answer a request with an error.
    pub fn reply_error(&self, id: &Value, code: i64, message: &str) {
        self.push(json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}}));
    }

    /// Play the server half of the handshake; returns the `initialize` request.
    pub async fn handshake(&mut self) -> Value {
        let initialize = self.recv().await;
        assert_eq!(initialize["method"], "initialize");
        self.reply(
            &initialize["id"],
            json!({
                "protocolVersion": "2025-03-26",
                "serverInfo": {"name": "fake-server", "version": "0.0.1"},
                "capabilities": {"tools": {"listChanged": true}}
            }),
        );
        let initialized = self.recv().await;
        assert_eq!(initialized["method"], "initialized");
        initialize
    }

    /// Answer requests from `handler` until the client goes away.
    ///
    /// Notifications from the client are ignored.
    pub fn serve<F>(mut self, mut handler: F) -> JoinHandle<FakeServer>
    where
        F: FnMut(&FakeServer, &Value) -> Reply + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(line) = self.inbound.recv().await {
                let message: Value = serde_json::from_slice(&line).expect("invalid JSON");
                if message.get("id").is_none() || message.get("method").is_none() {
                    continue;
                }
                match handler(&self, &message) {
                    Reply::Result(result) => self.reply(&message["id"], result),
                    Reply::Error(code, text) => self.reply_error(&message["id"], code, &text),
                    Reply::Silent => {}
                }
            }
            self
        })
    }
}

/// What a scripted server does with one request.
pub enum Reply {
    /// Answer with a result
    Result(Value),
    /// Answer with an error object
    Error(i64, String),
    /// Say nothing
    Silent,
}

/// A ready connection plus the server side of its transport.
pub async fn connected(config: ClientConfig) -> (Connection, FakeServer) {
    let (transport, events, mut server) = channel_transport();
    let connection = Connection::start(transport, events, config);
    let (result, _) = tokio::join!(
        connection.initialize(Implementation::new("agentwire-tests", "0.1.0")),
        server.handshake()
    );
    result.expect("handshake failed");
    (connection, server)
}
