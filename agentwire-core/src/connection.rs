//! Connection multiplexer.
//!
//! A [`Connection`] is a cheap, cloneable handle to a worker task that owns
//! everything mutable about one session: the transport, the table of pending
//! requests, request deadlines, the subscriber list, the id counter and the
//! tool-list cache. Handles talk to the worker over a bounded command channel
//! and wait on oneshot replies, so many callers can have requests in flight
//! at once and each only waits for its own.
//!
//! The worker multiplexes three sources:
//!
//! - commands from handles (send a request, subscribe, disconnect, ...)
//! - transport events, processed strictly in delivery order
//! - request deadlines, kept in a [`DelayQueue`]
//!
//! Only the worker decides whether a request is answered or timed out, so
//! the first decision wins: a response arriving after its deadline finds no
//! pending entry and is dropped.
//!
//! # Examples
//!
//! ```rust,no_run
//! use agentwire_core::connection::{ClientConfig, Connection};
//! use agentwire_core::transport::{TransportConfig, TransportFactory};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TransportConfig::stdio("docs-server", &["--stdio"]);
//!     let (transport, events) = TransportFactory::start(&config, "docs", None).await?;
//!
//!     let connection = Connection::connect(transport, events, ClientConfig::default()).await?;
//!     let tools = connection.request("tools/list", Some(json!({})), None).await?;
//!     println!("{tools}");
//!
//!     connection.disconnect().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{ConfigError, ProtocolError, TransportError, WireError, WireResult};
use crate::messages::core::empty_object;
use crate::messages::notifications::methods;
use crate::messages::{
    Implementation, InitializeParams, InitializeResult, JsonRpcError, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ProtocolVersion, RequestId,
    ServerMessage, Tool,
};
use crate::transport::{EventReceiver, Transport, TransportEvent};

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_init_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_command_buffer() -> usize {
    64
}

/// Which flavour of the line protocol the server speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// MCP servers: every message carries `"jsonrpc":"2.0"`
    #[default]
    Mcp,

    /// App-server backends: the `jsonrpc` member is omitted
    AppServer,
}

/// Connection behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Default timeout for requests
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// Timeout for the `initialize` handshake
    #[serde(with = "humantime_serde", default = "default_init_timeout")]
    pub init_timeout: Duration,

    /// Name and version sent in the handshake
    #[serde(default)]
    pub client_info: Implementation,

    /// Protocol version requested in the handshake
    #[serde(default)]
    pub protocol_version: ProtocolVersion,

    /// Wire dialect
    #[serde(default)]
    pub dialect: Dialect,

    /// Client capabilities sent in the handshake
    #[serde(default = "empty_object")]
    pub capabilities: Value,

    /// Capacity of the handle-to-worker command channel
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            init_timeout: default_init_timeout(),
            client_info: Implementation::default(),
            protocol_version: ProtocolVersion::default(),
            dialect: Dialect::default(),
            capabilities: empty_object(),
            command_buffer: default_command_buffer(),
        }
    }
}

impl ClientConfig {
    /// Set the default request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the handshake timeout.
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Set the client name and version.
    pub fn with_client_info(mut self, client_info: Implementation) -> Self {
        self.client_info = client_info;
        self
    }

    /// Set the wire dialect.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set the client capabilities.
    pub fn with_capabilities(mut self, capabilities: Value) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Transport is up, handshake not yet complete
    Connecting,
    /// Handshake complete; requests are accepted
    Ready,
    /// Terminal: the transport exited or the connection was disconnected
    Closed,
}

type Reply<T> = oneshot::Sender<WireResult<T>>;

enum Command {
    Request {
        method: String,
        params: Option<Value>,
        timeout: Duration,
        handshake: bool,
        reply: Reply<Value>,
    },
    CompleteHandshake {
        result: InitializeResult,
        reply: Reply<()>,
    },
    Notify {
        method: String,
        params: Option<Value>,
        reply: Reply<()>,
    },
    Respond {
        id: RequestId,
        outcome: Result<Value, JsonRpcError>,
        reply: Reply<()>,
    },
    Subscribe {
        sink: mpsc::UnboundedSender<ServerMessage>,
        reply: oneshot::Sender<u64>,
    },
    Unsubscribe {
        id: u64,
    },
    ServerInfo {
        reply: oneshot::Sender<Option<InitializeResult>>,
    },
    CachedTools {
        reply: oneshot::Sender<Option<Vec<Tool>>>,
    },
    StoreTools {
        tools: Vec<Tool>,
    },
    Disconnect {
        reply: Reply<()>,
    },
}

/// Handle to a running connection.
///
/// Cloning is cheap; all clones drive the same worker. When the last handle
/// is dropped the worker stops the transport and exits.
#[derive(Clone)]
pub struct Connection {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    config: Arc<ClientConfig>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("dialect", &self.config.dialect)
            .finish()
    }
}

/// A stream of server-initiated messages.
///
/// Messages arrive in the order the server sent them. The stream ends when
/// the connection closes; dropping it unregisters the subscriber.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Subscription {
    /// Receive the next message, or `None` once the connection has closed.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.receiver.recv().await
    }

    /// Receive a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        self.receiver.try_recv().ok()
    }
}

impl futures::Stream for Subscription {
    type Item = ServerMessage;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<ServerMessage>> {
        self.receiver.poll_recv(cx)
    }
}

impl Connection {
    /// Spawn the worker for an already started transport.
    ///
    /// The connection starts in [`ConnectionState::Connecting`]; call
    /// [`Connection::initialize`] before making requests.
    pub fn start(transport: Box<dyn Transport>, events: EventReceiver, config: ClientConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(config.command_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let config = Arc::new(config);

        let worker = Worker {
            transport,
            events,
            commands: commands_rx,
            state: state_tx,
            dialect: config.dialect,
            next_id: 0,
            pending: HashMap::new(),
            deadlines: DelayQueue::new(),
            subscribers: Vec::new(),
            next_subscriber: 0,
            handshake_started: false,
            server_info: None,
            tool_cache: None,
        };

        info!(
            transport = %worker.transport.get_info().transport_type,
            "Starting connection"
        );
        tokio::spawn(worker.run());

        Self {
            commands: commands_tx,
            state: state_rx,
            config,
        }
    }

    /// Start the worker and perform the handshake.
    pub async fn connect(
        transport: Box<dyn Transport>,
        events: EventReceiver,
        config: ClientConfig,
    ) -> WireResult<Self> {
        let client_info = config.client_info.clone();
        let connection = Self::start(transport, events, config);
        connection.initialize(client_info).await?;
        Ok(connection)
    }

    /// Perform the `initialize` handshake.
    ///
    /// Sends `initialize` (as request id 0), waits for the result within
    /// `init_timeout`, then sends `initialized` and moves to `Ready`. A failed
    /// handshake closes the connection; calling this on a connection that
    /// has already started its handshake fails without closing it.
    pub async fn initialize(&self, client_info: Implementation) -> WireResult<InitializeResult> {
        let params = InitializeParams {
            protocol_version: self.config.protocol_version.clone(),
            client_info,
            capabilities: self.config.capabilities.clone(),
        };

        match self.handshake(params).await {
            Ok(result) => Ok(result),
            Err(err @ WireError::Protocol(ProtocolError::StateViolation { .. })) => Err(err),
            Err(err) => {
                warn!("Handshake failed: {}", err);
                let _ = self.disconnect().await;
                Err(match err {
                    WireError::Protocol(_) => err,
                    other => ProtocolError::InitializationFailed {
                        reason: other.to_string(),
                    }
                    .into(),
                })
            }
        }
    }

    async fn handshake(&self, params: InitializeParams) -> WireResult<InitializeResult> {
        let params = serde_json::to_value(params)?;
        let timeout = self.config.init_timeout;

        let raw = self
            .call(|reply| Command::Request {
                method: "initialize".to_string(),
                params: Some(params),
                timeout,
                handshake: true,
                reply,
            })
            .await?;

        let result: InitializeResult =
            serde_json::from_value(raw).map_err(|e| ProtocolError::InitializationFailed {
                reason: format!("Invalid initialize result: {}", e),
            })?;

        self.call(|reply| Command::CompleteHandshake {
            result: result.clone(),
            reply,
        })
        .await?;

        Ok(result)
    }

    /// Send a request and wait for its result.
    ///
    /// `timeout` defaults to the configured `request_timeout`. Error responses
    /// become [`WireError::Remote`]; an expired deadline becomes
    /// [`WireError::Timeout`].
    pub async fn request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> WireResult<Value> {
        let timeout = timeout.unwrap_or(self.config.request_timeout);
        let method = method.into();
        self.call(|reply| Command::Request {
            method,
            params,
            timeout,
            handshake: false,
            reply,
        })
        .await
    }

    /// Send a request, falling back to the next method name whenever the
    /// server reports that a method does not exist.
    ///
    /// Used for renamed methods, e.g. `["thread/fork", "thread/resume"]`.
    pub async fn request_with_fallback(
        &self,
        methods: &[&str],
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> WireResult<Value> {
        let Some((last, earlier)) = methods.split_last() else {
            return Err(ConfigError::MissingParameter {
                parameter: "methods".to_string(),
            }
            .into());
        };

        for method in earlier {
            match self.request(*method, params.clone(), timeout).await {
                Err(err) if err.is_method_not_found() => {
                    debug!(method = %method, "Method not supported by server, trying fallback");
                }
                other => return other,
            }
        }

        self.request(*last, params, timeout).await
    }

    /// Send a notification.
    pub async fn notify(&self, method: impl Into<String>, params: Option<Value>) -> WireResult<()> {
        let method = method.into();
        self.call(|reply| Command::Notify {
            method,
            params,
            reply,
        })
        .await
    }

    /// Answer a request the server sent to the client.
    pub async fn respond(
        &self,
        id: RequestId,
        outcome: Result<Value, JsonRpcError>,
    ) -> WireResult<()> {
        self.call(|reply| Command::Respond { id, outcome, reply })
            .await
    }

    /// Register a subscriber for server notifications and requests.
    pub async fn subscribe(&self) -> WireResult<Subscription> {
        let (sink, receiver) = mpsc::unbounded_channel();
        let (reply, rx) = oneshot::channel();
        self.send_command(Command::Subscribe { sink, reply }).await?;
        let id = rx.await.map_err(|_| worker_gone())?;
        Ok(Subscription { id, receiver })
    }

    /// Unregister a subscriber eagerly.
    pub async fn unsubscribe(&self, subscription: Subscription) {
        let _ = self
            .send_command(Command::Unsubscribe {
                id: subscription.id,
            })
            .await;
    }

    /// Stop the transport and fail every pending request with `Closed`.
    ///
    /// Disconnecting an already closed connection is a no-op.
    pub async fn disconnect(&self) -> WireResult<()> {
        match self.call(|reply| Command::Disconnect { reply }).await {
            Err(WireError::Closed { .. }) => Ok(()),
            other => other,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|state| *state == ConnectionState::Closed).await;
    }

    /// The server's `initialize` result, once the handshake has completed.
    pub async fn server_info(&self) -> Option<InitializeResult> {
        let (reply, rx) = oneshot::channel();
        self.send_command(Command::ServerInfo { reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    /// The cached raw tool list, if one is held.
    pub async fn cached_tools(&self) -> Option<Vec<Tool>> {
        let (reply, rx) = oneshot::channel();
        self.send_command(Command::CachedTools { reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Replace the cached raw tool list.
    pub async fn store_tools(&self, tools: Vec<Tool>) {
        let _ = self.send_command(Command::StoreTools { tools }).await;
    }

    /// Configuration this connection was started with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn send_command(&self, command: Command) -> WireResult<()> {
        self.commands.send(command).await.map_err(|_| worker_gone())
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> WireResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send_command(command(reply)).await?;
        rx.await.map_err(|_| worker_gone())?
    }
}

fn worker_gone() -> WireError {
    WireError::closed("connection is closed")
}

struct Pending {
    method: String,
    timeout: Duration,
    deadline: delay_queue::Key,
    reply: Reply<Value>,
}

struct Worker {
    transport: Box<dyn Transport>,
    events: EventReceiver,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<ConnectionState>,
    dialect: Dialect,
    next_id: i64,
    pending: HashMap<RequestId, Pending>,
    deadlines: DelayQueue<RequestId>,
    subscribers: Vec<(u64, mpsc::UnboundedSender<ServerMessage>)>,
    next_subscriber: u64,
    handshake_started: bool,
    server_info: Option<InitializeResult>,
    tool_cache: Option<Vec<Tool>>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let flow = tokio::select! {
                biased;

                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        self.close(TransportError::ConnectionLost {
                            transport_type: self.transport_type(),
                            reason: "event stream ended".to_string(),
                        }.into());
                        ControlFlow::Break(())
                    }
                },

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All connection handles dropped, shutting down");
                        if let Err(e) = self.transport.stop().await {
                            warn!("Failed to stop transport: {}", e);
                        }
                        self.close(WireError::closed("connection dropped"));
                        ControlFlow::Break(())
                    }
                },

                Some(expired) = self.deadlines.next(), if !self.deadlines.is_empty() => {
                    self.expire(expired.into_inner());
                    ControlFlow::Continue(())
                }
            };

            if flow.is_break() {
                break;
            }
        }
        debug!("Connection worker finished");
    }

    fn transport_type(&self) -> String {
        self.transport.get_info().transport_type
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Request {
                method,
                params,
                timeout,
                handshake,
                reply,
            } => {
                if let Err(err) = self.check_request_allowed(handshake) {
                    let _ = reply.send(Err(err));
                    return ControlFlow::Continue(());
                }
                self.start_request(method, params, timeout, reply).await;
            }
            Command::CompleteHandshake { result, reply } => {
                let _ = reply.send(self.complete_handshake(result).await);
            }
            Command::Notify {
                method,
                params,
                reply,
            } => {
                let result = match self.current_state() {
                    ConnectionState::Ready => {
                        let notification = match params {
                            Some(params) => JsonRpcNotification::new(method, params),
                            None => JsonRpcNotification::without_params(method),
                        };
                        self.write(self.versioned_notification(notification)).await
                    }
                    _ => Err(WireError::NotReady),
                };
                let _ = reply.send(result);
            }
            Command::Respond { id, outcome, reply } => {
                let response = match outcome {
                    Ok(result) => JsonRpcResponse::success(id, result),
                    Err(error) => JsonRpcResponse::error(id, error),
                };
                let _ = reply.send(self.write(self.versioned_response(response)).await);
            }
            Command::Subscribe { sink, reply } => {
                let id = self.next_subscriber;
                self.next_subscriber += 1;
                self.subscribers.push((id, sink));
                debug!(subscriber = id, "Subscriber registered");
                let _ = reply.send(id);
            }
            Command::Unsubscribe { id } => {
                self.subscribers.retain(|(existing, _)| *existing != id);
                debug!(subscriber = id, "Subscriber removed");
            }
            Command::ServerInfo { reply } => {
                let _ = reply.send(self.server_info.clone());
            }
            Command::CachedTools { reply } => {
                let _ = reply.send(self.tool_cache.clone());
            }
            Command::StoreTools { tools } => {
                self.tool_cache = Some(tools);
            }
            Command::Disconnect { reply } => {
                info!("Disconnecting");
                let result = self.transport.stop().await;
                self.close(WireError::closed("connection closed by client"));
                let _ = reply.send(result);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn check_request_allowed(&mut self, handshake: bool) -> WireResult<()> {
        let state = self.current_state();
        if !handshake {
            return match state {
                ConnectionState::Ready => Ok(()),
                _ => Err(WireError::NotReady),
            };
        }

        if self.handshake_started || state != ConnectionState::Connecting {
            return Err(ProtocolError::StateViolation {
                reason: "handshake already performed".to_string(),
            }
            .into());
        }
        self.handshake_started = true;
        Ok(())
    }

    async fn start_request(
        &mut self,
        method: String,
        params: Option<Value>,
        timeout: Duration,
        reply: Reply<Value>,
    ) {
        let id = RequestId::Number(self.next_id);
        self.next_id += 1;

        let mut request = match params {
            Some(params) => JsonRpcRequest::new(id.clone(), method.clone(), params),
            None => JsonRpcRequest::without_params(id.clone(), method.clone()),
        };
        if self.dialect == Dialect::Mcp {
            request = request.with_version();
        }

        if let Err(err) = self.write(request.into()).await {
            let _ = reply.send(Err(err));
            return;
        }

        debug!(id = %id, method = %method, "Request sent");
        let deadline = self.deadlines.insert(id.clone(), timeout);
        self.pending.insert(
            id,
            Pending {
                method,
                timeout,
                deadline,
                reply,
            },
        );
    }

    async fn complete_handshake(&mut self, result: InitializeResult) -> WireResult<()> {
        if self.current_state() != ConnectionState::Connecting {
            return Err(ProtocolError::StateViolation {
                reason: "connection is not in the handshake phase".to_string(),
            }
            .into());
        }

        let initialized = JsonRpcNotification::without_params("initialized");
        self.write(self.versioned_notification(initialized)).await?;

        info!(
            server = result.server_name().unwrap_or("unknown"),
            "Connection ready"
        );
        self.server_info = Some(result);
        self.state.send_replace(ConnectionState::Ready);
        Ok(())
    }

    fn versioned_notification(&self, notification: JsonRpcNotification) -> JsonRpcMessage {
        match self.dialect {
            Dialect::Mcp => notification.with_version().into(),
            Dialect::AppServer => notification.into(),
        }
    }

    fn versioned_response(&self, response: JsonRpcResponse) -> JsonRpcMessage {
        match self.dialect {
            Dialect::Mcp => response.with_version().into(),
            Dialect::AppServer => response.into(),
        }
    }

    async fn write(&mut self, message: JsonRpcMessage) -> WireResult<()> {
        let line = codec::encode(&message)?;
        self.transport.send(line).await
    }

    async fn handle_event(&mut self, event: TransportEvent) -> ControlFlow<()> {
        match event {
            TransportEvent::Line(line) => self.handle_line(&line).await,
            TransportEvent::Stderr(_) => {}
            TransportEvent::RequestFailed { id: Some(id), error } => {
                match self.pending.remove(&id) {
                    Some(pending) => {
                        self.deadlines.remove(&pending.deadline);
                        let _ = pending.reply.send(Err(error));
                    }
                    None => debug!(id = %id, "Transport failure for unknown request: {}", error),
                }
            }
            TransportEvent::RequestFailed { id: None, error } => {
                warn!("Transport failed to deliver a message: {}", error);
            }
            TransportEvent::Exit(reason) => {
                info!("Transport exited: {}", reason);
                self.close(
                    TransportError::ConnectionLost {
                        transport_type: self.transport_type(),
                        reason: reason.to_string(),
                    }
                    .into(),
                );
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn handle_line(&mut self, line: &str) {
        let message = match codec::parse_line(line) {
            Ok(message) => message,
            Err(err) => {
                warn!("Dropping malformed line ({}): {}", err, line);
                return;
            }
        };

        match message {
            JsonRpcMessage::Response(response) => self.resolve(response),
            JsonRpcMessage::Notification(notification) => {
                debug!(method = %notification.method, "Notification received");
                if notification.method == methods::TOOLS_LIST_CHANGED {
                    self.tool_cache = None;
                }
                self.broadcast(ServerMessage::Notification(notification.into()));
            }
            JsonRpcMessage::Request(request) => {
                debug!(id = %request.id, method = %request.method, "Server request received");
                let id = request.id.clone();
                let method = request.method.clone();
                if !self.broadcast(ServerMessage::Request(request)) {
                    debug!(method = %method, "No subscriber for server request, rejecting");
                    let response = JsonRpcResponse::error(id, JsonRpcError::method_not_found(method));
                    if let Err(e) = self.write(self.versioned_response(response)).await {
                        debug!("Failed to reject server request: {}", e);
                    }
                }
            }
        }
    }

    fn resolve(&mut self, response: JsonRpcResponse) {
        match self.pending.remove(&response.id) {
            Some(pending) => {
                self.deadlines.remove(&pending.deadline);
                debug!(id = %response.id, method = %pending.method, "Response received");
                let _ = pending
                    .reply
                    .send(response.into_result().map_err(WireError::Remote));
            }
            None => debug!(id = %response.id, "Dropping response for unknown request id"),
        }
    }

    /// Deliver to every live subscriber; returns whether anyone received it.
    fn broadcast(&mut self, message: ServerMessage) -> bool {
        self.subscribers
            .retain(|(_, sink)| sink.send(message.clone()).is_ok());
        !self.subscribers.is_empty()
    }

    fn expire(&mut self, id: RequestId) {
        if let Some(pending) = self.pending.remove(&id) {
            warn!(id = %id, method = %pending.method, "Request timed out after {:?}", pending.timeout);
            let _ = pending
                .reply
                .send(Err(WireError::timeout(pending.method, pending.timeout)));
        }
    }

    fn close(&mut self, error: WireError) {
        for (_, pending) in self.pending.drain() {
            let _ = pending.reply.send(Err(error.clone()));
        }
        self.deadlines.clear();
        self.subscribers.clear();
        self.state.send_replace(ConnectionState::Closed);
        info!("Connection closed: {}", error);
    }
}
