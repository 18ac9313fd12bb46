//! App-server client.
//!
//! App-server backends are long-lived subprocesses that drive agent
//! sessions. They speak the same line protocol as MCP servers but omit the
//! `jsonrpc` member, push `thread/*`, `turn/*` and `item/*` notifications,
//! and ask the client for approvals through server-initiated requests that
//! are answered with [`AppServerClient::respond_to_approval`].
//!
//! Some operations were renamed between backend releases; those calls try
//! the current method name first and fall back to the older one when the
//! server reports it does not know the method.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::connection::{ClientConfig, Connection, Dialect, Subscription};
use crate::error::{ProtocolError, WireResult};
use crate::messages::{JsonRpcError, RequestId};
use crate::transport::{EventReceiver, StdioConfig, Transport, TransportConfig, TransportFactory};

const THREAD_START: &str = "thread/start";
const THREAD_RESUME: &[&str] = &["thread/resume", "resumeConversation"];
const TURN_START: &str = "turn/start";
const TURN_INTERRUPT: &[&str] = &["turn/interrupt", "interruptConversation"];

/// Answer to a server approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReviewDecision {
    /// Allow this once
    Accept,
    /// Allow for the rest of the session
    AcceptForSession,
    /// Refuse; the agent continues
    Decline,
    /// Refuse and stop the turn
    Cancel,
}

/// Client for an app-server subprocess.
#[derive(Debug, Clone)]
pub struct AppServerClient {
    connection: Connection,
}

impl AppServerClient {
    /// Spawn the app-server and perform the handshake.
    pub async fn spawn(command: StdioConfig, config: ClientConfig) -> WireResult<Self> {
        info!(command = %command.command, "Spawning app-server");
        let (transport, events) =
            TransportFactory::start(&TransportConfig::Stdio(command), "app-server", None).await?;
        Self::connect(transport, events, config).await
    }

    /// Handshake over an already started transport.
    ///
    /// The dialect is forced to [`Dialect::AppServer`].
    pub async fn connect(
        transport: Box<dyn Transport>,
        events: EventReceiver,
        config: ClientConfig,
    ) -> WireResult<Self> {
        let config = config.with_dialect(Dialect::AppServer);
        let connection = Connection::connect(transport, events, config).await?;
        Ok(Self { connection })
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Start a thread; returns its id.
    ///
    /// `params` carries backend options such as `cwd` or `model`.
    pub async fn thread_start(&self, params: Value) -> WireResult<String> {
        let result = self
            .connection
            .request(THREAD_START, Some(params), None)
            .await?;
        let thread_id = nested_id(&result, "thread", THREAD_START)?;
        debug!(thread_id = %thread_id, "Thread started");
        Ok(thread_id)
    }

    /// Resume a stored thread.
    pub async fn thread_resume(&self, thread_id: &str) -> WireResult<Value> {
        self.connection
            .request_with_fallback(THREAD_RESUME, Some(json!({ "threadId": thread_id })), None)
            .await
    }

    /// Start a turn with the given input items; returns the turn id.
    pub async fn turn_start(&self, thread_id: &str, input: Vec<Value>) -> WireResult<String> {
        let params = json!({ "threadId": thread_id, "input": input });
        let result = self.connection.request(TURN_START, Some(params), None).await?;
        let turn_id = nested_id(&result, "turn", TURN_START)?;
        debug!(thread_id = %thread_id, turn_id = %turn_id, "Turn started");
        Ok(turn_id)
    }

    /// Start a turn from plain text.
    pub async fn turn_start_text(&self, thread_id: &str, text: &str) -> WireResult<String> {
        self.turn_start(thread_id, vec![json!({ "type": "text", "text": text })])
            .await
    }

    /// Interrupt a running turn.
    pub async fn turn_interrupt(&self, thread_id: &str, turn_id: &str) -> WireResult<()> {
        self.connection
            .request_with_fallback(
                TURN_INTERRUPT,
                Some(json!({ "threadId": thread_id, "turnId": turn_id })),
                None,
            )
            .await?;
        Ok(())
    }

    /// Answer an approval request the server sent.
    pub async fn respond_to_approval(
        &self,
        request_id: RequestId,
        decision: ReviewDecision,
    ) -> WireResult<()> {
        debug!(id = %request_id, ?decision, "Answering approval request");
        self.connection
            .respond(request_id, Ok(json!({ "decision": decision })))
            .await
    }

    /// Reject a server request the client cannot handle.
    pub async fn reject_request(&self, request_id: RequestId, error: JsonRpcError) -> WireResult<()> {
        self.connection.respond(request_id, Err(error)).await
    }

    /// Subscribe to notifications and approval requests.
    pub async fn subscribe(&self) -> WireResult<Subscription> {
        self.connection.subscribe().await
    }

    /// Stop the app-server.
    pub async fn shutdown(&self) -> WireResult<()> {
        info!("Shutting down app-server");
        self.connection.disconnect().await
    }
}

fn nested_id(result: &Value, field: &str, method: &str) -> WireResult<String> {
    result
        .get(field)
        .and_then(|object| object.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ProtocolError::InvalidResponse {
                method: method.to_string(),
                reason: format!("missing {}.id", field),
            }
            .into()
        })
}
