//! Server-initiated traffic delivered to subscribers.
//!
//! Notifications are an open set. The ones the engine knows about are parsed
//! into [`KnownNotification`]; anything else, including a known method whose
//! params do not have the expected shape, is kept as [`ServerNotification::Raw`]
//! so a newer server never breaks an older client.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::core::{JsonRpcNotification, JsonRpcRequest};

/// Method names of the notifications parsed into [`KnownNotification`].
pub mod methods {
    /// The server's tool list changed
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    /// The server's resource list changed
    pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
    /// The server's prompt list changed
    pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
    /// Progress of a long-running request
    pub const PROGRESS: &str = "notifications/progress";
    /// Server log message
    pub const LOG_MESSAGE: &str = "notifications/message";
    /// A conversation thread was created or resumed
    pub const THREAD_STARTED: &str = "thread/started";
    /// A turn began
    pub const TURN_STARTED: &str = "turn/started";
    /// A turn finished
    pub const TURN_COMPLETED: &str = "turn/completed";
    /// A turn item began
    pub const ITEM_STARTED: &str = "item/started";
    /// A turn item finished
    pub const ITEM_COMPLETED: &str = "item/completed";
    /// Streaming text of an agent message
    pub const AGENT_MESSAGE_DELTA: &str = "item/agentMessage/delta";
    /// The backend reported an error for a turn
    pub const ERROR: &str = "error";
}

/// `notifications/progress` params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    /// Token from the originating request's `_meta.progressToken`
    pub progress_token: Value,
    /// Progress so far
    pub progress: f64,
    /// Total, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Human-readable status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `notifications/message` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessageParams {
    /// Severity (`debug`, `info`, `warning`, `error`, ...)
    pub level: String,
    /// Logger name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    /// Log payload
    #[serde(default)]
    pub data: Value,
}

/// `thread/started` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadStartedParams {
    /// The thread as reported by the backend, always carrying an `id`
    pub thread: Value,
}

impl ThreadStartedParams {
    /// The thread id.
    pub fn thread_id(&self) -> Option<&str> {
        self.thread.get("id").and_then(Value::as_str)
    }
}

/// `turn/started` and `turn/completed` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnParams {
    /// Thread the turn belongs to
    pub thread_id: String,
    /// The turn object (`id`, `status`, ...)
    pub turn: Value,
}

impl TurnParams {
    /// The turn id.
    pub fn turn_id(&self) -> Option<&str> {
        self.turn.get("id").and_then(Value::as_str)
    }
}

/// `item/started` and `item/completed` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemParams {
    /// Thread the item belongs to
    pub thread_id: String,
    /// Turn the item belongs to
    pub turn_id: String,
    /// The item, tagged by its `type`
    pub item: Value,
}

/// `item/agentMessage/delta` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessageDeltaParams {
    /// Thread the message belongs to
    pub thread_id: String,
    /// Turn the message belongs to
    pub turn_id: String,
    /// Item being streamed
    pub item_id: String,
    /// Next chunk of text
    pub delta: String,
}

/// `error` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotificationParams {
    /// Error details (`message` plus backend-specific members)
    pub error: Value,
    /// Whether the backend will retry on its own
    #[serde(default)]
    pub will_retry: bool,
    /// Remaining members (thread and turn ids, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ErrorNotificationParams {
    /// The error message, if present.
    pub fn message(&self) -> Option<&str> {
        self.error.get("message").and_then(Value::as_str)
    }
}

/// Notifications with a typed representation.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum KnownNotification {
    ToolsListChanged,
    ResourcesListChanged,
    PromptsListChanged,
    Progress(ProgressParams),
    LogMessage(LogMessageParams),
    ThreadStarted(ThreadStartedParams),
    TurnStarted(TurnParams),
    TurnCompleted(TurnParams),
    ItemStarted(ItemParams),
    ItemCompleted(ItemParams),
    AgentMessageDelta(AgentMessageDeltaParams),
    Error(ErrorNotificationParams),
}

impl KnownNotification {
    /// Parse a notification by method name.
    ///
    /// Returns `None` for unknown methods and for params that do not fit.
    pub fn parse(method: &str, params: Option<&Value>) -> Option<Self> {
        fn typed<T: for<'de> Deserialize<'de>>(params: Option<&Value>) -> Option<T> {
            serde_json::from_value(params?.clone()).ok()
        }

        let known = match method {
            methods::TOOLS_LIST_CHANGED => Self::ToolsListChanged,
            methods::RESOURCES_LIST_CHANGED => Self::ResourcesListChanged,
            methods::PROMPTS_LIST_CHANGED => Self::PromptsListChanged,
            methods::PROGRESS => Self::Progress(typed(params)?),
            methods::LOG_MESSAGE => Self::LogMessage(typed(params)?),
            methods::THREAD_STARTED => Self::ThreadStarted(typed(params)?),
            methods::TURN_STARTED => Self::TurnStarted(typed(params)?),
            methods::TURN_COMPLETED => Self::TurnCompleted(typed(params)?),
            methods::ITEM_STARTED => Self::ItemStarted(typed(params)?),
            methods::ITEM_COMPLETED => Self::ItemCompleted(typed(params)?),
            methods::AGENT_MESSAGE_DELTA => Self::AgentMessageDelta(typed(params)?),
            methods::ERROR => Self::Error(typed(params)?),
            _ => return None,
        };
        Some(known)
    }

    /// Wire method name of this notification.
    pub fn method(&self) -> &'static str {
        match self {
            Self::ToolsListChanged => methods::TOOLS_LIST_CHANGED,
            Self::ResourcesListChanged => methods::RESOURCES_LIST_CHANGED,
            Self::PromptsListChanged => methods::PROMPTS_LIST_CHANGED,
            Self::Progress(_) => methods::PROGRESS,
            Self::LogMessage(_) => methods::LOG_MESSAGE,
            Self::ThreadStarted(_) => methods::THREAD_STARTED,
            Self::TurnStarted(_) => methods::TURN_STARTED,
            Self::TurnCompleted(_) => methods::TURN_COMPLETED,
            Self::ItemStarted(_) => methods::ITEM_STARTED,
            Self::ItemCompleted(_) => methods::ITEM_COMPLETED,
            Self::AgentMessageDelta(_) => methods::AGENT_MESSAGE_DELTA,
            Self::Error(_) => methods::ERROR,
        }
    }
}

/// A notification received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerNotification {
    /// A notification with a typed representation
    Known(KnownNotification),
    /// Any other notification, kept verbatim
    Raw {
        /// Method name
        method: String,
        /// Params, if present
        params: Option<Value>,
    },
}

impl ServerNotification {
    /// Method name of the notification.
    pub fn method(&self) -> &str {
        match self {
            Self::Known(known) => known.method(),
            Self::Raw { method, .. } => method,
        }
    }
}

impl From<JsonRpcNotification> for ServerNotification {
    fn from(notification: JsonRpcNotification) -> Self {
        match KnownNotification::parse(&notification.method, notification.params.as_ref()) {
            Some(known) => Self::Known(known),
            None => Self::Raw {
                method: notification.method,
                params: notification.params,
            },
        }
    }
}

/// Server-initiated traffic handed to subscribers, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// A notification
    Notification(ServerNotification),
    /// A request the client must answer with `Connection::respond`
    Request(JsonRpcRequest),
}

impl ServerMessage {
    /// Method name of the message.
    pub fn method(&self) -> &str {
        match self {
            Self::Notification(notification) => notification.method(),
            Self::Request(request) => &request.method,
        }
    }
}
