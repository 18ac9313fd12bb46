//! Core JSON-RPC message structures.
//!
//! Both backends speak a relaxed JSON-RPC: the app-server dialect omits the
//! `"jsonrpc":"2.0"` member entirely, MCP servers expect it. The member is
//! therefore optional on every message and preserved as received.
//!
//! # Message Types
//!
//! - **Request**: `{id, method, params?}`, expects exactly one response
//! - **Response**: `{id, result}` or `{id, error}`
//! - **Notification**: `{method, params?}`, no response
//!
//! # Examples
//!
//! ```rust
//! use agentwire_core::messages::core::{JsonRpcRequest, JsonRpcResponse, JsonRpcError};
//! use serde_json::json;
//!
//! let request = JsonRpcRequest::new(7, "tools/list", json!({}));
//! let response = JsonRpcResponse::success(7, json!({"tools": []}));
//! let error = JsonRpcResponse::error(7, JsonRpcError::method_not_found("tools/list"));
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Shape of a decoded message, as reported by [`MessageKind::of`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `{id, method, params?}`
    Request,
    /// `{method, params?}`
    Notification,
    /// `{id, result}`
    Response,
    /// `{id, error}`
    Error,
}

impl MessageKind {
    /// Classify a JSON value by shape.
    ///
    /// Returns `None` for non-objects and objects with no recognised shape.
    pub fn of(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let has_id = object.contains_key("id");
        let has_method = object.get("method").map_or(false, Value::is_string);

        match (has_id, has_method) {
            (true, true) => Some(Self::Request),
            (false, true) => Some(Self::Notification),
            (true, false) if object.contains_key("error") => Some(Self::Error),
            (true, false) if object.contains_key("result") => Some(Self::Response),
            _ => None,
        }
    }
}

/// Deserialize a present field as `Some`, even when its value is `null`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// JSON-RPC request message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version marker, omitted by the app-server dialect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,

    /// Identifier for request/response correlation
    pub id: RequestId,

    /// Method name being invoked
    pub method: String,

    /// Parameters for the method
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new request with the given ID, method, and parameters.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: None,
            id: id.into(),
            method: method.into(),
            params: Some(params),
        }
    }

    /// Create a new request without parameters.
    pub fn without_params(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: None,
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    /// Mark the request with `"jsonrpc":"2.0"`.
    pub fn with_version(mut self) -> Self {
        self.jsonrpc = Some(JSONRPC_VERSION.to_string());
        self
    }

    /// Get the parameters as a specific type.
    pub fn params_as<T>(&self) -> Result<T, serde_json::Error>
    where
        T: for<'de> Deserialize<'de>,
    {
        match &self.params {
            Some(params) => serde_json::from_value(params.clone()),
            None => serde_json::from_value(Value::Null),
        }
    }
}

/// JSON-RPC response message.
///
/// Contains either a result or an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version marker, omitted by the app-server dialect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,

    /// ID from the corresponding request
    pub id: RequestId,

    /// Success result (mutually exclusive with error)
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,

    /// Error result (mutually exclusive with result)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a successful response with the given result.
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: None,
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response with the given error.
    pub fn error(id: impl Into<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: None,
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Check if this response represents an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Mark the response with `"jsonrpc":"2.0"`.
    pub fn with_version(mut self) -> Self {
        self.jsonrpc = Some(JSONRPC_VERSION.to_string());
        self
    }

    /// Split the response into its outcome.
    ///
    /// An error wins when a misbehaving peer sends both members; a response
    /// carrying neither resolves to `null`.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// JSON-RPC notification message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version marker, omitted by the app-server dialect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,

    /// Method name
    pub method: String,

    /// Parameters for the method
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new notification with the given method and parameters.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: None,
            method: method.into(),
            params: Some(params),
        }
    }

    /// Create a new notification without parameters.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use agentwire_core::messages::core::JsonRpcNotification;
    ///
    /// let notification = JsonRpcNotification::without_params("initialized");
    /// assert_eq!(serde_json::to_string(&notification).unwrap(), r#"{"method":"initialized"}"#);
    /// ```
    pub fn without_params(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: None,
            method: method.into(),
            params: None,
        }
    }

    /// Mark the notification with `"jsonrpc":"2.0"`.
    pub fn with_version(mut self) -> Self {
        self.jsonrpc = Some(JSONRPC_VERSION.to_string());
        self
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code
    pub code: i64,

    /// Human-readable error message
    pub message: String,

    /// Additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Code for an invalid request.
    pub const INVALID_REQUEST: i64 = -32600;
    /// Code for an unknown method.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Code for invalid parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Code for a server-side internal error.
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Create a new JSON-RPC error.
    pub fn new(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    /// Create a "Method not found" error (-32601).
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(
            Self::METHOD_NOT_FOUND,
            format!("Method not found: {}", method.into()),
            None,
        )
    }

    /// Create an "Internal error" (-32603).
    pub fn internal_error(details: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, details, None)
    }

    /// Whether this error means the server does not know the method.
    ///
    /// Servers built on a tagged-enum dispatcher reject unknown methods with
    /// `-32600` and a serde "unknown variant" message instead of `-32601`.
    pub fn is_method_not_found(&self) -> bool {
        self.code == Self::METHOD_NOT_FOUND
            || (self.code == Self::INVALID_REQUEST && self.message.contains("unknown variant"))
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC Error {}: {}", self.code, self.message)?;
        if let Some(data) = &self.data {
            write!(f, " ({data})")?;
        }
        Ok(())
    }
}

impl std::error::Error for JsonRpcError {}

/// Request ID for JSON-RPC messages.
///
/// Connections allocate numeric ids; servers echo ids verbatim, so string
/// ids are kept distinct from numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric identifier
    Number(i64),
    /// String identifier
    String(String),
    /// Null identifier (servers use it for unparseable requests)
    Null,
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for RequestId {
    fn from(n: i32) -> Self {
        Self::Number(i64::from(n))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// Any JSON-RPC message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request message
    Request(JsonRpcRequest),
    /// Response message (result or error)
    Response(JsonRpcResponse),
    /// Notification message
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Get the method name if this is a request or notification.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(notif) => Some(&notif.method),
            Self::Response(_) => None,
        }
    }

    /// Get the request ID if this is a request or response.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Response(resp) => Some(&resp.id),
            Self::Notification(_) => None,
        }
    }

    /// The shape of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Request(_) => MessageKind::Request,
            Self::Notification(_) => MessageKind::Notification,
            Self::Response(resp) if resp.is_error() => MessageKind::Error,
            Self::Response(_) => MessageKind::Response,
        }
    }
}

impl TryFrom<Value> for JsonRpcMessage {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let kind = MessageKind::of(&value).ok_or_else(|| match &value {
            Value::Object(_) => "object has no request, response or notification shape".to_string(),
            other => format!("expected a JSON object, got {}", json_type(other)),
        })?;

        let message = match kind {
            MessageKind::Request => serde_json::from_value(value).map(Self::Request),
            MessageKind::Notification => serde_json::from_value(value).map(Self::Notification),
            MessageKind::Response | MessageKind::Error => {
                serde_json::from_value(value).map(Self::Response)
            }
        };
        message.map_err(|err| err.to_string())
    }
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::try_from(value).map_err(serde::de::Error::custom)
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(req: JsonRpcRequest) -> Self {
        Self::Request(req)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(resp: JsonRpcResponse) -> Self {
        Self::Response(resp)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(notif: JsonRpcNotification) -> Self {
        Self::Notification(notif)
    }
}

/// The `jsonrpc` member value used by the MCP dialect.
pub const JSONRPC_VERSION: &str = "2.0";

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// An empty JSON object, the default `params` for list methods.
pub fn empty_object() -> Value {
    Value::Object(Map::new())
}
