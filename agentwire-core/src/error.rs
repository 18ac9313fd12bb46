//! Error types for agentwire operations.
//!
//! The taxonomy mirrors how failures travel through the engine:
//!
//! - **Transport** errors (spawn, send, process exit) are fatal to a
//!   connection and surface to every pending caller.
//! - **Protocol** errors cover malformed traffic and state violations.
//! - **Remote** errors carry a server `error` object verbatim.
//! - **Timeout** errors are synthesized locally by the connection worker.
//! - **ApprovalDenied** never reaches the transport and is never retried.
//!
//! Whether an error is worth retrying is answered by [`WireError::is_retryable`],
//! which the retry layer uses as its default predicate.

use std::time::Duration;

use thiserror::Error;

use crate::messages::JsonRpcError;

/// The main error type for all agentwire operations.
///
/// # Examples
///
/// ```rust
/// use agentwire_core::error::{WireError, TransportError};
///
/// let error = WireError::Transport(TransportError::ConnectionLost {
///     transport_type: "stdio".to_string(),
///     reason: "process exited with status 1".to_string(),
/// });
///
/// assert!(error.is_retryable());
/// ```
#[derive(Error, Debug, Clone)]
pub enum WireError {
    /// Transport-related errors (spawn, send, process exit, HTTP status)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol-level errors (malformed messages, handshake failures)
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server answered with an `error` object
    #[error("Remote error: {0}")]
    Remote(JsonRpcError),

    /// No response arrived before the request deadline
    #[error("Request '{method}' timed out after {timeout:?}")]
    Timeout {
        /// Method of the request that timed out
        method: String,
        /// The timeout window that elapsed
        timeout: Duration,
    },

    /// A call was attempted before the handshake completed
    #[error("Connection not ready: handshake has not completed")]
    NotReady,

    /// The connection is closed
    #[error("Connection closed: {reason}")]
    Closed {
        /// Why the connection closed
        reason: String,
    },

    /// The approval hook rejected a tool call
    #[error("Tool call denied: {reason}")]
    ApprovalDenied {
        /// Reason given by the approval hook
        reason: String,
    },

    /// Authentication and credential errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {reason}")]
    Serialization {
        /// Rendered serde error
        reason: String,
    },

    /// IO errors
    #[error("IO error: {reason}")]
    Io {
        /// Rendered IO error
        reason: String,
    },
}

/// Transport-specific errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum TransportError {
    /// Failed to spawn the process or open the connection
    #[error("Failed to start {transport_type} transport: {reason}")]
    SpawnFailed {
        transport_type: String,
        reason: String,
    },

    /// Connection was lost while requests were outstanding
    #[error("Connection lost to {transport_type} server: {reason}")]
    ConnectionLost {
        transport_type: String,
        reason: String,
    },

    /// Connection reset by the peer mid-request
    #[error("Connection reset ({transport_type}): {reason}")]
    ConnectionReset {
        transport_type: String,
        reason: String,
    },

    /// Failed to write a message
    #[error("Failed to send message via {transport_type}: {reason}")]
    SendFailed {
        transport_type: String,
        reason: String,
    },

    /// Transport has exited or was stopped
    #[error("Transport not connected ({transport_type}): {reason}")]
    NotConnected {
        transport_type: String,
        reason: String,
    },

    /// Network-level failure for HTTP transports
    #[error("Network error ({transport_type}): {reason}")]
    NetworkError {
        transport_type: String,
        reason: String,
    },

    /// Non-success HTTP status
    #[error("HTTP error: {status_code} - {reason}")]
    HttpError {
        status_code: u16,
        reason: String,
        retry_after: Option<Duration>,
    },
}

/// Protocol-level errors related to message handling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ProtocolError {
    /// A message did not have a recognised JSON-RPC shape
    #[error("Invalid JSON-RPC message: {reason}")]
    InvalidMessage { reason: String },

    /// Handshake failed
    #[error("Protocol initialization failed: {reason}")]
    InitializationFailed { reason: String },

    /// A response could not be interpreted for its method
    #[error("Invalid response for '{method}': {reason}")]
    InvalidResponse { method: String, reason: String },

    /// Protocol state violation
    #[error("Protocol state violation: {reason}")]
    StateViolation { reason: String },
}

/// Authentication and credential errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum AuthError {
    /// No stored credential for the server
    #[error("No credentials stored for {server}")]
    MissingCredentials { server: String },

    /// None of the well-known discovery paths produced a token endpoint
    #[error("Token endpoint discovery failed for {url}: {reason}")]
    DiscoveryFailed { url: String, reason: String },

    /// Token endpoint rejected the refresh
    #[error("Token refresh failed ({status}): {reason}")]
    RefreshFailed { status: u16, reason: String },

    /// Credential store could not be read or written
    #[error("Credential store error: {reason}")]
    Store { reason: String },
}

/// Configuration-related errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Configuration file has invalid format
    #[error("Invalid configuration format in {path}: {reason}")]
    InvalidFormat { path: String, reason: String },

    /// Required configuration parameter is missing
    #[error("Missing required configuration parameter: {parameter}")]
    MissingParameter { parameter: String },

    /// Configuration parameter has invalid value
    #[error("Invalid value for parameter '{parameter}': {value} - {reason}")]
    InvalidValue {
        parameter: String,
        value: String,
        reason: String,
    },
}

/// Convenience type alias for Results using WireError.
pub type WireResult<T> = Result<T, WireError>;

impl WireError {
    /// Create a closed-connection error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }

    /// Create a timeout error for a request method.
    pub fn timeout(method: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            method: method.into(),
            timeout,
        }
    }

    /// Check if this error is worth retrying.
    ///
    /// Timeouts, lost or reset connections, network failures, HTTP 5xx and
    /// HTTP 429 are retryable. Authentication, approval, validation,
    /// configuration and protocol failures never are. Remote errors are
    /// passed through and left to a custom predicate.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use agentwire_core::error::{WireError, AuthError};
    /// use std::time::Duration;
    ///
    /// assert!(WireError::timeout("tools/call", Duration::from_secs(5)).is_retryable());
    ///
    /// let auth = WireError::Auth(AuthError::MissingCredentials { server: "docs".into() });
    /// assert!(!auth.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            WireError::Transport(err) => err.is_retryable(),
            WireError::Timeout { .. } => true,
            WireError::Io { .. } => true,
            WireError::Remote(_) => false,
            WireError::Protocol(_) => false,
            WireError::NotReady => false,
            WireError::Closed { .. } => false,
            WireError::ApprovalDenied { .. } => false,
            WireError::Auth(_) => false,
            WireError::Config(_) => false,
            WireError::Serialization { .. } => false,
        }
    }

    /// Server-supplied delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            WireError::Transport(TransportError::HttpError { retry_after, .. }) => *retry_after,
            WireError::Remote(error) => error
                .data
                .as_ref()
                .and_then(|data| data.get("retryAfterMs"))
                .and_then(serde_json::Value::as_u64)
                .map(Duration::from_millis),
            _ => None,
        }
    }

    /// Whether the server reported that the method does not exist.
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, WireError::Remote(error) if error.is_method_not_found())
    }

    /// Get the error category for this error.
    ///
    /// Used as the `error` field of failure telemetry.
    pub fn category(&self) -> &'static str {
        match self {
            WireError::Transport(_) => "transport",
            WireError::Protocol(_) => "protocol",
            WireError::Remote(_) => "remote",
            WireError::Timeout { .. } => "timeout",
            WireError::NotReady => "not_ready",
            WireError::Closed { .. } => "closed",
            WireError::ApprovalDenied { .. } => "approval_denied",
            WireError::Auth(_) => "auth",
            WireError::Config(_) => "config",
            WireError::Serialization { .. } => "serialization",
            WireError::Io { .. } => "io",
        }
    }
}

impl TransportError {
    /// Check if this transport error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::ConnectionLost { .. } => true,
            TransportError::ConnectionReset { .. } => true,
            TransportError::NetworkError { .. } => true,
            TransportError::SendFailed { .. } => true,
            TransportError::HttpError { status_code, .. } => {
                *status_code == 429 || *status_code >= 500
            }
            TransportError::SpawnFailed { .. } => false,
            TransportError::NotConnected { .. } => false,
        }
    }
}

impl From<serde_json::Error> for WireError {
    fn from(err: serde_json::Error) -> Self {
        WireError::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for WireError {
    fn from(err: std::io::Error) -> Self {
        WireError::Io {
            reason: err.to_string(),
        }
    }
}

impl From<url::ParseError> for WireError {
    fn from(err: url::ParseError) -> Self {
        WireError::Config(ConfigError::InvalidValue {
            parameter: "url".to_string(),
            value: err.to_string(),
            reason: "Invalid URL format".to_string(),
        })
    }
}

impl From<reqwest::Error> for WireError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            WireError::Transport(TransportError::HttpError {
                status_code: status.as_u16(),
                reason: err.to_string(),
                retry_after: None,
            })
        } else {
            WireError::Transport(TransportError::NetworkError {
                transport_type: "http".to_string(),
                reason: err.to_string(),
            })
        }
    }
}
