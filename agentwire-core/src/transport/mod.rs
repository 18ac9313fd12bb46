//! Transport layer: moving lines of bytes to and from a server.
//!
//! A transport knows nothing about JSON-RPC correlation. It accepts encoded
//! lines through [`Transport::send`] and reports everything that happens on the
//! other side as [`TransportEvent`]s on an unbounded channel handed out when
//! the transport starts:
//!
//! - **stdio**: spawns a local process and speaks over stdin/stdout
//! - **http**: POSTs each line to a streamable-HTTP MCP endpoint
//!
//! Events arrive in delivery order, and every `Line` a process wrote is
//! delivered before its `Exit`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use agentwire_core::transport::{TransportConfig, TransportEvent, TransportFactory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TransportConfig::stdio("codex", &["app-server"]);
//!     let (mut transport, mut events) = TransportFactory::start(&config, "codex", None).await?;
//!
//!     transport.send("{\"id\":0,\"method\":\"initialize\",\"params\":{}}\n".into()).await?;
//!     while let Some(event) = events.recv().await {
//!         if let TransportEvent::Line(line) = event {
//!             println!("received: {line}");
//!             break;
//!         }
//!     }
//!
//!     transport.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod factory;

#[cfg(feature = "stdio")]
pub mod stdio;

#[cfg(feature = "http")]
pub mod http;

pub use config::*;
pub use factory::*;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{WireError, WireResult};
use crate::messages::RequestId;

/// Byte-level connection to a server.
///
/// Implementations are owned by a single connection worker, so methods take
/// `&mut self`.
#[async_trait]
pub trait Transport: Send {
    /// Send one encoded line (including its trailing newline).
    ///
    /// Fails fast with `NotConnected` once the transport has exited or been
    /// stopped.
    async fn send(&mut self, line: Bytes) -> WireResult<()>;

    /// Shut the transport down gracefully, escalating to a forced kill after
    /// a grace period. Calling it again is a no-op.
    async fn stop(&mut self) -> WireResult<()>;

    /// Whether the transport can still carry traffic.
    fn is_connected(&self) -> bool;

    /// Get transport-specific metadata and statistics.
    fn get_info(&self) -> TransportInfo;
}

#[cfg(test)]
impl std::fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Something that happened on the server side of a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One complete line of output, without its terminator
    Line(String),

    /// Diagnostic output (stdio stderr)
    Stderr(Bytes),

    /// An HTTP exchange for the message with this id failed before producing
    /// a response line
    RequestFailed {
        /// Id of the failed request, `None` for notifications and responses
        id: Option<RequestId>,
        /// What went wrong
        error: WireError,
    },

    /// The transport is gone; no further events follow
    Exit(ExitReason),
}

/// Why a transport ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The process exited on its own
    Exited {
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
    },

    /// `stop` was called
    Stopped,

    /// The transport failed (I/O error, wait failure, ...)
    Failed {
        /// Rendered failure
        reason: String,
    },
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited { code: Some(code) } => write!(f, "process exited with status {}", code),
            Self::Exited { code: None } => write!(f, "process terminated by signal"),
            Self::Stopped => write!(f, "transport stopped"),
            Self::Failed { reason } => write!(f, "transport failed: {}", reason),
        }
    }
}

/// Sending half of a transport's event channel.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half of a transport's event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Transport information and statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TransportInfo {
    /// Type of transport (stdio, http)
    pub transport_type: String,

    /// Whether the transport is currently connected
    pub connected: bool,

    /// Connection establishment time (if connected)
    pub connected_since: Option<SystemTime>,

    /// Number of lines sent
    pub lines_sent: u64,

    /// Number of bytes sent
    pub bytes_sent: u64,

    /// Number of lines received
    pub lines_received: u64,

    /// Number of errors encountered
    pub errors: u64,

    /// Transport-specific metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TransportInfo {
    /// Create a new transport info structure.
    pub fn new(transport_type: impl Into<String>) -> Self {
        Self {
            transport_type: transport_type.into(),
            connected: false,
            connected_since: None,
            lines_sent: 0,
            bytes_sent: 0,
            lines_received: 0,
            errors: 0,
            metadata: HashMap::new(),
        }
    }

    /// Mark the transport as connected.
    pub fn mark_connected(&mut self) {
        self.connected = true;
        self.connected_since = Some(SystemTime::now());
    }

    /// Mark the transport as disconnected.
    pub fn mark_disconnected(&mut self) {
        self.connected = false;
        self.connected_since = None;
    }

    /// Add transport-specific metadata.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Get the duration since connection was established.
    pub fn connection_duration(&self) -> Option<Duration> {
        self.connected_since
            .map(|since| SystemTime::now().duration_since(since).unwrap_or_default())
    }
}

/// Traffic counters shared between a transport and its I/O tasks.
#[derive(Debug, Default)]
pub struct TransportStats {
    lines_sent: AtomicU64,
    bytes_sent: AtomicU64,
    lines_received: AtomicU64,
    errors: AtomicU64,
}

impl TransportStats {
    /// Record an outbound line.
    pub fn record_sent(&self, bytes: usize) {
        self.lines_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record an inbound line.
    pub fn record_received(&self) {
        self.lines_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters into `info`.
    pub fn fill(&self, info: &mut TransportInfo) {
        info.lines_sent = self.lines_sent.load(Ordering::Relaxed);
        info.bytes_sent = self.bytes_sent.load(Ordering::Relaxed);
        info.lines_received = self.lines_received.load(Ordering::Relaxed);
        info.errors = self.errors.load(Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_info_creation() {
        let mut info = TransportInfo::new("test");
        assert_eq!(info.transport_type, "test");
        assert!(!info.connected);
        assert_eq!(info.lines_sent, 0);

        info.mark_connected();
        assert!(info.connected);
        assert!(info.connected_since.is_some());
    }

    #[test]
    fn test_stats_fill() {
        let stats = TransportStats::default();
        stats.record_sent(10);
        stats.record_sent(5);
        stats.record_received();
        stats.record_error();

        let mut info = TransportInfo::new("test");
        stats.fill(&mut info);
        assert_eq!(info.lines_sent, 2);
        assert_eq!(info.bytes_sent, 15);
        assert_eq!(info.lines_received, 1);
        assert_eq!(info.errors, 1);
    }

    #[test]
    fn test_connection_duration() {
        let mut info = TransportInfo::new("test");
        assert!(info.connection_duration().is_none());

        info.mark_connected();
        assert!(info.connection_duration().is_some());

        info.mark_disconnected();
        assert!(info.connection_duration().is_none());
    }

    #[test]
    fn test_exit_reason_display() {
        assert_eq!(
            ExitReason::Exited { code: Some(2) }.to_string(),
            "process exited with status 2"
        );
        assert_eq!(ExitReason::Stopped.to_string(), "transport stopped");
    }
}
