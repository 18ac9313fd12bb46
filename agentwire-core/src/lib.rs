//! # agentwire core
//!
//! `agentwire-core` is a client-side engine for line-delimited JSON-RPC
//! backends: locally spawned app-server subprocesses and MCP tool servers
//! reached over stdio or streamable HTTP.
//!
//! ## Features
//!
//! - **Line codec**: chunk-boundary independent framing of newline-delimited JSON
//! - **Transports**: subprocess stdio and MCP streamable HTTP behind one trait
//! - **Connection multiplexer**: many concurrent requests over one transport,
//!   per-request deadlines, ordered delivery of server notifications
//! - **Retry/backoff**: exponential, linear, constant or custom schedules with jitter
//! - **Tool calls**: approval gating, per-attempt timeouts and call telemetry
//! - **Tool discovery**: paginated listing, filters and collision-safe qualified names
//! - **Credentials**: OAuth refresh-token renewal with well-known endpoint discovery
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agentwire_core::{ClientConfig, McpClient, ServerConfig, TransportConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = ServerConfig::new("files", TransportConfig::stdio("files-server", &["--root", "."]));
//!     let client = McpClient::connect(&server, ClientConfig::default(), None).await?;
//!
//!     let tools = client.list_tools().await?;
//!     println!("{} tools", tools.len());
//!
//!     let result = client.call_tool("read_file", json!({"path": "README.md"})).await?;
//!     println!("{}", result.text());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`codec`]: encoding and line splitting
//! - [`transport`]: stdio and HTTP transports emitting [`transport::TransportEvent`]s
//! - [`connection`]: the single-owner worker that correlates requests and responses
//! - [`retry`], [`telemetry`], [`tool_call`]: the tool invocation pipeline
//! - [`discovery`]: tool listing and name qualification
//! - [`auth`]: credential storage and refresh
//! - [`client`], [`app_server`]: facades for the two backend kinds
//!
//! The library logs through `tracing` and never installs a subscriber.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::uninlined_format_args)]

pub mod app_server;
pub mod auth;
pub mod client;
pub mod codec;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod messages;
pub mod retry;
pub mod telemetry;
pub mod tool_call;
pub mod transport;

pub use app_server::{AppServerClient, ReviewDecision};
pub use auth::{CredentialManager, CredentialStore, FileCredentialStore, StoredCredential};
pub use client::McpClient;
pub use connection::{ClientConfig, Connection, ConnectionState, Dialect, Subscription};
pub use discovery::{list_tools, qualify_tool_name, ListToolsOptions, ToolDescriptor, ToolFilter};
pub use error::{WireError, WireResult};
pub use messages::{
    Implementation, InitializeResult, JsonRpcError, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ProtocolVersion, RequestId, ServerMessage,
    ServerNotification,
};
pub use retry::{with_retry, BackoffPolicy, BackoffStrategy, RetryPredicate};
pub use telemetry::{TelemetryEvent, TelemetrySink, TracingTelemetry};
pub use tool_call::{call_tool, ApprovalDecision, ApprovalHook, CallToolOptions};
pub use transport::{ServerConfig, Transport, TransportConfig, TransportFactory, TransportInfo};

/// Current version of the agentwire-core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP protocol version requested by default
pub const PROTOCOL_VERSION: &str = "2025-03-26";
