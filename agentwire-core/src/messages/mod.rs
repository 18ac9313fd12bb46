//! Message types spoken by both backends.
//!
//! # Message Categories
//!
//! - **Core Messages**: JSON-RPC request/response/notification structures
//! - **Initialization**: the `initialize` handshake
//! - **Tools**: `tools/list` and `tools/call`
//! - **Resources** and **Prompts**: list results
//! - **Notifications**: server-initiated traffic handed to subscribers
//!
//! # Examples
//!
//! ```rust
//! use agentwire_core::messages::{Implementation, InitializeParams, JsonRpcRequest, ProtocolVersion};
//! use serde_json::json;
//!
//! let params = InitializeParams {
//!     protocol_version: ProtocolVersion::V2025_03_26,
//!     client_info: Implementation::new("my-agent", "1.0.0"),
//!     capabilities: json!({}),
//! };
//!
//! let request = JsonRpcRequest::new(0, "initialize", serde_json::to_value(params).unwrap());
//! assert_eq!(request.method, "initialize");
//! ```

pub mod core;
pub mod initialization;
pub mod notifications;
pub mod prompts;
pub mod resources;
pub mod tools;

pub use self::core::*;
pub use initialization::*;
pub use notifications::{KnownNotification, ServerMessage, ServerNotification};
pub use prompts::{ListPromptsResult, Prompt, PromptArgument};
pub use resources::{ListResourcesResult, Resource};
pub use tools::{CallToolParams, CallToolResult, ListToolsParams, ListToolsResult, Tool};
