//! MCP client facade.
//!
//! [`McpClient`] ties one [`Connection`] to the server it was configured for
//! and exposes the MCP operations on top of it: tool discovery with
//! qualified names, tool calls with approval and retry, and resource and
//! prompt listing.
//!
//! ```rust,no_run
//! use agentwire_core::client::McpClient;
//! use agentwire_core::connection::ClientConfig;
//! use agentwire_core::transport::{ServerConfig, TransportConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = ServerConfig::new("docs", TransportConfig::stdio("docs-server", &["--stdio"]));
//!     let client = McpClient::connect(&server, ClientConfig::default(), None).await?;
//!
//!     for tool in client.list_tools().await? {
//!         println!("{} -> {}", tool.name, tool.original_name);
//!     }
//!     let result = client.call_tool("search", json!({"query": "tokio"})).await?;
//!     println!("{}", result.text());
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::auth::CredentialManager;
use crate::connection::{ClientConfig, Connection, Subscription};
use crate::discovery::{self, ListToolsOptions, ToolDescriptor};
use crate::error::{ConfigError, ProtocolError, WireError, WireResult};
use crate::messages::{
    CallToolResult, InitializeResult, ListPromptsResult, ListResourcesResult, Prompt, Resource,
};
use crate::tool_call::{self, CallToolOptions};
use crate::transport::{ServerConfig, TransportFactory};

/// A page of a cursor-paginated listing.
trait Page: DeserializeOwned {
    type Item;

    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

impl Page for ListResourcesResult {
    type Item = Resource;

    fn into_parts(self) -> (Vec<Resource>, Option<String>) {
        (self.resources, self.next_cursor)
    }
}

impl Page for ListPromptsResult {
    type Item = Prompt;

    fn into_parts(self) -> (Vec<Prompt>, Option<String>) {
        (self.prompts, self.next_cursor)
    }
}

/// Client for one MCP server.
#[derive(Debug, Clone)]
pub struct McpClient {
    server: String,
    connection: Connection,
    call_options: CallToolOptions,
}

impl McpClient {
    /// Start the configured transport and perform the handshake.
    ///
    /// `credentials` is required for HTTP servers configured with OAuth.
    pub async fn connect(
        server: &ServerConfig,
        config: ClientConfig,
        credentials: Option<Arc<CredentialManager>>,
    ) -> WireResult<Self> {
        server.validate()?;
        info!(server = %server.name, transport = server.transport.transport_type(), "Connecting to MCP server");

        let (transport, events) =
            TransportFactory::start(&server.transport, &server.name, credentials).await?;
        let connection = Connection::connect(transport, events, config).await?;
        Ok(Self::from_connection(server.name.clone(), connection))
    }

    /// Wrap an existing, initialized connection.
    pub fn from_connection(server: impl Into<String>, connection: Connection) -> Self {
        let server = server.into();
        let call_options = CallToolOptions::default().with_server(server.clone());
        Self {
            server,
            connection,
            call_options,
        }
    }

    /// Replace the options used by [`McpClient::call_tool`].
    pub fn with_call_options(mut self, options: CallToolOptions) -> Self {
        self.call_options = options;
        if self.call_options.server.is_none() {
            self.call_options.server = Some(self.server.clone());
        }
        self
    }

    /// Server name this client was configured with.
    pub fn server_name(&self) -> &str {
        &self.server
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// The server's `initialize` result.
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.connection.server_info().await
    }

    /// Tools with names qualified by this server, served from cache when
    /// possible.
    pub async fn list_tools(&self) -> WireResult<Vec<ToolDescriptor>> {
        self.list_tools_with(ListToolsOptions::for_server(self.server.clone()))
            .await
    }

    /// Tools listed with explicit options.
    pub async fn list_tools_with(
        &self,
        options: ListToolsOptions,
    ) -> WireResult<Vec<ToolDescriptor>> {
        discovery::list_tools(&self.connection, &options).await
    }

    /// Call a tool by the name the server knows it by.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> WireResult<CallToolResult> {
        tool_call::call_tool(&self.connection, name, arguments, &self.call_options).await
    }

    /// Call a tool by the qualified name [`McpClient::list_tools`] exposed.
    pub async fn call_qualified_tool(
        &self,
        qualified_name: &str,
        arguments: Value,
    ) -> WireResult<CallToolResult> {
        let tools = self.list_tools().await?;
        let tool = tools
            .iter()
            .find(|tool| tool.name == qualified_name)
            .ok_or_else(|| ConfigError::InvalidValue {
                parameter: "tool".to_string(),
                value: qualified_name.to_string(),
                reason: format!("not exposed by server '{}'", self.server),
            })?;
        debug!(qualified = %qualified_name, tool = %tool.original_name, "Resolved qualified tool name");
        self.call_tool(&tool.original_name, arguments).await
    }

    /// Every resource the server exposes.
    pub async fn list_resources(&self) -> WireResult<Vec<Resource>> {
        self.collect_pages::<ListResourcesResult>("resources/list")
            .await
    }

    /// Every prompt the server exposes.
    pub async fn list_prompts(&self) -> WireResult<Vec<Prompt>> {
        self.collect_pages::<ListPromptsResult>("prompts/list").await
    }

    /// Subscribe to server notifications and requests.
    pub async fn subscribe(&self) -> WireResult<Subscription> {
        self.connection.subscribe().await
    }

    /// Close the connection.
    pub async fn disconnect(&self) -> WireResult<()> {
        info!(server = %self.server, "Disconnecting from MCP server");
        self.connection.disconnect().await
    }

    async fn collect_pages<P: Page>(&self, method: &str) -> WireResult<Vec<P::Item>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let raw = self.connection.request(method, Some(params), None).await?;
            let page: P = serde_json::from_value(raw).map_err(|e| {
                WireError::from(ProtocolError::InvalidResponse {
                    method: method.to_string(),
                    reason: e.to_string(),
                })
            })?;

            let (page_items, next) = page.into_parts();
            items.extend(page_items);
            match next.filter(|next| !next.is_empty()) {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }

        Ok(items)
    }
}
