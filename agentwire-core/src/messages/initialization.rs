//! Handshake message types.
//!
//! The client opens every session with an `initialize` request, waits for the
//! server's result, then sends a bare `initialized` notification.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::core::empty_object;

/// MCP protocol version identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// MCP Protocol version 2024-11-05
    #[serde(rename = "2024-11-05")]
    V2024_11_05,

    /// MCP Protocol version 2025-03-26
    #[serde(rename = "2025-03-26")]
    V2025_03_26,

    /// Any other version string, kept for forward compatibility
    #[serde(untagged)]
    Custom(String),
}

impl ProtocolVersion {
    /// Get the string representation of the protocol version.
    pub fn as_str(&self) -> &str {
        match self {
            Self::V2024_11_05 => "2024-11-05",
            Self::V2025_03_26 => "2025-03-26",
            Self::Custom(version) => version,
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V2025_03_26
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implementation information for client or server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Name of the implementation
    pub name: String,

    /// Version of the implementation
    #[serde(default)]
    pub version: String,
}

impl Implementation {
    /// Create a new implementation info structure.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl Default for Implementation {
    fn default() -> Self {
        Self::new("agentwire", crate::VERSION)
    }
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version the client speaks
    pub protocol_version: ProtocolVersion,

    /// Client implementation details
    pub client_info: Implementation,

    /// Client capabilities, passed through as configured
    #[serde(default = "empty_object")]
    pub capabilities: Value,
}

/// Result of the `initialize` request.
///
/// Only the members both backends share are typed; everything else is kept
/// in `extra`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version chosen by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<ProtocolVersion>,

    /// Server implementation details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Implementation>,

    /// Server capabilities
    #[serde(default = "empty_object")]
    pub capabilities: Value,

    /// Usage instructions some servers provide
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Any other members of the result
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InitializeResult {
    /// Whether the server advertised a capability group (e.g. `"tools"`).
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities
            .get(name)
            .map_or(false, |value| !value.is_null())
    }

    /// Display name of the server, if it sent one.
    pub fn server_name(&self) -> Option<&str> {
        self.server_info.as_ref().map(|info| info.name.as_str())
    }
}
