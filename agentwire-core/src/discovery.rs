//! Tool discovery and name qualification.
//!
//! Tools from several servers share one namespace on the model side, so each
//! name is qualified as `mcp__<server>__<tool>`. Qualified names longer than
//! [`MAX_TOOL_NAME_LEN`] are shortened to a prefix plus the SHA-1 of the full
//! name, which keeps them unique and exactly 64 characters long.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{ProtocolError, WireError, WireResult};
use crate::messages::{ListToolsResult, Tool};

/// Longest tool name accepted downstream.
pub const MAX_TOOL_NAME_LEN: usize = 64;

const QUALIFIED_PREFIX: &str = "mcp__";
const DELIMITER: &str = "__";
const SHA1_HEX_LEN: usize = 40;

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Qualify `tool` with its server: `mcp__<server>__<tool>`.
///
/// Both segments are reduced to `[A-Za-z0-9_-]`. Names longer than 64
/// characters keep their first 24 characters followed by the lower-case hex
/// SHA-1 of the unsanitized qualified name.
///
/// ```rust
/// use agentwire_core::discovery::qualify_tool_name;
///
/// assert_eq!(qualify_tool_name("docs", "search"), "mcp__docs__search");
/// assert_eq!(qualify_tool_name("my server", "get.page"), "mcp__my_server__get_page");
/// ```
pub fn qualify_tool_name(server: &str, tool: &str) -> String {
    let qualified = format!(
        "{}{}{}{}",
        QUALIFIED_PREFIX,
        sanitize(server),
        DELIMITER,
        sanitize(tool)
    );
    if qualified.len() <= MAX_TOOL_NAME_LEN {
        return qualified;
    }

    // Hash the raw name so tools that sanitize alike still differ.
    let raw = format!("{}{}{}{}", QUALIFIED_PREFIX, server, DELIMITER, tool);
    let digest = Sha1::digest(raw.as_bytes());
    let hex: String = digest.iter().map(|byte| format!("{:02x}", byte)).collect();
    format!("{}{}", &qualified[..MAX_TOOL_NAME_LEN - SHA1_HEX_LEN], hex)
}

/// Split a qualified name back into `(server, tool)`.
///
/// Returns `None` for names without the `mcp__` prefix or delimiter.
/// Shortened names cannot be recovered and yield whatever the prefix holds.
pub fn parse_qualified_name(name: &str) -> Option<(String, String)> {
    let rest = name.strip_prefix(QUALIFIED_PREFIX)?;
    let (server, tool) = rest.split_once(DELIMITER)?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server.to_string(), tool.to_string()))
}

/// Selects which raw tools are exposed.
#[derive(Clone, Default)]
pub struct ToolFilter {
    /// When set, only these raw names pass
    pub allow: Option<Vec<String>>,
    /// Raw names that never pass
    pub deny: Vec<String>,
    /// Extra test applied after the lists
    pub predicate: Option<Arc<dyn Fn(&Tool) -> bool + Send + Sync>>,
}

impl fmt::Debug for ToolFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolFilter")
            .field("allow", &self.allow)
            .field("deny", &self.deny)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl ToolFilter {
    /// Only allow the named tools.
    pub fn allow<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Never allow the named tools.
    pub fn deny<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deny.extend(names.into_iter().map(Into::into));
        self
    }

    /// Add a custom test.
    pub fn with_predicate(mut self, predicate: impl Fn(&Tool) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Whether `tool` passes every configured test.
    pub fn matches(&self, tool: &Tool) -> bool {
        if let Some(allow) = &self.allow {
            if !allow.iter().any(|name| *name == tool.name) {
                return false;
            }
        }
        if self.deny.iter().any(|name| *name == tool.name) {
            return false;
        }
        self.predicate
            .as_ref()
            .map_or(true, |predicate| predicate(tool))
    }
}

/// Options for [`list_tools`].
#[derive(Debug, Clone)]
pub struct ListToolsOptions {
    /// Serve from the connection's cache when it holds a list
    pub cache: bool,
    /// Qualify names with this server name
    pub server: Option<String>,
    /// Which tools to keep
    pub filter: ToolFilter,
    /// Timeout for each `tools/list` page
    pub timeout: Option<Duration>,
}

impl Default for ListToolsOptions {
    fn default() -> Self {
        Self {
            cache: true,
            server: None,
            filter: ToolFilter::default(),
            timeout: None,
        }
    }
}

impl ListToolsOptions {
    /// Qualify names with `server`.
    pub fn for_server(server: impl Into<String>) -> Self {
        Self {
            server: Some(server.into()),
            ..Self::default()
        }
    }

    /// Bypass the cache.
    pub fn fresh(mut self) -> Self {
        self.cache = false;
        self
    }

    /// Set the filter.
    pub fn with_filter(mut self, filter: ToolFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// A tool as exposed to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Exposed name: qualified when a server was given, raw otherwise
    pub name: String,
    /// Name the server knows the tool by
    pub original_name: String,
    /// Server the tool belongs to
    pub server: Option<String>,
    /// Human-readable description
    pub description: Option<String>,
    /// JSON Schema of the arguments
    pub input_schema: Value,
}

impl ToolDescriptor {
    fn from_tool(tool: Tool, server: Option<&str>) -> Self {
        let name = match server {
            Some(server) => qualify_tool_name(server, &tool.name),
            None => tool.name.clone(),
        };
        Self {
            name,
            original_name: tool.name,
            server: server.map(str::to_string),
            description: tool.description,
            input_schema: tool.input_schema,
        }
    }
}

/// List the server's tools.
///
/// Uses the connection's cached list unless `options.cache` is false or no
/// list is cached; a fresh fetch follows `nextCursor` to the end and replaces
/// the cache. Filters are applied on every call. When two tools end up with
/// the same exposed name the first one wins.
pub async fn list_tools(
    connection: &Connection,
    options: &ListToolsOptions,
) -> WireResult<Vec<ToolDescriptor>> {
    let cached = if options.cache {
        connection.cached_tools().await
    } else {
        None
    };

    let tools = match cached {
        Some(tools) => {
            debug!(count = tools.len(), "Using cached tool list");
            tools
        }
        None => {
            let tools = fetch_all(connection, options.timeout).await?;
            connection.store_tools(tools.clone()).await;
            tools
        }
    };

    let mut seen = HashSet::new();
    let mut descriptors = Vec::new();
    for tool in tools.into_iter().filter(|tool| options.filter.matches(tool)) {
        let descriptor = ToolDescriptor::from_tool(tool, options.server.as_deref());
        if seen.insert(descriptor.name.clone()) {
            descriptors.push(descriptor);
        } else {
            debug!(name = %descriptor.name, "Dropping duplicate tool name");
        }
    }
    Ok(descriptors)
}

async fn fetch_all(connection: &Connection, timeout: Option<Duration>) -> WireResult<Vec<Tool>> {
    let mut tools = Vec::new();
    let mut cursors = HashSet::new();
    let mut cursor: Option<String> = None;

    loop {
        let params = match &cursor {
            Some(cursor) => json!({ "cursor": cursor }),
            None => json!({}),
        };
        let raw = connection.request("tools/list", Some(params), timeout).await?;
        let page: ListToolsResult = serde_json::from_value(raw).map_err(|e| {
            WireError::from(ProtocolError::InvalidResponse {
                method: "tools/list".to_string(),
                reason: e.to_string(),
            })
        })?;

        debug!(count = page.tools.len(), "Received tool page");
        tools.extend(page.tools);

        match page.next_cursor.filter(|next| !next.is_empty()) {
            Some(next) if cursors.insert(next.clone()) => cursor = Some(next),
            Some(next) => {
                warn!(cursor = %next, "Server repeated a pagination cursor, stopping");
                break;
            }
            None => break,
        }
    }

    Ok(tools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_qualify_short_names() {
        assert_eq!(qualify_tool_name("docs", "search"), "mcp__docs__search");
        assert_eq!(
            qualify_tool_name("git hub", "issues/list"),
            "mcp__git_hub__issues_list"
        );
    }

    #[test]
    fn test_long_names_are_exactly_64_chars() {
        let tool = "x".repeat(100);
        let first = qualify_tool_name("server", &format!("{}a", tool));
        let second = qualify_tool_name("server", &format!("{}b", tool));

        assert_eq!(first.len(), MAX_TOOL_NAME_LEN);
        assert_eq!(second.len(), MAX_TOOL_NAME_LEN);
        assert_ne!(first, second);
        assert!(first.starts_with("mcp__server__xxxxxxxxxxx"));
        assert!(first[24..]
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_long_names_that_sanitize_alike_stay_distinct() {
        let stem = "y".repeat(80);
        let dotted = qualify_tool_name("srv", &format!("{}.a", stem));
        let underscored = qualify_tool_name("srv", &format!("{}_a", stem));

        assert_eq!(dotted.len(), MAX_TOOL_NAME_LEN);
        assert_eq!(dotted[..24], underscored[..24]);
        assert_ne!(dotted, underscored);
    }

    #[test]
    fn test_many_long_names_never_collide() {
        let mut rng = rand::thread_rng();
        let mut seen = HashSet::new();
        for index in 0..5000 {
            let len = rng.gen_range(60..120);
            let tool: String = (0..len)
                .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
                .collect();
            let qualified = qualify_tool_name("server", &format!("{}{}", tool, index));

            assert_eq!(qualified.len(), MAX_TOOL_NAME_LEN);
            assert!(seen.insert(qualified), "collision at name {}", index);
        }
    }

    #[test]
    fn test_boundary_length_is_kept() {
        let tool = "t".repeat(MAX_TOOL_NAME_LEN - "mcp__s__".len());
        let qualified = qualify_tool_name("s", &tool);
        assert_eq!(qualified.len(), MAX_TOOL_NAME_LEN);
        assert!(qualified.ends_with("tttt"));
    }

    #[test]
    fn test_parse_qualified_name() {
        assert_eq!(
            parse_qualified_name("mcp__docs__search_pages"),
            Some(("docs".to_string(), "search_pages".to_string()))
        );
        assert_eq!(parse_qualified_name("search"), None);
        assert_eq!(parse_qualified_name("mcp__docs"), None);
    }

    #[test]
    fn test_filter() {
        let filter = ToolFilter::default()
            .allow(["search", "fetch", "delete"])
            .deny(["delete"])
            .with_predicate(|tool| tool.description.is_some());

        assert!(filter.matches(&Tool::new("search").with_description("Search")));
        assert!(!filter.matches(&Tool::new("fetch")));
        assert!(!filter.matches(&Tool::new("delete").with_description("Delete")));
        assert!(!filter.matches(&Tool::new("other").with_description("Other")));
        assert!(ToolFilter::default().matches(&Tool::new("anything")));
    }
}
