//! Transport configuration.
//!
//! Configurations can be built programmatically or loaded from JSON, YAML or
//! TOML files. Durations are written in human-readable form (`"30s"`).
//!
//! # Examples
//!
//! ```rust
//! use agentwire_core::transport::{TransportConfig, StdioConfig, HttpConfig, AuthConfig};
//! use std::time::Duration;
//!
//! // Spawn the app-server as a subprocess
//! let stdio = TransportConfig::Stdio(
//!     StdioConfig::new("codex").arg("app-server").timeout(Duration::from_secs(30)),
//! );
//!
//! // Remote tool server with OAuth-managed credentials
//! let http = TransportConfig::Http(
//!     HttpConfig::new("https://mcp.example.com/mcp".parse().unwrap())
//!         .auth(AuthConfig::oauth(None)),
//! );
//!
//! assert_eq!(stdio.transport_type(), "stdio");
//! assert_eq!(http.transport_type(), "http");
//! ```

use crate::error::{ConfigError, WireResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

fn default_stdio_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Transport configuration for either backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Local process speaking newline-delimited JSON on stdin/stdout
    Stdio(StdioConfig),

    /// Remote MCP server over streamable HTTP
    Http(HttpConfig),
}

impl TransportConfig {
    /// Create a new stdio transport configuration.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use agentwire_core::transport::TransportConfig;
    ///
    /// let config = TransportConfig::stdio("python", &["server.py"]);
    /// ```
    pub fn stdio(command: impl Into<String>, args: &[impl ToString]) -> Self {
        Self::Stdio(StdioConfig::new(command).args(args.iter().map(|s| s.to_string())))
    }

    /// Create a new HTTP transport configuration.
    pub fn http(url: impl AsRef<str>) -> WireResult<Self> {
        let url = url.as_ref().parse().map_err(|e| ConfigError::InvalidValue {
            parameter: "url".to_string(),
            value: url.as_ref().to_string(),
            reason: format!("Invalid URL: {}", e),
        })?;

        Ok(Self::Http(HttpConfig::new(url)))
    }

    /// Get a human-readable name for this transport type.
    pub fn transport_type(&self) -> &'static str {
        match self {
            Self::Stdio(_) => "stdio",
            Self::Http(_) => "http",
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> WireResult<()> {
        match self {
            Self::Stdio(config) => config.validate(),
            Self::Http(config) => config.validate(),
        }
    }

    /// Load configuration from a file.
    ///
    /// The format follows the file extension: `.json`, `.yaml`/`.yml` or `.toml`.
    pub fn from_file(path: impl AsRef<Path>) -> WireResult<Self> {
        let config: Self = load_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }
}

/// A named server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server name, used to qualify tool names and key stored credentials
    pub name: String,

    /// How to reach the server
    pub transport: TransportConfig,
}

impl ServerConfig {
    /// Create a new server entry.
    pub fn new(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            transport,
        }
    }

    /// Validate the entry.
    pub fn validate(&self) -> WireResult<()> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingParameter {
                parameter: "name".to_string(),
            }
            .into());
        }
        self.transport.validate()
    }

    /// Load a server entry from a JSON, YAML or TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> WireResult<Self> {
        let config: Self = load_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }
}

fn load_file<T>(path: &Path) -> WireResult<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = std::fs::read_to_string(path).map_err(|_e| ConfigError::FileNotFound {
        path: path.display().to_string(),
    })?;

    let invalid = |reason: String| ConfigError::InvalidFormat {
        path: path.display().to_string(),
        reason,
    };

    let config = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?,
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&content).map_err(|e| invalid(e.to_string()))?
        }
        Some("toml") => toml::from_str(&content).map_err(|e| invalid(e.to_string()))?,
        _ => {
            return Err(invalid(
                "Unsupported file format. Use .json, .yaml, or .toml".to_string(),
            )
            .into())
        }
    };

    Ok(config)
}

/// Configuration for the stdio (local process) transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioConfig {
    /// Command to execute (e.g., "codex", "/usr/bin/node")
    pub command: String,

    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the process
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Default request timeout for servers reached through this transport
    #[serde(with = "humantime_serde", default = "default_stdio_timeout")]
    pub timeout: Duration,

    /// How long to wait after closing stdin before killing the process
    #[serde(with = "humantime_serde", default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,

    /// Environment variables to set for the process
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

impl StdioConfig {
    /// Create a new stdio configuration.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            timeout: default_stdio_timeout(),
            shutdown_grace: default_shutdown_grace(),
            environment: HashMap::new(),
        }
    }

    /// Add an argument to the command.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments to the command.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the shutdown grace period.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Validate the stdio configuration.
    pub fn validate(&self) -> WireResult<()> {
        if self.command.is_empty() {
            return Err(ConfigError::MissingParameter {
                parameter: "command".to_string(),
            }
            .into());
        }

        if let Some(ref dir) = self.working_dir {
            if !PathBuf::from(dir).exists() {
                return Err(ConfigError::InvalidValue {
                    parameter: "working_dir".to_string(),
                    value: dir.clone(),
                    reason: "Directory does not exist".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}

/// Configuration for the streamable HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Endpoint every message is POSTed to
    pub url: Url,

    /// Timeout for a single HTTP exchange
    #[serde(with = "humantime_serde", default = "default_http_timeout")]
    pub timeout: Duration,

    /// Additional HTTP headers to include
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Authentication configuration
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

impl HttpConfig {
    /// Create a new HTTP configuration.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            timeout: default_http_timeout(),
            headers: HashMap::new(),
            auth: None,
        }
    }

    /// Set the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add an HTTP header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set authentication configuration.
    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Validate the HTTP configuration.
    pub fn validate(&self) -> WireResult<()> {
        if self.url.scheme() != "http" && self.url.scheme() != "https" {
            return Err(ConfigError::InvalidValue {
                parameter: "url".to_string(),
                value: self.url.to_string(),
                reason: "URL must use http or https scheme".to_string(),
            }
            .into());
        }

        if let Some(ref auth) = self.auth {
            auth.validate()?;
        }

        Ok(())
    }
}

/// Authentication for the HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum AuthConfig {
    /// Static bearer token
    Bearer { token: String },

    /// Token obtained through a prior OAuth login and kept in a credential
    /// store; refreshed automatically before it expires
    #[serde(rename = "oauth")]
    OAuth {
        #[serde(default)]
        client_id: Option<String>,
    },
}

impl AuthConfig {
    /// Create a new bearer token authentication configuration.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    /// Create a new OAuth authentication configuration.
    pub fn oauth(client_id: Option<String>) -> Self {
        Self::OAuth { client_id }
    }

    /// Validate the authentication configuration.
    pub fn validate(&self) -> WireResult<()> {
        match self {
            Self::Bearer { token } if token.is_empty() => Err(ConfigError::InvalidValue {
                parameter: "auth".to_string(),
                value: "bearer".to_string(),
                reason: "Token cannot be empty".to_string(),
            }
            .into()),
            Self::OAuth {
                client_id: Some(client_id),
            } if client_id.is_empty() => Err(ConfigError::InvalidValue {
                parameter: "auth".to_string(),
                value: "oauth".to_string(),
                reason: "Client ID cannot be empty".to_string(),
            }
            .into()),
            _ => Ok(()),
        }
    }
}
