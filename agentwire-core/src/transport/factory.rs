//! Transport factory for starting transport instances.

use std::sync::Arc;

use super::{AuthConfig, EventReceiver, Transport, TransportConfig};
use crate::auth::CredentialManager;
use crate::error::{ConfigError, WireResult};

#[cfg(feature = "stdio")]
use super::stdio::StdioTransport;

#[cfg(feature = "http")]
use super::http::{BearerSource, HttpTransport};

/// Factory for starting transports from configuration.
///
/// # Examples
///
/// ```rust,no_run
/// use agentwire_core::transport::{TransportFactory, TransportConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = TransportConfig::stdio("python", &["server.py"]);
///     let (transport, _events) = TransportFactory::start(&config, "local", None).await?;
///     println!("Started transport: {}", transport.get_info().transport_type);
///     Ok(())
/// }
/// ```
pub struct TransportFactory;

impl TransportFactory {
    /// Validate `config` and start the matching transport.
    ///
    /// `server_name` keys stored credentials; `credentials` is required when
    /// the HTTP transport is configured with OAuth.
    pub async fn start(
        config: &TransportConfig,
        server_name: &str,
        credentials: Option<Arc<CredentialManager>>,
    ) -> WireResult<(Box<dyn Transport>, EventReceiver)> {
        config.validate()?;

        match config {
            #[cfg(feature = "stdio")]
            TransportConfig::Stdio(stdio) => {
                let (transport, events) = StdioTransport::spawn(stdio.clone()).await?;
                Ok((Box::new(transport), events))
            }

            #[cfg(not(feature = "stdio"))]
            TransportConfig::Stdio(_) => Err(not_compiled_in("stdio")),

            #[cfg(feature = "http")]
            TransportConfig::Http(http) => {
                let bearer = match &http.auth {
                    None => None,
                    Some(AuthConfig::Bearer { token }) => Some(BearerSource::Static(token.clone())),
                    Some(AuthConfig::OAuth { .. }) => {
                        let manager = credentials.ok_or_else(|| ConfigError::MissingParameter {
                            parameter: "credentials".to_string(),
                        })?;
                        Some(BearerSource::Managed(manager))
                    }
                };

                let (transport, events) = HttpTransport::start(http.clone(), server_name, bearer)?;
                Ok((Box::new(transport), events))
            }

            #[cfg(not(feature = "http"))]
            TransportConfig::Http(_) => Err(not_compiled_in("http")),
        }
    }

    /// Transport types supported by this build.
    pub fn supported_transports() -> Vec<&'static str> {
        vec![
            #[cfg(feature = "stdio")]
            "stdio",
            #[cfg(feature = "http")]
            "http",
        ]
    }
}

#[allow(dead_code)]
fn not_compiled_in(transport_type: &str) -> crate::error::WireError {
    ConfigError::InvalidValue {
        parameter: "transport_type".to_string(),
        value: transport_type.to_string(),
        reason: format!(
            "{} transport support not compiled in (enable '{}' feature)",
            transport_type, transport_type
        ),
    }
    .into()
}
