//! Proactive OAuth token refresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use url::Url;

use super::store::{store_key, CredentialStore, StoredCredential};
use crate::error::{AuthError, WireResult};

/// Default margin before expiry at which a token is refreshed.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(30);

/// Default limit for each metadata or token request, body included.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// One async mutex per key, created on first use.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Debug, Deserialize)]
struct AuthorizationServerMetadata {
    token_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
}

/// Well-known metadata URLs for `url`, in probing order, without duplicates.
pub fn discovery_urls(url: &Url) -> Vec<String> {
    let origin = url.origin().ascii_serialization();
    let path = url.path().trim_end_matches('/');

    let mut candidates = Vec::with_capacity(6);
    for document in ["oauth-authorization-server", "openid-configuration"] {
        for candidate in [
            format!("{}/.well-known/{}{}", origin, document, path),
            format!("{}{}/.well-known/{}", origin, path, document),
            format!("{}/.well-known/{}", origin, document),
        ] {
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
    }
    candidates
}

/// Loads credentials and keeps them fresh.
///
/// Refreshes are serialised per store key, so concurrent callers for the
/// same endpoint trigger at most one token exchange.
pub struct CredentialManager {
    store: Arc<dyn CredentialStore>,
    http: reqwest::Client,
    skew: Duration,
    timeout: Duration,
    locks: KeyedLocks,
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("skew", &self.skew)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CredentialManager {
    /// Create a manager over `store` with the default skew.
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            skew: DEFAULT_REFRESH_SKEW,
            timeout: DEFAULT_HTTP_TIMEOUT,
            locks: KeyedLocks::new(),
        }
    }

    /// Set the refresh skew.
    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    /// Set the limit for each discovery or token request.
    ///
    /// A refresh holds the per-key lock, so this also bounds how long other
    /// callers for the same endpoint wait.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a preconfigured HTTP client.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Current access token for a server endpoint, refreshed if close to
    /// expiry.
    pub async fn bearer_token(&self, server: &str, url: &str) -> WireResult<String> {
        let credential = self
            .store
            .load(server, url)
            .await?
            .ok_or_else(|| AuthError::MissingCredentials {
                server: server.to_string(),
            })?;
        Ok(self.refresh_if_needed(credential, url).await?.access_token)
    }

    /// Refresh `credential` when it expires within the skew.
    ///
    /// Returns it unchanged when it has no refresh token or expiry, or is
    /// still fresh. Otherwise discovers the token endpoint, exchanges the
    /// refresh token and persists the result before returning it.
    pub async fn refresh_if_needed(
        &self,
        credential: StoredCredential,
        url: &str,
    ) -> WireResult<StoredCredential> {
        if !credential.needs_refresh(Utc::now(), self.skew) {
            return Ok(credential);
        }

        let server = credential.server_name.clone();
        let _guard = self.locks.lock(&store_key(&server, url)).await;

        // Another caller may have refreshed while we waited.
        let credential = match self.store.load(&server, url).await? {
            Some(stored) if !stored.needs_refresh(Utc::now(), self.skew) => {
                debug!(server = %server, "Credential already refreshed");
                return Ok(stored);
            }
            Some(stored) => stored,
            None => credential,
        };

        let token_endpoint = self.discover_token_endpoint(url).await?;
        let refreshed = self.exchange(&token_endpoint, credential).await?;
        self.store.save(&server, url, &refreshed).await?;

        info!(server = %server, "Access token refreshed");
        Ok(refreshed)
    }

    /// Find the token endpoint advertised for `url`.
    ///
    /// Tries [`discovery_urls`] in order; the first document with a
    /// `token_endpoint` wins.
    pub async fn discover_token_endpoint(&self, url: &str) -> WireResult<String> {
        let parsed = Url::parse(url).map_err(|e| AuthError::DiscoveryFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        for candidate in discovery_urls(&parsed) {
            let response = match self
                .http
                .get(&candidate)
                .header(ACCEPT, "application/json")
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    debug!(url = %candidate, "Metadata request failed: {}", e);
                    continue;
                }
            };

            if !response.status().is_success() {
                debug!(url = %candidate, status = %response.status(), "No metadata");
                continue;
            }

            match response.json::<AuthorizationServerMetadata>().await {
                Ok(AuthorizationServerMetadata {
                    token_endpoint: Some(endpoint),
                }) => {
                    debug!(url = %candidate, token_endpoint = %endpoint, "Token endpoint discovered");
                    return Ok(endpoint);
                }
                Ok(_) => debug!(url = %candidate, "Metadata has no token_endpoint"),
                Err(e) => debug!(url = %candidate, "Unreadable metadata: {}", e),
            }
        }

        Err(AuthError::DiscoveryFailed {
            url: url.to_string(),
            reason: "no well-known metadata advertised a token endpoint".to_string(),
        }
        .into())
    }

    async fn exchange(
        &self,
        token_endpoint: &str,
        mut credential: StoredCredential,
    ) -> WireResult<StoredCredential> {
        let Some(refresh_token) = credential.refresh_token.clone() else {
            return Ok(credential);
        };

        // The serializer is not Send; finish it before the first await.
        let body = {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            form.append_pair("grant_type", "refresh_token");
            form.append_pair("refresh_token", &refresh_token);
            if let Some(client_id) = &credential.client_id {
                form.append_pair("client_id", client_id);
            }
            form.finish()
        };

        let response = self
            .http
            .post(token_endpoint)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "application/json")
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed {
                status: 0,
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Token endpoint rejected refresh");
            return Err(AuthError::RefreshFailed {
                status: status.as_u16(),
                reason: body,
            }
            .into());
        }

        let tokens: TokenResponse = response.json().await.map_err(|e| AuthError::RefreshFailed {
            status: status.as_u16(),
            reason: format!("invalid token response: {}", e),
        })?;

        credential.access_token = tokens.access_token;
        if let Some(refresh_token) = tokens.refresh_token {
            credential.refresh_token = Some(refresh_token);
        }
        credential.expires_at = tokens.expires_in.map(|seconds| {
            let lifetime = i64::try_from(seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
            Utc::now().timestamp_millis().saturating_add(lifetime)
        });
        if let Some(scope) = tokens.scope {
            credential.scopes = scope.split_whitespace().map(str::to_string).collect();
        }
        Ok(credential)
    }
}
