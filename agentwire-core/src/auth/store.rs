//! Credential persistence.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{AuthError, WireResult};

/// OAuth credential for one server endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    /// Server the credential belongs to
    pub server_name: String,
    /// Endpoint URL the credential was issued for
    pub server_url: String,
    /// OAuth client id used for refresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Bearer token
    pub access_token: String,
    /// Refresh token, when the server issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Expiry in milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// Granted scopes
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl StoredCredential {
    /// Create a credential holding only an access token.
    pub fn new(
        server_name: impl Into<String>,
        server_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            server_url: server_url.into(),
            client_id: None,
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            scopes: Vec::new(),
        }
    }

    /// Set the refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Set the client id.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the expiry instant.
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at.timestamp_millis());
        self
    }

    /// Expire `lifetime` from now.
    pub fn expiring_in(mut self, lifetime: Duration) -> Self {
        let lifetime = i64::try_from(lifetime.as_millis()).unwrap_or(i64::MAX);
        self.expires_at = Some(Utc::now().timestamp_millis().saturating_add(lifetime));
        self
    }

    /// Expiry as a timestamp.
    pub fn expires_at_time(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
    }

    /// Whether a refresh should happen at `now` given `skew`.
    ///
    /// Never true without both a refresh token and an expiry.
    pub fn needs_refresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        let (Some(_), Some(expires_at)) = (&self.refresh_token, self.expires_at) else {
            return false;
        };
        let skew = i64::try_from(skew.as_millis()).unwrap_or(i64::MAX);
        now.timestamp_millis().saturating_add(skew) >= expires_at
    }
}

/// Store key for a server endpoint: `<server>|<16 hex chars>`.
///
/// The hex part is a SHA-256 prefix over the server name and URL, so the raw
/// URL never appears in the key.
pub fn store_key(server: &str, url: &str) -> String {
    let identity = serde_json::json!({ "server": server, "url": url }).to_string();
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}|{}", server, &digest[..16])
}

/// Where credentials live.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the credential for a server endpoint.
    async fn load(&self, server: &str, url: &str) -> WireResult<Option<StoredCredential>>;

    /// Insert or replace the credential for a server endpoint.
    async fn save(&self, server: &str, url: &str, credential: &StoredCredential) -> WireResult<()>;

    /// Remove the credential for a server endpoint.
    async fn delete(&self, server: &str, url: &str) -> WireResult<()>;
}

/// Credentials held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    entries: Mutex<HashMap<String, StoredCredential>>,
}

impl InMemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn load(&self, server: &str, url: &str) -> WireResult<Option<StoredCredential>> {
        Ok(self.entries.lock().await.get(&store_key(server, url)).cloned())
    }

    async fn save(&self, server: &str, url: &str, credential: &StoredCredential) -> WireResult<()> {
        self.entries
            .lock()
            .await
            .insert(store_key(server, url), credential.clone());
        Ok(())
    }

    async fn delete(&self, server: &str, url: &str) -> WireResult<()> {
        self.entries.lock().await.remove(&store_key(server, url));
        Ok(())
    }
}

/// Credentials in a JSON file, one object keyed by [`store_key`].
///
/// Writes go to a sibling temp file which then replaces the original; on
/// unix the file is readable by its owner only. A file that fails to parse
/// is treated as empty.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileCredentialStore {
    /// Use the file at `path`; it need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> WireResult<BTreeMap<String, StoredCredential>> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(AuthError::Store {
                    reason: format!("reading {}: {}", self.path.display(), e),
                }
                .into())
            }
        };

        match serde_json::from_slice(&contents) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(path = %self.path.display(), "Ignoring unreadable credential store: {}", e);
                Ok(BTreeMap::new())
            }
        }
    }

    async fn write_all(&self, entries: &BTreeMap<String, StoredCredential>) -> WireResult<()> {
        let store_error = |e: std::io::Error| AuthError::Store {
            reason: format!("writing {}: {}", self.path.display(), e),
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(store_error)?;
        }

        let contents = serde_json::to_vec_pretty(entries)?;
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        // A leftover temp file keeps its old mode, so start from scratch.
        match tokio::fs::remove_file(&temp).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(store_error(e).into()),
            _ => {}
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&temp).await.map_err(store_error)?;
        file.write_all(&contents).await.map_err(store_error)?;
        file.sync_all().await.map_err(store_error)?;
        drop(file);

        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(store_error)?;

        debug!(path = %self.path.display(), entries = entries.len(), "Credential store written");
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, server: &str, url: &str) -> WireResult<Option<StoredCredential>> {
        let _guard = self.guard.lock().await;
        Ok(self.read_all().await?.remove(&store_key(server, url)))
    }

    async fn save(&self, server: &str, url: &str, credential: &StoredCredential) -> WireResult<()> {
        let _guard = self.guard.lock().await;
        let mut entries = self.read_all().await?;
        entries.insert(store_key(server, url), credential.clone());
        self.write_all(&entries).await
    }

    async fn delete(&self, server: &str, url: &str) -> WireResult<()> {
        let _guard = self.guard.lock().await;
        let mut entries = self.read_all().await?;
        if entries.remove(&store_key(server, url)).is_some() {
            self.write_all(&entries).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const URL: &str = "https://mcp.example.com/mcp";

    fn credential() -> StoredCredential {
        StoredCredential::new("docs", URL, "access-1")
            .with_refresh_token("refresh-1")
            .with_client_id("client-abc")
    }

    #[test]
    fn test_store_key_shape() {
        let key = store_key("docs", URL);
        let (server, hash) = key.split_once('|').unwrap();
        assert_eq!(server, "docs");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!key.contains("example.com"));

        assert_eq!(key, store_key("docs", URL));
        assert_ne!(key, store_key("docs", "https://other.example.com/mcp"));
        assert_ne!(key, store_key("wiki", URL));
    }

    #[test]
    fn test_needs_refresh() {
        let now = Utc::now();
        let skew = Duration::from_secs(30);

        let soon = credential().with_expires_at(now + chrono::Duration::seconds(10));
        assert!(soon.needs_refresh(now, skew));

        let later = credential().with_expires_at(now + chrono::Duration::seconds(300));
        assert!(!later.needs_refresh(now, skew));

        let no_refresh = StoredCredential::new("docs", URL, "access")
            .with_expires_at(now - chrono::Duration::seconds(300));
        assert!(!no_refresh.needs_refresh(now, skew));

        let no_expiry = credential();
        assert!(!no_expiry.needs_refresh(now, skew));
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryCredentialStore::new();
        assert!(store.load("docs", URL).await.unwrap().is_none());

        store.save("docs", URL, &credential()).await.unwrap();
        assert_eq!(store.load("docs", URL).await.unwrap(), Some(credential()));

        store.delete("docs", URL).await.unwrap();
        assert!(store.load("docs", URL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("credentials.json");
        let store = FileCredentialStore::new(&path);

        store.save("docs", URL, &credential()).await.unwrap();
        store
            .save("wiki", URL, &StoredCredential::new("wiki", URL, "wiki-token"))
            .await
            .unwrap();

        let reopened = FileCredentialStore::new(&path);
        assert_eq!(reopened.load("docs", URL).await.unwrap(), Some(credential()));

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let object = raw.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert!(object.contains_key(&store_key("docs", URL)));
        assert_eq!(object[&store_key("docs", URL)]["access_token"], "access-1");

        reopened.delete("docs", URL).await.unwrap();
        assert!(store.load("docs", URL).await.unwrap().is_none());
        assert!(store.load("wiki", URL).await.unwrap().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        FileCredentialStore::new(&path)
            .save("docs", URL, &credential())
            .await
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_leftover_temp_file_does_not_leak_its_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        let temp = dir.path().join("credentials.json.tmp");
        std::fs::write(&temp, b"stale").unwrap();
        std::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileCredentialStore::new(&path);
        store.save("docs", URL, &credential()).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!temp.exists());
        assert_eq!(store.load("docs", URL).await.unwrap(), Some(credential()));
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = FileCredentialStore::new(&path);
        assert!(store.load("docs", URL).await.unwrap().is_none());

        store.save("docs", URL, &credential()).await.unwrap();
        assert_eq!(store.load("docs", URL).await.unwrap(), Some(credential()));
    }
}
