//! Credential lifecycle for HTTP servers.
//!
//! Credentials are kept in a [`CredentialStore`] under [`store_key`] and
//! refreshed by the [`CredentialManager`] shortly before they expire. The
//! HTTP transport asks the manager for a bearer token before every POST.

pub mod manager;
pub mod store;

pub use manager::{discovery_urls, CredentialManager, KeyedLocks, DEFAULT_REFRESH_SKEW};
pub use store::{
    store_key, CredentialStore, FileCredentialStore, InMemoryCredentialStore, StoredCredential,
};
