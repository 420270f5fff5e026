//! Startup-time backend selection.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;

use crate::document::{DocumentStore, DEFAULT_COLLECTION, DEFAULT_DATABASE};
use crate::token::{MetadataTokenSource, TokenCache};
use crate::{KeyValueStore, MemoryStore, SessionStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBackend {
    KeyValue,
    Document,
    Memory,
}

impl SessionBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeyValue => "redis",
            Self::Document => "firestore",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for SessionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionBackend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::KeyValue),
            "firestore" => Ok(Self::Document),
            "memory" => Ok(Self::Memory),
            other => Err(StoreError::UnknownBackend(other.to_string())),
        }
    }
}

/// The `session_store` configuration section.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Explicit backend override: `redis`, `firestore` or `memory`.
    pub backend: Option<String>,
    pub redis_url: Option<String>,
    pub project_id: Option<String>,
    pub collection: String,
    pub database: String,
    /// Fixed bearer token for the document store. Without it tokens come
    /// from the metadata server.
    pub access_token: Option<String>,
    pub ttl_seconds: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: None,
            redis_url: None,
            project_id: None,
            collection: DEFAULT_COLLECTION.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            access_token: None,
            ttl_seconds: parley_types::SESSION_TTL_SECS,
        }
    }
}

impl fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSettings")
            .field("backend", &self.backend)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("project_id", &self.project_id)
            .field("collection", &self.collection)
            .field("database", &self.database)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Picks the backend: explicit override, then a key-value connection string,
/// then a document-store project id, then memory. An unrecognised override is
/// ignored.
pub fn resolve_backend(settings: &StoreSettings) -> SessionBackend {
    if let Some(explicit) = present(&settings.backend) {
        match explicit.parse() {
            Ok(backend) => return backend,
            Err(e) => tracing::warn!(error = %e, "ignoring session store override"),
        }
    }
    if present(&settings.redis_url).is_some() {
        return SessionBackend::KeyValue;
    }
    if present(&settings.project_id).is_some() {
        return SessionBackend::Document;
    }
    SessionBackend::Memory
}

/// Builds the store selected by [`resolve_backend`].
pub fn create_session_store(
    settings: &StoreSettings,
    client: reqwest::Client,
) -> Result<Arc<dyn SessionStore>, StoreError> {
    let backend = resolve_backend(settings);
    let store: Arc<dyn SessionStore> = match backend {
        SessionBackend::KeyValue => {
            let url = present(&settings.redis_url)
                .ok_or_else(|| StoreError::MissingCredentials("REDIS_URL".to_string()))?;
            Arc::new(KeyValueStore::from_url(url)?)
        }
        SessionBackend::Document => {
            let project = present(&settings.project_id).ok_or_else(|| {
                StoreError::MissingCredentials("GOOGLE_CLOUD_PROJECT".to_string())
            })?;
            let store = match present(&settings.access_token) {
                Some(token) => DocumentStore::with_static_token(client, project, token),
                None => {
                    let source = Arc::new(MetadataTokenSource::new(client.clone()));
                    let cache = Arc::new(TokenCache::new(source));
                    DocumentStore::with_token_cache(client, project, cache)
                }
            };
            Arc::new(
                store
                    .with_collection(settings.collection.clone())
                    .with_database(settings.database.clone()),
            )
        }
        SessionBackend::Memory => Arc::new(MemoryStore::new()),
    };
    tracing::info!(backend = %backend, "session store selected");
    Ok(store)
}
