//! Firestore REST backend.

use std::sync::Arc;

use async_trait::async_trait;
use parley_types::SessionState;
use serde_json::{json, Value};

use crate::token::TokenCache;
use crate::{SessionBackend, SessionStore, StoreError};

pub const FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_COLLECTION: &str = "call_sessions";
pub const DEFAULT_DATABASE: &str = "(default)";

enum Credentials {
    Static(String),
    Refreshing(Arc<TokenCache>),
}

/// Writes each session as one document, replacing its fields on every write.
/// The document store has no per-document TTL, so `ttl_secs` is ignored.
pub struct DocumentStore {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    database: String,
    collection: String,
    credentials: Credentials,
}

impl DocumentStore {
    /// Authenticates with a fixed bearer token.
    pub fn with_static_token(
        client: reqwest::Client,
        project_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self::new(client, project_id.into(), Credentials::Static(token.into()))
    }

    /// Authenticates with tokens from `cache`, refreshed on demand.
    pub fn with_token_cache(
        client: reqwest::Client,
        project_id: impl Into<String>,
        cache: Arc<TokenCache>,
    ) -> Self {
        Self::new(client, project_id.into(), Credentials::Refreshing(cache))
    }

    fn new(client: reqwest::Client, project_id: String, credentials: Credentials) -> Self {
        Self {
            client,
            base_url: FIRESTORE_BASE_URL.to_string(),
            project_id,
            database: DEFAULT_DATABASE.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            credentials,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn document_url(&self, id: &str) -> String {
        format!(
            "{}/projects/{}/databases/{}/documents/{}/{}",
            self.base_url,
            self.project_id,
            urlencoding::encode(&self.database),
            urlencoding::encode(&self.collection),
            urlencoding::encode(id),
        )
    }

    async fn bearer(&self) -> Result<String, StoreError> {
        match &self.credentials {
            Credentials::Static(token) => Ok(token.clone()),
            Credentials::Refreshing(cache) => cache.token().await,
        }
    }

    async fn patch(&self, url: &str, body: &Value) -> Result<reqwest::Response, StoreError> {
        let token = self.bearer().await?;
        Ok(self
            .client
            .patch(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?)
    }
}

/// Maps a session record onto Firestore's typed field values.
pub fn document_fields(state: &SessionState) -> Value {
    fn optional_string(value: Option<&str>) -> Value {
        match value.filter(|v| !v.is_empty()) {
            Some(v) => json!({ "stringValue": v }),
            None => json!({ "nullValue": null }),
        }
    }

    json!({
        "fields": {
            "callSid": optional_string(state.call_id.as_deref()),
            "streamSid": optional_string(state.stream_id.as_deref()),
            "status": { "stringValue": state.status.as_str() },
            "interactionCount": { "integerValue": state.interaction_count.to_string() },
            "updatedAt": { "stringValue": state.updated_at.to_rfc3339() },
        }
    })
}

#[async_trait]
impl SessionStore for DocumentStore {
    fn backend(&self) -> SessionBackend {
        SessionBackend::Document
    }

    async fn set_session_value(
        &self,
        id: &str,
        state: &SessionState,
        _ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let url = self.document_url(id);
        let body = document_fields(state);

        let mut response = self.patch(&url, &body).await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            if let Credentials::Refreshing(cache) = &self.credentials {
                tracing::debug!(session_id = id, "document store rejected token, retrying once");
                cache.invalidate().await;
                response = self.patch(&url, &body).await?;
            }
        }

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
