//! Bearer-token caching with single-flight refresh.
//!
//! [`TokenCache`] holds its lock across a refresh, so concurrent callers that
//! find the token stale wait for the one refresh in progress and then reuse
//! its result instead of each fetching their own.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::StoreError;

/// Tokens are refreshed this long before they expire.
pub const REFRESH_SKEW: Duration = Duration::from_secs(60);
/// Lifetime assumed when the token endpoint does not report one.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(55 * 60);

pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: Instant,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_fresh(&self, skew: Duration) -> bool {
        Instant::now() + skew < self.expires_at
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<AccessToken, StoreError>;
}

pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    slot: Mutex<Option<AccessToken>>,
    skew: Duration,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            slot: Mutex::new(None),
            skew: REFRESH_SKEW,
        }
    }

    /// Returns a token that stays valid for at least the refresh skew,
    /// fetching a new one if needed.
    pub async fn token(&self) -> Result<String, StoreError> {
        let mut slot = self.slot.lock().await;
        if let Some(token) = slot.as_ref().filter(|t| t.is_fresh(self.skew)) {
            return Ok(token.value.clone());
        }

        tracing::debug!("refreshing access token");
        let token = self.source.fetch().await?;
        let value = token.value.clone();
        *slot = Some(token);
        Ok(value)
    }

    /// Drops the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

#[derive(Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Fetches service-account tokens from the GCE metadata server.
pub struct MetadataTokenSource {
    client: reqwest::Client,
    url: String,
}

impl MetadataTokenSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_url(client, METADATA_TOKEN_URL)
    }

    pub fn with_url(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl TokenSource for MetadataTokenSource {
    async fn fetch(&self) -> Result<AccessToken, StoreError> {
        let response = self
            .client
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: MetadataTokenResponse = response.json().await?;
        if body.access_token.is_empty() {
            return Err(StoreError::MissingCredentials(
                "metadata server returned an empty access token".to_string(),
            ));
        }
        let ttl = body
            .expires_in
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL);
        Ok(AccessToken::new(body.access_token, ttl))
    }
}
