//! Session-state persistence for Parley calls.
//!
//! A [`SessionStore`] writes the [`SessionState`] record of a call to one of
//! three backends: a key-value store spoken to over a small hand-rolled RESP
//! client, a managed document store over REST, or process memory. The backend
//! is chosen once at startup by [`resolve_backend`] and shared by every call.
//!
//! Persistence is best effort. [`persist_session`] logs failures with the
//! session identifiers and never hands them back to the call pipeline.

pub mod backend;
pub mod document;
pub mod error;
pub mod memory;
pub mod resp;
pub mod token;

pub use backend::{create_session_store, resolve_backend, SessionBackend, StoreSettings};
pub use document::DocumentStore;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use resp::KeyValueStore;
pub use token::{AccessToken, MetadataTokenSource, TokenCache, TokenSource};

use async_trait::async_trait;
use parley_types::SessionState;

/// A backend that can durably record call-session state.
///
/// Only [`set_session_value`](SessionStore::set_session_value) is required.
/// Reads, deletes and listing are optional and default to
/// [`StoreError::Unsupported`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    fn backend(&self) -> SessionBackend;

    async fn set_session_value(
        &self,
        id: &str,
        state: &SessionState,
        ttl_secs: u64,
    ) -> Result<(), StoreError>;

    async fn get_session_value(&self, _id: &str) -> Result<Option<SessionState>, StoreError> {
        Err(self.unsupported("get"))
    }

    async fn delete_session_value(&self, _id: &str) -> Result<(), StoreError> {
        Err(self.unsupported("delete"))
    }

    async fn list_session_ids(&self) -> Result<Vec<String>, StoreError> {
        Err(self.unsupported("list"))
    }

    #[doc(hidden)]
    fn unsupported(&self, operation: &'static str) -> StoreError {
        StoreError::Unsupported {
            backend: self.backend().as_str(),
            operation,
        }
    }
}

/// Writes `state` under its record id, logging instead of returning failures.
///
/// Returns `true` when the write succeeded. A state with neither a call id nor
/// a stream id is skipped.
pub async fn persist_session(store: &dyn SessionStore, state: &SessionState, ttl_secs: u64) -> bool {
    let Some(id) = state.record_id() else {
        tracing::debug!(status = %state.status, "session has no identifier, not persisted");
        return false;
    };

    match store.set_session_value(id, state, ttl_secs).await {
        Ok(()) => {
            tracing::debug!(
                backend = store.backend().as_str(),
                call_sid = state.call_id.as_deref().unwrap_or(""),
                stream_sid = state.stream_id.as_deref().unwrap_or(""),
                status = %state.status,
                interaction_count = state.interaction_count,
                "session state persisted"
            );
            true
        }
        Err(e) => {
            tracing::warn!(
                backend = store.backend().as_str(),
                call_sid = state.call_id.as_deref().unwrap_or(""),
                stream_sid = state.stream_id.as_deref().unwrap_or(""),
                status = %state.status,
                interaction_count = state.interaction_count,
                error = %e,
                "failed to persist session state"
            );
            false
        }
    }
}
