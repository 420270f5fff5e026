//! In-process fallback store.

use std::collections::HashMap;

use async_trait::async_trait;
use parley_types::SessionState;
use tokio::sync::RwLock;

use crate::{SessionBackend, SessionStore, StoreError};

/// Keeps session records in a map for the life of the process. TTLs are
/// accepted and ignored.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    fn backend(&self) -> SessionBackend {
        SessionBackend::Memory
    }

    async fn set_session_value(
        &self,
        id: &str,
        state: &SessionState,
        _ttl_secs: u64,
    ) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(id.to_string(), state.clone());
        Ok(())
    }

    async fn get_session_value(&self, id: &str) -> Result<Option<SessionState>, StoreError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn delete_session_value(&self, id: &str) -> Result<(), StoreError> {
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn list_session_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
