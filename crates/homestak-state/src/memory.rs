use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::state::{AuditEvent, ExecutionState};
use crate::store::{ExecutionKey, StateStore};

#[derive(Debug, Default)]
struct Inner {
    runs: HashMap<ExecutionKey, ExecutionState>,
    events: HashMap<ExecutionKey, Vec<AuditEvent>>,
}

/// In-memory implementation of [`StateStore`].
///
/// All data is lost on process exit. Suitable for tests and the local action
/// implementations that never touch real infrastructure.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn get(&self, key: &ExecutionKey) -> Result<Option<ExecutionState>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.runs.get(key).cloned())
    }

    async fn put(&self, key: &ExecutionKey, state: &ExecutionState) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.runs.insert(key.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, key: &ExecutionKey) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.runs.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<ExecutionKey>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.runs.keys().cloned().collect())
    }

    async fn append_event(&self, key: &ExecutionKey, event: &AuditEvent) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.events.entry(key.clone()).or_default().push(event.clone());
        Ok(())
    }

    async fn list_events(
        &self,
        key: &ExecutionKey,
        limit: u32,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let guard = self.inner.read().await;
        let events = guard.events.get(key).cloned().unwrap_or_default();
        let start = events.len().saturating_sub(limit as usize);
        Ok(events[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn key() -> ExecutionKey {
        ExecutionKey::new("site", "pve-01")
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryStore::new();
        let state = ExecutionState::default();
        store.put(&key(), &state).await.unwrap();
        let got = store.get(&key()).await.unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn delete_removes_state() {
        let store = InMemoryStore::new();
        store.put(&key(), &ExecutionState::default()).await.unwrap();
        store.delete(&key()).await.unwrap();
        assert!(store.get(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn events_scoped_by_key() {
        let store = InMemoryStore::new();
        let other = ExecutionKey::new("site", "pve-02");
        store
            .append_event(
                &key(),
                &AuditEvent::RunStarted {
                    id: Uuid::new_v4(),
                    at: Utc::now(),
                    manifest: "site".into(),
                    dry_run: false,
                },
            )
            .await
            .unwrap();
        store
            .append_event(
                &other,
                &AuditEvent::RunStarted {
                    id: Uuid::new_v4(),
                    at: Utc::now(),
                    manifest: "site".into(),
                    dry_run: false,
                },
            )
            .await
            .unwrap();

        assert_eq!(store.list_events(&key(), 100).await.unwrap().len(), 1);
        assert_eq!(store.list_events(&other, 100).await.unwrap().len(), 1);
    }
}
