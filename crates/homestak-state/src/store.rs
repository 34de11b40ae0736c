use async_trait::async_trait;

use crate::error::StoreError;
use crate::state::{AuditEvent, ExecutionState};

/// Key identifying one persisted execution: the manifest's own name plus the
/// target host it was applied against (a manifest can be run against more
/// than one hypervisor host over its lifetime).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionKey {
    pub manifest: String,
    pub host: String,
}

impl ExecutionKey {
    pub fn new(manifest: impl Into<String>, host: impl Into<String>) -> Self {
        ExecutionKey {
            manifest: manifest.into(),
            host: host.into(),
        }
    }
}

impl std::fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.manifest, self.host)
    }
}

#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    async fn get(&self, key: &ExecutionKey) -> Result<Option<ExecutionState>, StoreError>;
    async fn put(&self, key: &ExecutionKey, state: &ExecutionState) -> Result<(), StoreError>;
    async fn delete(&self, key: &ExecutionKey) -> Result<(), StoreError>;
    async fn list_keys(&self) -> Result<Vec<ExecutionKey>, StoreError>;

    async fn append_event(&self, key: &ExecutionKey, event: &AuditEvent) -> Result<(), StoreError>;
    async fn list_events(
        &self,
        key: &ExecutionKey,
        limit: u32,
    ) -> Result<Vec<AuditEvent>, StoreError>;
}
