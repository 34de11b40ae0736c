use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::state::{AuditEvent, ExecutionState};
use crate::store::{ExecutionKey, StateStore};

/// Persistent state store backed by one JSON file per execution key under a
/// root directory, plus a companion `.events.jsonl` append log.
///
/// Writes go through a temp-file-then-rename so a crash mid-write never
/// leaves a half-written state file behind; an in-process mutex serializes
/// writers within this instance, and cross-process exclusivity is the
/// caller's responsibility (see [`crate::lock::RunLock`]).
#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileStore {
    /// Open (or create) a state directory at `root`.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root)?;
        Ok(FileStore {
            root: root.to_path_buf(),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn state_path(&self, key: &ExecutionKey) -> PathBuf {
        self.root.join(format!("{}.json", slug(key)))
    }

    fn events_path(&self, key: &ExecutionKey) -> PathBuf {
        self.root.join(format!("{}.events.jsonl", slug(key)))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        use std::io::Write;
        let tmp = path.with_extension("tmp");
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        drop(f);
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn slug(key: &ExecutionKey) -> String {
    format!("{}__{}", sanitize(&key.manifest), sanitize(&key.host))
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl StateStore for FileStore {
    async fn get(&self, key: &ExecutionKey) -> Result<Option<ExecutionState>, StoreError> {
        let path = self.state_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let state: ExecutionState = serde_json::from_slice(&bytes)?;
        Ok(Some(state))
    }

    async fn put(&self, key: &ExecutionKey, state: &ExecutionState) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let bytes = serde_json::to_vec_pretty(state)?;
        self.write_atomic(&self.state_path(key), &bytes)?;
        debug!(key = %key, "wrote execution state");
        Ok(())
    }

    async fn delete(&self, key: &ExecutionKey) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.state_path(key);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<ExecutionKey>, StoreError> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".json") {
                if let Some((manifest, host)) = stem.split_once("__") {
                    keys.push(ExecutionKey::new(manifest, host));
                }
            }
        }
        Ok(keys)
    }

    async fn append_event(&self, key: &ExecutionKey, event: &AuditEvent) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let line = serde_json::to_string(event)?;
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path(key))?;
        writeln!(f, "{line}")?;
        Ok(())
    }

    async fn list_events(
        &self,
        key: &ExecutionKey,
        limit: u32,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let path = self.events_path(key);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)?;
        let events: Vec<AuditEvent> = content
            .lines()
            .filter(|l| !l.is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        let start = events.len().saturating_sub(limit as usize);
        Ok(events[start..].to_vec())
    }
}

/// Bulk-loads every execution state under `root`, used by the CLI's
/// `server status` / listing verbs.
pub fn load_all(root: &Path) -> Result<HashMap<ExecutionKey, ExecutionState>, StoreError> {
    let mut out = HashMap::new();
    if !root.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy().to_string();
        if let Some(stem) = name.strip_suffix(".json") {
            if let Some((manifest, host)) = stem.split_once("__") {
                let bytes = std::fs::read(entry.path())?;
                let state: ExecutionState = serde_json::from_slice(&bytes)?;
                out.insert(ExecutionKey::new(manifest, host), state);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_survives_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let key = ExecutionKey::new("site", "pve-01");
        store.put(&key, &ExecutionState::default()).await.unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        assert!(reopened.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_keys_reflects_written_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store
            .put(&ExecutionKey::new("site", "a"), &ExecutionState::default())
            .await
            .unwrap();
        store
            .put(&ExecutionKey::new("site", "b"), &ExecutionState::default())
            .await
            .unwrap();
        let keys = store.list_keys().await.unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let key = ExecutionKey::new("site", "pve-01");
        store.put(&key, &ExecutionState::default()).await.unwrap();
        store.delete(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn events_append_and_list_in_order() {
        use chrono::Utc;
        use homestak_domain::NodeName;
        use uuid::Uuid;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let key = ExecutionKey::new("site", "pve-01");
        for i in 0..3 {
            store
                .append_event(
                    &key,
                    &AuditEvent::NodeProvisioned {
                        id: Uuid::new_v4(),
                        at: Utc::now(),
                        node: NodeName::new(format!("n{i}")),
                    },
                )
                .await
                .unwrap();
        }
        let events = store.list_events(&key, 100).await.unwrap();
        assert_eq!(events.len(), 3);
    }
}
