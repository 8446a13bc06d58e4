use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use waypoint_core::error::{CheckpointError, Result};

use crate::store::CheckpointStore;
use crate::types::Checkpoint;

type Threads = HashMap<String, BTreeMap<u64, Checkpoint>>;

/// In-memory checkpoint store for testing and short-lived workflows.
///
/// Thread-safe via `RwLock`. All data is lost when the store is dropped.
pub struct MemoryCheckpointStore {
    data: RwLock<Threads>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Threads>> {
        self.data
            .read()
            .map_err(|_| CheckpointError::Storage("memory store lock poisoned".into()).into())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Threads>> {
        self.data
            .write()
            .map_err(|_| CheckpointError::Storage("memory store lock poisoned".into()).into())
    }
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut data = self.write()?;
        let thread = data.entry(checkpoint.thread_id.clone()).or_default();
        if thread.contains_key(&checkpoint.sequence) {
            return Err(CheckpointError::SequenceConflict {
                thread_id: checkpoint.thread_id,
                sequence: checkpoint.sequence,
            }
            .into());
        }
        tracing::debug!(
            thread_id = %checkpoint.thread_id,
            sequence = checkpoint.sequence,
            "checkpoint stored in memory"
        );
        thread.insert(checkpoint.sequence, checkpoint);
        Ok(())
    }

    async fn get(&self, thread_id: &str, sequence: Option<u64>) -> Result<Option<Checkpoint>> {
        let data = self.read()?;
        let Some(thread) = data.get(thread_id) else {
            return Ok(None);
        };
        Ok(match sequence {
            Some(seq) => thread.get(&seq).cloned(),
            None => thread.values().next_back().cloned(),
        })
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let data = self.read()?;
        Ok(data
            .get(thread_id)
            .map(|thread| thread.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_threads(&self) -> Result<Vec<String>> {
        let data = self.read()?;
        let mut threads: Vec<String> = data.keys().cloned().collect();
        threads.sort();
        Ok(threads)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let mut data = self.write()?;
        data.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::PendingInterrupt;
    use crate::types::{CheckpointMetadata, CheckpointSource};
    use serde_json::{Map, Value, json};
    use waypoint_core::error::WaypointError;

    fn make_checkpoint(thread_id: &str, sequence: u64) -> Checkpoint {
        let mut state = Map::new();
        state.insert("count".into(), json!(sequence));
        Checkpoint::new(
            thread_id,
            sequence,
            state,
            vec![format!("node_{}", sequence + 1)],
            CheckpointMetadata::new(CheckpointSource::Loop, sequence as usize),
        )
    }

    #[tokio::test]
    async fn put_and_get() {
        let store = MemoryCheckpointStore::new();
        store.put(make_checkpoint("thread-1", 0)).await.unwrap();

        let retrieved = store.get("thread-1", Some(0)).await.unwrap().unwrap();
        assert_eq!(retrieved.sequence, 0);
        assert_eq!(retrieved.state["count"], json!(0));
    }

    #[tokio::test]
    async fn get_nonexistent() {
        let store = MemoryCheckpointStore::new();
        assert!(store.get("no-thread", None).await.unwrap().is_none());
        store.put(make_checkpoint("thread-1", 0)).await.unwrap();
        assert!(store.get("thread-1", Some(7)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_latest() {
        let store = MemoryCheckpointStore::new();
        for seq in 0..3 {
            store.put(make_checkpoint("thread-1", seq)).await.unwrap();
        }
        let latest = store.get_latest("thread-1").await.unwrap().unwrap();
        assert_eq!(latest.sequence, 2);
    }

    #[tokio::test]
    async fn history_ordered_by_sequence() {
        let store = MemoryCheckpointStore::new();
        // Insert out of order
        store.put(make_checkpoint("thread-1", 2)).await.unwrap();
        store.put(make_checkpoint("thread-1", 0)).await.unwrap();
        store.put(make_checkpoint("thread-1", 1)).await.unwrap();

        let history = store.history("thread-1").await.unwrap();
        let sequences: Vec<u64> = history.iter().map(|cp| cp.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn put_is_append_only() {
        let store = MemoryCheckpointStore::new();
        store.put(make_checkpoint("thread-1", 0)).await.unwrap();

        let mut rewritten = make_checkpoint("thread-1", 0);
        rewritten.state.insert("count".into(), json!(999));
        let err = store.put(rewritten).await.unwrap_err();
        assert!(matches!(
            err,
            WaypointError::Checkpoint(CheckpointError::SequenceConflict { sequence: 0, .. })
        ));

        let stored = store.get("thread-1", Some(0)).await.unwrap().unwrap();
        assert_eq!(stored.state["count"], json!(0));
    }

    #[tokio::test]
    async fn separate_threads() {
        let store = MemoryCheckpointStore::new();
        store.put(make_checkpoint("thread-a", 0)).await.unwrap();
        store.put(make_checkpoint("thread-b", 0)).await.unwrap();
        store.put(make_checkpoint("thread-b", 1)).await.unwrap();

        assert_eq!(store.history("thread-a").await.unwrap().len(), 1);
        assert_eq!(store.history("thread-b").await.unwrap().len(), 2);
        assert_eq!(
            store.list_threads().await.unwrap(),
            vec!["thread-a".to_string(), "thread-b".to_string()]
        );
    }

    #[tokio::test]
    async fn delete_thread() {
        let store = MemoryCheckpointStore::new();
        store.put(make_checkpoint("thread-1", 0)).await.unwrap();
        store.put(make_checkpoint("thread-2", 0)).await.unwrap();

        store.delete_thread("thread-1").await.unwrap();
        assert!(store.get_latest("thread-1").await.unwrap().is_none());
        assert!(store.get_latest("thread-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn fork_copies_state_and_applies_overrides() {
        let store = MemoryCheckpointStore::new();
        for seq in 0..4 {
            store.put(make_checkpoint("thread-a", seq)).await.unwrap();
        }

        let mut overrides = Map::new();
        overrides.insert("count".into(), json!(100));
        let forked_id = store.fork("thread-a", 3, overrides).await.unwrap();
        assert_ne!(forked_id, "thread-a");

        let forked = store.history(&forked_id).await.unwrap();
        assert_eq!(forked.len(), 1);
        let root = &forked[0];
        assert_eq!(root.sequence, 0);
        assert_eq!(root.state["count"], json!(100));
        assert_eq!(root.next_nodes, vec!["node_4".to_string()]);
        assert_eq!(root.metadata.source, CheckpointSource::Fork);
        let parent = root.metadata.parent.as_ref().unwrap();
        assert_eq!(parent.thread_id, "thread-a");
        assert_eq!(parent.sequence, 3);

        // Source history is untouched.
        let original = store.history("thread-a").await.unwrap();
        assert_eq!(original.len(), 4);
        assert_eq!(original[3].state["count"], json!(3));
    }

    #[tokio::test]
    async fn fork_preserves_pending_interrupt() {
        let store = MemoryCheckpointStore::new();
        let cp = make_checkpoint("thread-a", 0)
            .with_interrupt(PendingInterrupt::node("review", Value::String("ok?".into())));
        store.put(cp).await.unwrap();

        store
            .fork_into("thread-a", 0, "thread-b", Map::new())
            .await
            .unwrap();
        let forked = store.get_latest("thread-b").await.unwrap().unwrap();
        assert_eq!(forked.interrupt.unwrap().node, "review");
    }

    #[tokio::test]
    async fn fork_missing_checkpoint_errors() {
        let store = MemoryCheckpointStore::new();
        let err = store.fork("nope", 0, Map::new()).await.unwrap_err();
        assert!(matches!(
            err,
            WaypointError::Checkpoint(CheckpointError::NotFound { .. })
        ));
    }
}
