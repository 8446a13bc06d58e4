use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use waypoint_core::error::{CheckpointError, Result};

use crate::types::{Checkpoint, CheckpointMetadata, CheckpointSource, ParentRef};

/// Async, append-only storage backend for graph checkpoints.
///
/// A `(thread_id, sequence)` pair is written at most once: `put` on an
/// existing pair fails with `CheckpointError::SequenceConflict`. This is the
/// optimistic-concurrency check that keeps a thread to a single writer, and
/// the reason `history` and `fork` never observe a rewritten past.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a checkpoint.
    async fn put(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Fetch a checkpoint by sequence, or the latest one when `sequence` is `None`.
    async fn get(&self, thread_id: &str, sequence: Option<u64>) -> Result<Option<Checkpoint>>;

    /// All checkpoints of a thread, ascending by sequence.
    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>>;

    /// Ids of every thread with at least one checkpoint.
    async fn list_threads(&self) -> Result<Vec<String>>;

    /// Drop a thread's entire history (retention).
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        self.get(thread_id, None).await
    }

    /// Branch a new thread from `thread_id` at `sequence`, replacing the
    /// listed channel values verbatim. Returns the new thread id.
    async fn fork(
        &self,
        thread_id: &str,
        sequence: u64,
        overrides: Map<String, Value>,
    ) -> Result<String> {
        let new_thread_id = Uuid::new_v4().to_string();
        self.fork_into(thread_id, sequence, &new_thread_id, overrides)
            .await?;
        Ok(new_thread_id)
    }

    /// Like `fork`, with a caller-chosen id for the new thread.
    async fn fork_into(
        &self,
        thread_id: &str,
        sequence: u64,
        new_thread_id: &str,
        overrides: Map<String, Value>,
    ) -> Result<()> {
        let source = self
            .get(thread_id, Some(sequence))
            .await?
            .ok_or_else(|| CheckpointError::NotFound {
                thread_id: thread_id.to_string(),
                sequence,
            })?;

        let writes: Vec<String> = overrides.keys().cloned().collect();
        let mut state = source.state.clone();
        state.extend(overrides);

        let mut metadata = CheckpointMetadata::new(CheckpointSource::Fork, source.metadata.step)
            .with_writes(writes);
        metadata.parent = Some(ParentRef {
            thread_id: source.thread_id.clone(),
            sequence: source.sequence,
        });

        let mut forked = Checkpoint::new(
            new_thread_id,
            0,
            state,
            source.next_nodes.clone(),
            metadata,
        );
        forked.interrupt = source.interrupt.clone();

        tracing::debug!(
            from_thread = %thread_id,
            from_sequence = sequence,
            to_thread = %new_thread_id,
            "forking thread"
        );
        self.put(forked).await
    }
}
