use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use waypoint_checkpoint::prelude::{
    Checkpoint, CheckpointConfigExt, CheckpointMetadata, CheckpointSource, CheckpointStore,
    Interrupt,
};
use waypoint_core::config::RunConfig;
use waypoint_core::error::{GraphError, Result};

use crate::compiled::CompiledStateGraph;
use crate::constants::START;

/// A caller-facing view of one checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub thread_id: String,
    pub sequence: u64,
    pub state: Value,
    /// Nodes that run when the thread continues.
    pub next_nodes: Vec<String>,
    pub interrupt: Option<Interrupt>,
    pub metadata: CheckpointMetadata,
    pub created_at: DateTime<Utc>,
}

impl From<&Checkpoint> for StateSnapshot {
    fn from(checkpoint: &Checkpoint) -> Self {
        Self {
            thread_id: checkpoint.thread_id.clone(),
            sequence: checkpoint.sequence,
            state: checkpoint.state_value(),
            next_nodes: checkpoint.next_nodes.clone(),
            interrupt: checkpoint.to_interrupt(),
            metadata: checkpoint.metadata.clone(),
            created_at: checkpoint.created_at,
        }
    }
}

impl CompiledStateGraph {
    /// The thread's latest snapshot, or `None` for an unknown thread.
    pub async fn get_state(
        &self,
        config: &RunConfig,
        store: &dyn CheckpointStore,
    ) -> Result<Option<StateSnapshot>> {
        let thread_id = config.require_thread_id()?;
        Ok(store
            .get_latest(&thread_id)
            .await?
            .as_ref()
            .map(StateSnapshot::from))
    }

    /// Every snapshot of the thread, oldest first.
    pub async fn get_state_history(
        &self,
        config: &RunConfig,
        store: &dyn CheckpointStore,
    ) -> Result<Vec<StateSnapshot>> {
        let thread_id = config.require_thread_id()?;
        let history = store.history(&thread_id).await?;
        Ok(history.iter().map(StateSnapshot::from).collect())
    }

    /// The snapshot at `sequence`, for inspecting a past super-step.
    pub async fn replay_to_sequence(
        &self,
        config: &RunConfig,
        store: &dyn CheckpointStore,
        sequence: u64,
    ) -> Result<Option<StateSnapshot>> {
        let thread_id = config.require_thread_id()?;
        Ok(store
            .get(&thread_id, Some(sequence))
            .await?
            .as_ref()
            .map(StateSnapshot::from))
    }

    /// Branch the configured thread at `sequence` into a new thread.
    ///
    /// `overrides` replaces channel values verbatim and may only name
    /// registered channels. The source thread is never modified.
    pub async fn fork(
        &self,
        config: &RunConfig,
        store: &dyn CheckpointStore,
        sequence: u64,
        overrides: Value,
    ) -> Result<String> {
        let thread_id = config.require_thread_id()?;
        let overrides = self.override_fields(overrides)?;
        let new_thread_id = store.fork(&thread_id, sequence, overrides).await?;
        tracing::info!(
            thread_id = %thread_id,
            sequence,
            new_thread_id = %new_thread_id,
            "thread forked"
        );
        Ok(new_thread_id)
    }

    /// Write `update` through the reducers as a new checkpoint, as if
    /// `as_node` had produced it. Returns the new sequence.
    ///
    /// A pending interrupt is kept. Otherwise, when `as_node` is given the
    /// frontier is recomputed from that node's edges; without it the
    /// frontier is unchanged.
    pub async fn update_state(
        &self,
        config: &RunConfig,
        store: &dyn CheckpointStore,
        update: Value,
        as_node: Option<&str>,
    ) -> Result<u64> {
        let thread_id = config.require_thread_id()?;
        let latest = store
            .get_latest(&thread_id)
            .await?
            .ok_or_else(|| GraphError::ThreadNotFound(thread_id.clone()))?;

        let writer = match as_node {
            Some(node) if node == START || self.has_node(node) => node.to_string(),
            Some(node) => {
                return Err(GraphError::InvalidGraph(format!(
                    "cannot update state as unknown node '{node}'"
                ))
                .into());
            }
            None => "update_state".to_string(),
        };

        let state = self
            .registry
            .apply(&latest.state, &[(writer.clone(), update)])?;
        let next_nodes = match as_node {
            Some(_) if latest.interrupt.is_none() => {
                self.next_frontier(&[writer.clone()], &state)?
            }
            _ => latest.next_nodes.clone(),
        };

        let mut edited = Checkpoint::new(
            &thread_id,
            latest.sequence + 1,
            state,
            next_nodes,
            CheckpointMetadata::new(CheckpointSource::Update, latest.metadata.step)
                .with_writes(vec![writer])
                .with_run(config),
        );
        edited.interrupt = latest.interrupt.clone();
        store.put(edited).await?;
        tracing::info!(
            thread_id = %thread_id,
            sequence = latest.sequence + 1,
            "state updated"
        );
        Ok(latest.sequence + 1)
    }

    fn override_fields(&self, overrides: Value) -> Result<Map<String, Value>> {
        let fields = match overrides {
            Value::Null => Map::new(),
            Value::Object(fields) => fields,
            other => {
                return Err(GraphError::Channel(format!(
                    "fork overrides must be a JSON object, got {other}"
                ))
                .into());
            }
        };
        self.registry.check_keys(fields.keys(), "fork")?;
        Ok(fields)
    }
}
