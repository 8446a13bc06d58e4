use async_trait::async_trait;
use serde_json::Value;
use tokio_postgres::{Client, NoTls};

use waypoint_core::error::{CheckpointError, Result, WaypointError};

use crate::store::CheckpointStore;
use crate::types::Checkpoint;

/// PostgreSQL-backed checkpoint store for the networked deployment.
///
/// Feature-gated behind the `postgres` feature flag. Appends use
/// `ON CONFLICT DO NOTHING`, so two writers racing for the same
/// `(thread_id, sequence)` see exactly one winner.
pub struct PostgresCheckpointStore {
    client: Client,
    _handle: tokio::task::JoinHandle<()>,
}

const COLUMNS: &str = "thread_id, sequence, state, next_nodes, interrupt, metadata, \
                       engine_version, format_version, created_at";

fn storage(context: &str, e: impl std::fmt::Display) -> WaypointError {
    CheckpointError::Storage(format!("PostgreSQL {context} error: {e}")).into()
}

impl PostgresCheckpointStore {
    /// Connect to PostgreSQL using the `DATABASE_URL` environment variable.
    pub async fn from_env() -> Result<Self> {
        let url = std::env::var("DATABASE_URL").map_err(|_| {
            WaypointError::Other("DATABASE_URL environment variable not set".into())
        })?;
        Self::connect(&url).await
    }

    /// Connect to PostgreSQL using the given connection string.
    pub async fn connect(url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(url, NoTls)
            .await
            .map_err(|e| storage("connection", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {e}");
            }
        });

        let store = Self {
            client,
            _handle: handle,
        };
        store.create_table().await?;
        Ok(store)
    }

    async fn create_table(&self) -> Result<()> {
        self.client
            .execute(
                "CREATE TABLE IF NOT EXISTS waypoint_checkpoints (
                    thread_id TEXT NOT NULL,
                    sequence BIGINT NOT NULL,
                    state JSONB NOT NULL,
                    next_nodes JSONB NOT NULL,
                    interrupt JSONB,
                    metadata JSONB NOT NULL,
                    engine_version TEXT NOT NULL,
                    format_version INTEGER NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    PRIMARY KEY (thread_id, sequence)
                )",
                &[],
            )
            .await
            .map_err(|e| storage("create table", e))?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let state = Value::Object(checkpoint.state.clone());
        let next_nodes = serde_json::to_value(&checkpoint.next_nodes)?;
        let interrupt = checkpoint
            .interrupt
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let metadata = serde_json::to_value(&checkpoint.metadata)?;

        let inserted = self
            .client
            .execute(
                &format!(
                    "INSERT INTO waypoint_checkpoints ({COLUMNS})
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                     ON CONFLICT (thread_id, sequence) DO NOTHING"
                ),
                &[
                    &checkpoint.thread_id,
                    &(checkpoint.sequence as i64),
                    &state,
                    &next_nodes,
                    &interrupt,
                    &metadata,
                    &checkpoint.engine_version,
                    &(checkpoint.format_version as i32),
                    &checkpoint.created_at,
                ],
            )
            .await
            .map_err(|e| storage("put", e))?;

        if inserted == 0 {
            return Err(CheckpointError::SequenceConflict {
                thread_id: checkpoint.thread_id,
                sequence: checkpoint.sequence,
            }
            .into());
        }
        Ok(())
    }

    async fn get(&self, thread_id: &str, sequence: Option<u64>) -> Result<Option<Checkpoint>> {
        let row = match sequence {
            Some(seq) => {
                self.client
                    .query_opt(
                        &format!(
                            "SELECT {COLUMNS} FROM waypoint_checkpoints
                             WHERE thread_id = $1 AND sequence = $2"
                        ),
                        &[&thread_id, &(seq as i64)],
                    )
                    .await
            }
            None => {
                self.client
                    .query_opt(
                        &format!(
                            "SELECT {COLUMNS} FROM waypoint_checkpoints
                             WHERE thread_id = $1
                             ORDER BY sequence DESC
                             LIMIT 1"
                        ),
                        &[&thread_id],
                    )
                    .await
            }
        }
        .map_err(|e| storage("get", e))?;

        row.as_ref().map(row_to_checkpoint).transpose()
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM waypoint_checkpoints
                     WHERE thread_id = $1
                     ORDER BY sequence ASC"
                ),
                &[&thread_id],
            )
            .await
            .map_err(|e| storage("history", e))?;

        rows.iter().map(row_to_checkpoint).collect()
    }

    async fn list_threads(&self) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT DISTINCT thread_id FROM waypoint_checkpoints ORDER BY thread_id",
                &[],
            )
            .await
            .map_err(|e| storage("list_threads", e))?;
        Ok(rows.iter().map(|row| row.get("thread_id")).collect())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.client
            .execute(
                "DELETE FROM waypoint_checkpoints WHERE thread_id = $1",
                &[&thread_id],
            )
            .await
            .map_err(|e| storage("delete", e))?;
        Ok(())
    }
}

fn row_to_checkpoint(row: &tokio_postgres::Row) -> Result<Checkpoint> {
    let sequence: i64 = row.get("sequence");
    let format_version: i32 = row.get("format_version");
    let interrupt: Option<Value> = row.get("interrupt");

    Ok(Checkpoint {
        thread_id: row.get("thread_id"),
        sequence: sequence as u64,
        state: serde_json::from_value(row.get("state"))?,
        next_nodes: serde_json::from_value(row.get("next_nodes"))?,
        interrupt: interrupt.map(serde_json::from_value).transpose()?,
        metadata: serde_json::from_value(row.get("metadata"))?,
        engine_version: row.get("engine_version"),
        format_version: format_version as u32,
        created_at: row.get("created_at"),
    })
}
