use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::de::DeserializeOwned;

use waypoint_core::error::{CheckpointError, Result, WaypointError};

use crate::store::CheckpointStore;
use crate::types::Checkpoint;

/// SQLite-backed checkpoint store for embedded, file-based persistence.
///
/// Thread-safe via `Arc<Mutex<Connection>>`. All SQLite operations are
/// dispatched to a blocking thread via `tokio::task::spawn_blocking`. The
/// database runs in WAL mode with `synchronous = FULL`, so a `put` that
/// returned `Ok` survives a process crash.
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

const COLUMNS: &str = "thread_id, sequence, state, next_nodes, interrupt, metadata, \
                       engine_version, format_version, created_at";

impl SqliteCheckpointStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| storage(format!("failed to open database: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;")
            .map_err(|e| storage(format!("failed to configure database: {e}")))?;
        tracing::info!(path = %path.as_ref().display(), "opened sqlite checkpoint store");
        Self::from_connection(conn)
    }

    /// Create an in-memory SQLite database (useful for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| storage(format!("failed to open in-memory db: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                state TEXT NOT NULL,
                next_nodes TEXT NOT NULL,
                interrupt TEXT,
                metadata TEXT NOT NULL,
                engine_version TEXT NOT NULL,
                format_version INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (thread_id, sequence)
            );",
        )
        .map_err(|e| storage(format!("failed to create table: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn)?;
            f(&guard)
        })
        .await
        .map_err(|e| storage(format!("spawn_blocking: {e}")))?
    }
}

fn storage(message: String) -> WaypointError {
    CheckpointError::Storage(message).into()
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| storage("sqlite connection lock poisoned".into()))
}

fn decode_json<T: DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Checkpoint> {
    let sequence: i64 = row.get(1)?;
    let interrupt: Option<String> = row.get(4)?;
    let format_version: i64 = row.get(7)?;
    let created_at: String = row.get(8)?;
    let created_at: DateTime<Utc> = created_at
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

    Ok(Checkpoint {
        thread_id: row.get(0)?,
        sequence: sequence as u64,
        state: decode_json(2, &row.get::<_, String>(2)?)?,
        next_nodes: decode_json(3, &row.get::<_, String>(3)?)?,
        interrupt: interrupt.map(|raw| decode_json(4, &raw)).transpose()?,
        metadata: decode_json(5, &row.get::<_, String>(5)?)?,
        engine_version: row.get(6)?,
        format_version: format_version as u32,
        created_at,
    })
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        self.with_conn(move |conn| {
            let state = serde_json::to_string(&checkpoint.state)?;
            let next_nodes = serde_json::to_string(&checkpoint.next_nodes)?;
            let interrupt = checkpoint
                .interrupt
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let metadata = serde_json::to_string(&checkpoint.metadata)?;

            let inserted = conn.execute(
                &format!("INSERT INTO checkpoints ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
                params![
                    checkpoint.thread_id,
                    checkpoint.sequence as i64,
                    state,
                    next_nodes,
                    interrupt,
                    metadata,
                    checkpoint.engine_version,
                    checkpoint.format_version as i64,
                    checkpoint.created_at.to_rfc3339(),
                ],
            );

            match inserted {
                Ok(_) => {
                    tracing::debug!(
                        thread_id = %checkpoint.thread_id,
                        sequence = checkpoint.sequence,
                        "checkpoint stored in sqlite"
                    );
                    Ok(())
                }
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    Err(CheckpointError::SequenceConflict {
                        thread_id: checkpoint.thread_id,
                        sequence: checkpoint.sequence,
                    }
                    .into())
                }
                Err(e) => Err(storage(format!("insert checkpoint: {e}"))),
            }
        })
        .await
    }

    async fn get(&self, thread_id: &str, sequence: Option<u64>) -> Result<Option<Checkpoint>> {
        let thread_id = thread_id.to_owned();
        self.with_conn(move |conn| {
            let found = match sequence {
                Some(seq) => conn
                    .query_row(
                        &format!(
                            "SELECT {COLUMNS} FROM checkpoints WHERE thread_id = ?1 AND sequence = ?2"
                        ),
                        params![thread_id, seq as i64],
                        row_to_checkpoint,
                    )
                    .optional(),
                None => conn
                    .query_row(
                        &format!(
                            "SELECT {COLUMNS} FROM checkpoints WHERE thread_id = ?1
                             ORDER BY sequence DESC LIMIT 1"
                        ),
                        params![thread_id],
                        row_to_checkpoint,
                    )
                    .optional(),
            };
            found.map_err(|e| storage(format!("query checkpoint: {e}")))
        })
        .await
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let thread_id = thread_id.to_owned();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {COLUMNS} FROM checkpoints WHERE thread_id = ?1 ORDER BY sequence ASC"
                ))
                .map_err(|e| storage(format!("prepare history: {e}")))?;
            let rows = stmt
                .query_map(params![thread_id], row_to_checkpoint)
                .map_err(|e| storage(format!("query history: {e}")))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| storage(format!("read history: {e}")))
        })
        .await
    }

    async fn list_threads(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT thread_id FROM checkpoints ORDER BY thread_id")
                .map_err(|e| storage(format!("prepare list_threads: {e}")))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| storage(format!("query list_threads: {e}")))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| storage(format!("read list_threads: {e}")))
        })
        .await
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let thread_id = thread_id.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM checkpoints WHERE thread_id = ?1",
                params![thread_id],
            )
            .map_err(|e| storage(format!("delete thread: {e}")))?;
            Ok(())
        })
        .await
    }
}
