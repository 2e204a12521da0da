//! The checkpoint store: one durable row per approval thread.
//!
//! Rows are keyed by `thread_id` and carry the opaque working state as JSON
//! bytes plus the metadata JSON. Decision lookups go through the append-only
//! `approval_index` table — every approval request id ever minted maps to
//! its thread, written inside the same transaction as the checkpoint, so
//! superseded ids keep resolving for idempotent replays.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqliteConnection;

use crate::error::Result;

/// A raw checkpoint row.
#[derive(Debug, Clone)]
pub struct CheckpointRow {
    /// Durable thread identifier (`action-<id>` or `demo:<alert_id>`).
    pub thread_id: String,
    /// Opaque working state, JSON-encoded.
    pub checkpoint: Option<Vec<u8>>,
    /// Metadata JSON (authoritative thread status lives here).
    pub metadata: Option<String>,
}

impl CheckpointRow {
    /// Deserialize the working state into `T`, tolerating missing blobs.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Serialization`] when the stored JSON
    /// does not match `T`.
    pub fn state<T: DeserializeOwned + Default>(&self) -> Result<T> {
        match &self.checkpoint {
            Some(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(bytes)?),
            _ => Ok(T::default()),
        }
    }

    /// Deserialize the metadata into `T`, tolerating missing values.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Serialization`] when the stored JSON
    /// does not match `T`.
    pub fn metadata<T: DeserializeOwned + Default>(&self) -> Result<T> {
        match self.metadata.as_deref() {
            Some(raw) if !raw.is_empty() => Ok(serde_json::from_str(raw)?),
            _ => Ok(T::default()),
        }
    }
}

/// Load a checkpoint row by thread id.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on query failure.
pub async fn load(conn: &mut SqliteConnection, thread_id: &str) -> Result<Option<CheckpointRow>> {
    let row: Option<(String, Option<Vec<u8>>, Option<String>)> = sqlx::query_as(
        "SELECT thread_id, checkpoint, metadata FROM langgraph_checkpoints WHERE thread_id = ?1",
    )
    .bind(thread_id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(|(thread_id, checkpoint, metadata)| CheckpointRow {
        thread_id,
        checkpoint,
        metadata,
    }))
}

/// Insert or replace a checkpoint.
///
/// # Errors
///
/// Returns [`crate::error::Error::Serialization`] when either value fails to
/// encode and [`crate::error::Error::Database`] on write failure.
pub async fn upsert<S: Serialize, M: Serialize>(
    conn: &mut SqliteConnection,
    thread_id: &str,
    state: &S,
    metadata: &M,
) -> Result<()> {
    let checkpoint_bytes = serde_json::to_vec(state)?;
    let metadata_json = serde_json::to_string(metadata)?;
    sqlx::query(
        "INSERT INTO langgraph_checkpoints (thread_id, checkpoint, metadata) \
         VALUES (?1, ?2, ?3) \
         ON CONFLICT (thread_id) DO UPDATE SET \
             checkpoint = excluded.checkpoint, \
             metadata = excluded.metadata",
    )
    .bind(thread_id)
    .bind(checkpoint_bytes)
    .bind(metadata_json)
    .execute(conn)
    .await?;
    Ok(())
}

/// Record a freshly minted approval request id for its thread.
///
/// The index is append-only: superseded ids stay resolvable so idempotent
/// replays of old deliveries still find their thread.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on write failure.
pub async fn index_approval(
    conn: &mut SqliteConnection,
    approval_request_id: &str,
    thread_id: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO approval_index (approval_request_id, thread_id) VALUES (?1, ?2) \
         ON CONFLICT (approval_request_id) DO UPDATE SET thread_id = excluded.thread_id",
    )
    .bind(approval_request_id)
    .bind(thread_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Resolve the thread holding the given approval request id (current or
/// superseded).
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on query failure.
pub async fn find_thread_by_approval(
    conn: &mut SqliteConnection,
    approval_request_id: &str,
) -> Result<Option<String>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT thread_id FROM approval_index WHERE approval_request_id = ?1")
            .bind(approval_request_id)
            .fetch_optional(conn)
            .await?;
    Ok(row.map(|(thread_id,)| thread_id))
}

/// List every checkpoint row (history views, chat thread lookups).
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on query failure.
pub async fn list_all(conn: &mut SqliteConnection) -> Result<Vec<CheckpointRow>> {
    let rows: Vec<(String, Option<Vec<u8>>, Option<String>)> =
        sqlx::query_as("SELECT thread_id, checkpoint, metadata FROM langgraph_checkpoints")
            .fetch_all(conn)
            .await?;
    Ok(rows
        .into_iter()
        .map(|(thread_id, checkpoint, metadata)| CheckpointRow {
            thread_id,
            checkpoint,
            metadata,
        })
        .collect())
}
