//! Sync delta audit log
//!
//! Append-only: every delta received from a device is recorded (compressed)
//! before reconciliation and marked applied once merged. The log exists for
//! audit and post-hoc reconciliation debugging, never as a source of truth.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use cq_common::compress::{compress_blob, decompress_blob};
use cq_common::types::SyncDelta;
use cq_common::{Error, Result};

/// Append a received delta; returns the log row id
pub async fn append(pool: &SqlitePool, delta: &SyncDelta) -> Result<i64> {
    let payload = serde_json::to_vec(&delta.payload)
        .map_err(|e| Error::Internal(format!("Failed to serialize delta payload: {}", e)))?;
    let compressed = compress_blob(&payload)?;

    let result = sqlx::query(
        "INSERT INTO sync_deltas (session_id, device_id, lamport, payload, received_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(delta.session_id.to_string())
    .bind(delta.device_id.to_string())
    .bind(delta.lamport as i64)
    .bind(compressed)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Mark log rows as merged into the authoritative state
pub async fn mark_applied(pool: &SqlitePool, ids: &[i64]) -> Result<()> {
    for id in ids {
        sqlx::query("UPDATE sync_deltas SET applied = 1 WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// A decoded audit log row, for data export
#[derive(Debug, serde::Serialize)]
pub struct DeltaLogEntry {
    pub device_id: Uuid,
    pub lamport: u64,
    pub payload: serde_json::Value,
    pub received_at: String,
    pub applied: bool,
}

/// Decode the full audit log for a session, oldest first
pub async fn export_log(pool: &SqlitePool, session_id: Uuid) -> Result<Vec<DeltaLogEntry>> {
    let rows: Vec<(String, i64, Vec<u8>, String, i64)> = sqlx::query_as(
        "SELECT device_id, lamport, payload, received_at, applied
         FROM sync_deltas WHERE session_id = ? ORDER BY id",
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(device_id, lamport, payload, received_at, applied)| {
            let device_id = Uuid::parse_str(&device_id)
                .map_err(|e| Error::Internal(format!("Failed to parse device_id: {}", e)))?;
            let decompressed = decompress_blob(&payload)?;
            let payload = serde_json::from_slice(&decompressed)
                .map_err(|e| Error::Internal(format!("Failed to decode delta payload: {}", e)))?;
            Ok(DeltaLogEntry {
                device_id,
                lamport: lamport as u64,
                payload,
                received_at,
                applied: applied != 0,
            })
        })
        .collect()
}

/// Count of rows still pending application (diagnostics)
pub async fn pending_count(pool: &SqlitePool, session_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sync_deltas WHERE session_id = ? AND applied = 0",
    )
    .bind(session_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cq_common::db::connect_memory;
    use cq_common::types::{CulturalContext, DeltaPayload, WorldStatus};

    #[tokio::test]
    async fn append_and_mark_applied() {
        let pool = connect_memory().await.unwrap();
        let session = crate::db::sessions::create_session(
            &pool,
            &cq_common::codes::hash_code("AB3DFJ9Q"),
            &CulturalContext::default(),
            chrono::Duration::days(30),
        )
        .await
        .unwrap();

        let delta = SyncDelta {
            device_id: Uuid::new_v4(),
            session_id: session.session_id,
            lamport: 3,
            payload: DeltaPayload::StatusChange {
                world_index: 1,
                status: WorldStatus::InProgress,
            },
        };

        let id = append(&pool, &delta).await.unwrap();
        assert_eq!(pending_count(&pool, session.session_id).await.unwrap(), 1);

        mark_applied(&pool, &[id]).await.unwrap();
        assert_eq!(pending_count(&pool, session.session_id).await.unwrap(), 0);
    }
}
