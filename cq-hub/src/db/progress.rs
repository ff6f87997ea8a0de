//! World progress persistence

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use cq_common::types::{WorldProgress, WorldStatus, WORLD_COUNT};
use cq_common::{Error, Result};

fn parse_optional_timestamp(raw: Option<String>, field: &str) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
    })
    .transpose()
}

fn parse_optional_device(raw: Option<String>, field: &str) -> Result<Option<Uuid>> {
    raw.map(|s| {
        Uuid::parse_str(&s).map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
    })
    .transpose()
}

fn progress_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<WorldProgress> {
    let status: String = row.get("status");
    Ok(WorldProgress {
        world_index: row.get::<i64, _>("world_index") as u8,
        status: WorldStatus::parse(&status)?,
        score: row.get("score"),
        started_at: parse_optional_timestamp(row.get("started_at"), "started_at")?,
        completed_at: parse_optional_timestamp(row.get("completed_at"), "completed_at")?,
        state_blob: row.get("state_blob"),
        status_lamport: row.get::<i64, _>("status_lamport") as u64,
        status_device: parse_optional_device(row.get("status_device"), "status_device")?,
        blob_lamport: row.get::<i64, _>("blob_lamport") as u64,
        blob_device: parse_optional_device(row.get("blob_device"), "blob_device")?,
    })
}

/// Load all five world slots, ordered by index
pub async fn load_worlds(pool: &SqlitePool, session_id: Uuid) -> Result<Vec<WorldProgress>> {
    let rows = sqlx::query(
        "SELECT world_index, status, score, started_at, completed_at, state_blob,
                status_lamport, status_device, blob_lamport, blob_device
         FROM world_progress WHERE session_id = ? ORDER BY world_index",
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    let worlds: Vec<WorldProgress> = rows.iter().map(progress_from_row).collect::<Result<_>>()?;
    if worlds.len() != WORLD_COUNT as usize {
        return Err(Error::Internal(format!(
            "Session {} has {} world slots, expected {}",
            session_id,
            worlds.len(),
            WORLD_COUNT
        )));
    }
    Ok(worlds)
}

pub async fn load_world(pool: &SqlitePool, session_id: Uuid, world_index: u8) -> Result<WorldProgress> {
    let row = sqlx::query(
        "SELECT world_index, status, score, started_at, completed_at, state_blob,
                status_lamport, status_device, blob_lamport, blob_device
         FROM world_progress WHERE session_id = ? AND world_index = ?",
    )
    .bind(session_id.to_string())
    .bind(world_index as i64)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => progress_from_row(&row),
        None => Err(Error::NotFound(format!(
            "World {} for session {}",
            world_index, session_id
        ))),
    }
}

/// Write a status movement, recording the logical-clock provenance of the
/// write for later last-writer-wins reconciliation
pub async fn update_status(
    pool: &SqlitePool,
    session_id: Uuid,
    world_index: u8,
    status: WorldStatus,
    lamport: u64,
    device_id: Option<Uuid>,
) -> Result<()> {
    let started_at = if status == WorldStatus::InProgress {
        Some(Utc::now().to_rfc3339())
    } else {
        None
    };

    sqlx::query(
        "UPDATE world_progress
         SET status = ?, status_lamport = ?, status_device = ?,
             started_at = COALESCE(started_at, ?),
             updated_at = CURRENT_TIMESTAMP
         WHERE session_id = ? AND world_index = ?",
    )
    .bind(status.as_str())
    .bind(lamport as i64)
    .bind(device_id.map(|d| d.to_string()))
    .bind(started_at)
    .bind(session_id.to_string())
    .bind(world_index as i64)
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist an interim state blob (already compressed)
pub async fn save_blob(
    pool: &SqlitePool,
    session_id: Uuid,
    world_index: u8,
    blob: &[u8],
    lamport: u64,
    device_id: Option<Uuid>,
) -> Result<()> {
    sqlx::query(
        "UPDATE world_progress
         SET state_blob = ?, blob_lamport = ?, blob_device = ?, updated_at = CURRENT_TIMESTAMP
         WHERE session_id = ? AND world_index = ?",
    )
    .bind(blob)
    .bind(lamport as i64)
    .bind(device_id.map(|d| d.to_string()))
    .bind(session_id.to_string())
    .bind(world_index as i64)
    .execute(pool)
    .await?;
    Ok(())
}

/// Finalize a world: completed status plus score and completion timestamp
pub async fn record_completion(
    pool: &SqlitePool,
    session_id: Uuid,
    world_index: u8,
    score: i64,
    lamport: u64,
    device_id: Option<Uuid>,
) -> Result<()> {
    sqlx::query(
        "UPDATE world_progress
         SET status = 'completed', score = ?, completed_at = ?,
             status_lamport = ?, status_device = ?, updated_at = CURRENT_TIMESTAMP
         WHERE session_id = ? AND world_index = ?",
    )
    .bind(score)
    .bind(Utc::now().to_rfc3339())
    .bind(lamport as i64)
    .bind(device_id.map(|d| d.to_string()))
    .bind(session_id.to_string())
    .bind(world_index as i64)
    .execute(pool)
    .await?;
    Ok(())
}

/// Replace a completed world's score (conflict resolution: higher score wins)
pub async fn replace_score(
    pool: &SqlitePool,
    session_id: Uuid,
    world_index: u8,
    score: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE world_progress
         SET score = ?, updated_at = CURRENT_TIMESTAMP
         WHERE session_id = ? AND world_index = ? AND status = 'completed'",
    )
    .bind(score)
    .bind(session_id.to_string())
    .bind(world_index as i64)
    .execute(pool)
    .await?;
    Ok(())
}
