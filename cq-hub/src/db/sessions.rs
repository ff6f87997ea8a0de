//! Hub session persistence
//!
//! The `hub_sessions` row is the authoritative record for a session's totals
//! and retention timestamps. Mutation happens only through the Hub State
//! Manager and the Synchronizer; everything here is plain row access.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use cq_common::types::{CulturalContext, HubSession, HubState, WorldStatus, WORLD_COUNT};
use cq_common::{Error, Result};

fn parse_timestamp(raw: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
}

fn session_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<HubSession> {
    let session_id_str: String = row.get("session_id");
    let session_id = Uuid::parse_str(&session_id_str)
        .map_err(|e| Error::Internal(format!("Failed to parse session_id: {}", e)))?;

    let created_at: String = row.get("created_at");
    let last_active_at: String = row.get("last_active_at");
    let expires_at: String = row.get("expires_at");

    Ok(HubSession {
        session_id,
        code_hash: row.get("code_hash"),
        cultural_context: CulturalContext::new(row.get::<String, _>("cultural_context")),
        total_score: row.get("total_score"),
        worlds_completed: row.get::<i64, _>("worlds_completed") as u8,
        clock: row.get::<i64, _>("clock") as u64,
        created_at: parse_timestamp(&created_at, "created_at")?,
        last_active_at: parse_timestamp(&last_active_at, "last_active_at")?,
        expires_at: parse_timestamp(&expires_at, "expires_at")?,
    })
}

const SESSION_COLUMNS: &str = "session_id, code_hash, cultural_context, total_score, \
                               worlds_completed, clock, created_at, last_active_at, expires_at";

/// Insert a new session with its five world slots (world 1 starts unlocked)
pub async fn create_session(
    pool: &SqlitePool,
    code_hash: &str,
    context: &CulturalContext,
    retention: chrono::Duration,
) -> Result<HubSession> {
    let now = Utc::now();
    let session = HubSession {
        session_id: Uuid::new_v4(),
        code_hash: code_hash.to_string(),
        cultural_context: context.clone(),
        total_score: 0,
        worlds_completed: 0,
        clock: 0,
        created_at: now,
        last_active_at: now,
        expires_at: now + retention,
    };

    sqlx::query(
        r#"
        INSERT INTO hub_sessions (
            session_id, code_hash, cultural_context, total_score,
            worlds_completed, clock, created_at, last_active_at, expires_at
        ) VALUES (?, ?, ?, 0, 0, 0, ?, ?, ?)
        "#,
    )
    .bind(session.session_id.to_string())
    .bind(&session.code_hash)
    .bind(session.cultural_context.as_str())
    .bind(session.created_at.to_rfc3339())
    .bind(session.last_active_at.to_rfc3339())
    .bind(session.expires_at.to_rfc3339())
    .execute(pool)
    .await?;

    for index in 1..=WORLD_COUNT {
        let status = if index == 1 {
            WorldStatus::Unlocked
        } else {
            WorldStatus::Locked
        };
        sqlx::query("INSERT INTO world_progress (session_id, world_index, status) VALUES (?, ?, ?)")
            .bind(session.session_id.to_string())
            .bind(index as i64)
            .bind(status.as_str())
            .execute(pool)
            .await?;
    }

    Ok(session)
}

/// Look up a session by code hash; indexed, one row
pub async fn find_by_code_hash(pool: &SqlitePool, code_hash: &str) -> Result<Option<HubSession>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM hub_sessions WHERE code_hash = ? ORDER BY expires_at DESC LIMIT 1",
        SESSION_COLUMNS
    ))
    .bind(code_hash)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(session_from_row).transpose()
}

pub async fn find_by_id(pool: &SqlitePool, session_id: Uuid) -> Result<Option<HubSession>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM hub_sessions WHERE session_id = ?",
        SESSION_COLUMNS
    ))
    .bind(session_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(session_from_row).transpose()
}

pub async fn load_required(pool: &SqlitePool, session_id: Uuid) -> Result<HubSession> {
    find_by_id(pool, session_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Session {}", session_id)))
}

/// Record activity: bump `last_active_at` and extend `expires_at`.
///
/// `expires_at` only moves forward and never precedes `last_active_at`.
pub async fn touch(pool: &SqlitePool, session_id: Uuid, retention: chrono::Duration) -> Result<()> {
    let now = Utc::now();
    let expires = now + retention;
    sqlx::query(
        "UPDATE hub_sessions
         SET last_active_at = ?, expires_at = MAX(expires_at, ?)
         WHERE session_id = ?",
    )
    .bind(now.to_rfc3339())
    .bind(expires.to_rfc3339())
    .bind(session_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist recomputed totals and the merged logical clock
pub async fn update_totals(
    pool: &SqlitePool,
    session_id: Uuid,
    total_score: i64,
    worlds_completed: u8,
    clock: u64,
) -> Result<()> {
    sqlx::query(
        "UPDATE hub_sessions
         SET total_score = ?, worlds_completed = ?, clock = ?
         WHERE session_id = ?",
    )
    .bind(total_score)
    .bind(worlds_completed as i64)
    .bind(clock as i64)
    .bind(session_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Advance the session's merged logical clock (monotonic)
pub async fn bump_clock(pool: &SqlitePool, session_id: Uuid, clock: u64) -> Result<()> {
    sqlx::query("UPDATE hub_sessions SET clock = MAX(clock, ?) WHERE session_id = ?")
        .bind(clock as i64)
        .bind(session_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Load a full hub snapshot: session, five world slots, achievement ids
pub async fn load_state(pool: &SqlitePool, session_id: Uuid) -> Result<HubState> {
    let session = load_required(pool, session_id).await?;
    let worlds = super::progress::load_worlds(pool, session_id).await?;
    let achievements = super::achievements::load_ids(pool, session_id).await?;
    Ok(HubState {
        session,
        worlds,
        achievements: achievements.into_iter().collect(),
    })
}

/// Full, unrecoverable erasure: the session row plus every child record
/// (world blobs, delta log, achievements, leases) via cascading deletes
pub async fn erase_session(pool: &SqlitePool, session_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM hub_sessions WHERE session_id = ?")
        .bind(session_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete sessions whose retention window elapsed, with all children.
/// Returns the number of sessions removed.
pub async fn sweep_expired(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM hub_sessions WHERE expires_at < ?")
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
