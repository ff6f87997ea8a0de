//! World slot leases
//!
//! Only one device may hold an active lease on a world slot at a time. The
//! lease expires after a configured idle period so a crashed device never
//! permanently locks the slot; an expired lease may be taken over, and the
//! evicted device's late checkpoint is handled as a conflicting sync delta.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

use cq_common::{Error, Result};

#[derive(Debug, Clone)]
pub struct WorldLease {
    pub session_id: Uuid,
    pub world_index: u8,
    pub device_id: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub renewed_at: DateTime<Utc>,
}

/// Acquire (or renew, or take over an expired) lease.
///
/// Fails with `WorldAlreadyActive` when another device holds an unexpired
/// lease on the slot.
pub async fn acquire(
    pool: &SqlitePool,
    session_id: Uuid,
    world_index: u8,
    device_id: Uuid,
    idle_window: chrono::Duration,
) -> Result<WorldLease> {
    let now = Utc::now();

    let existing = sqlx::query(
        "SELECT device_id, acquired_at, renewed_at
         FROM world_leases WHERE session_id = ? AND world_index = ?",
    )
    .bind(session_id.to_string())
    .bind(world_index as i64)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = existing {
        let holder_str: String = row.get("device_id");
        let holder = Uuid::parse_str(&holder_str)
            .map_err(|e| Error::Internal(format!("Failed to parse lease device_id: {}", e)))?;
        let renewed_at: String = row.get("renewed_at");
        let renewed_at = DateTime::parse_from_rfc3339(&renewed_at)
            .map_err(|e| Error::Internal(format!("Failed to parse renewed_at: {}", e)))?
            .with_timezone(&Utc);

        let expired = renewed_at + idle_window < now;
        if holder != device_id && !expired {
            return Err(Error::WorldAlreadyActive(world_index));
        }
        if holder != device_id {
            info!(
                session_id = %session_id,
                world_index,
                evicted = %holder,
                new_holder = %device_id,
                "Taking over expired world lease"
            );
        }

        sqlx::query(
            "UPDATE world_leases SET device_id = ?, acquired_at = ?, renewed_at = ?
             WHERE session_id = ? AND world_index = ?",
        )
        .bind(device_id.to_string())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(session_id.to_string())
        .bind(world_index as i64)
        .execute(pool)
        .await?;
    } else {
        sqlx::query(
            "INSERT INTO world_leases (session_id, world_index, device_id, acquired_at, renewed_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id.to_string())
        .bind(world_index as i64)
        .bind(device_id.to_string())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(pool)
        .await?;
    }

    Ok(WorldLease {
        session_id,
        world_index,
        device_id,
        acquired_at: now,
        renewed_at: now,
    })
}

/// Confirm the device still holds the lease and push the idle window forward
pub async fn renew(
    pool: &SqlitePool,
    session_id: Uuid,
    world_index: u8,
    device_id: Uuid,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE world_leases SET renewed_at = ?
         WHERE session_id = ? AND world_index = ? AND device_id = ?",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(session_id.to_string())
    .bind(world_index as i64)
    .bind(device_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        // Slot was taken over after the idle window elapsed
        return Err(Error::WorldAlreadyActive(world_index));
    }
    Ok(())
}

/// Release the lease on completion or abandonment
pub async fn release(
    pool: &SqlitePool,
    session_id: Uuid,
    world_index: u8,
    device_id: Uuid,
) -> Result<()> {
    sqlx::query(
        "DELETE FROM world_leases
         WHERE session_id = ? AND world_index = ? AND device_id = ?",
    )
    .bind(session_id.to_string())
    .bind(world_index as i64)
    .bind(device_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cq_common::db::connect_memory;
    use cq_common::types::CulturalContext;

    async fn setup() -> (SqlitePool, Uuid) {
        let pool = connect_memory().await.unwrap();
        let session = crate::db::sessions::create_session(
            &pool,
            &cq_common::codes::hash_code("AB3DFJ9Q"),
            &CulturalContext::default(),
            chrono::Duration::days(30),
        )
        .await
        .unwrap();
        (pool, session.session_id)
    }

    #[tokio::test]
    async fn second_device_is_refused_while_lease_is_live() {
        let (pool, session_id) = setup().await;
        let device_a = Uuid::new_v4();
        let device_b = Uuid::new_v4();
        let idle = chrono::Duration::seconds(120);

        acquire(&pool, session_id, 2, device_a, idle).await.unwrap();
        let err = acquire(&pool, session_id, 2, device_b, idle).await.unwrap_err();
        assert!(matches!(err, Error::WorldAlreadyActive(2)));

        // Same device may re-acquire its own lease
        acquire(&pool, session_id, 2, device_a, idle).await.unwrap();
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over() {
        let (pool, session_id) = setup().await;
        let device_a = Uuid::new_v4();
        let device_b = Uuid::new_v4();

        // Zero idle window: device A's lease expires immediately
        acquire(&pool, session_id, 2, device_a, chrono::Duration::seconds(-1))
            .await
            .unwrap();
        let lease = acquire(&pool, session_id, 2, device_b, chrono::Duration::seconds(-1))
            .await
            .unwrap();
        assert_eq!(lease.device_id, device_b);

        // The evicted device can no longer renew
        let err = renew(&pool, session_id, 2, device_a).await.unwrap_err();
        assert!(matches!(err, Error::WorldAlreadyActive(2)));
    }

    #[tokio::test]
    async fn release_frees_the_slot() {
        let (pool, session_id) = setup().await;
        let device_a = Uuid::new_v4();
        let device_b = Uuid::new_v4();
        let idle = chrono::Duration::seconds(120);

        acquire(&pool, session_id, 3, device_a, idle).await.unwrap();
        release(&pool, session_id, 3, device_a).await.unwrap();
        acquire(&pool, session_id, 3, device_b, idle).await.unwrap();
    }
}
