//! Per-session achievement storage
//!
//! Achievements are stored as stable string ids, one row per unlock.
//! Insertion uses `INSERT OR IGNORE` so merging is a pure set union: an
//! achievement once unlocked by any device stays unlocked.

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use uuid::Uuid;

use cq_common::types::{AchievementScope, UnlockedAchievement};
use cq_common::Result;

/// Load the session's unlocked achievement ids, sorted
pub async fn load_ids(pool: &SqlitePool, session_id: Uuid) -> Result<BTreeSet<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT achievement_id FROM session_achievements WHERE session_id = ?",
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Full unlock records with scope and timestamp, for data export
pub async fn export(pool: &SqlitePool, session_id: Uuid) -> Result<Vec<UnlockedAchievement>> {
    let rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT achievement_id, scope, unlocked_at FROM session_achievements
         WHERE session_id = ? ORDER BY unlocked_at, achievement_id",
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(id, scope, unlocked_at)| {
            let scope = match scope.as_str() {
                "single_world" => AchievementScope::SingleWorld,
                _ => AchievementScope::CrossWorld,
            };
            let unlocked_at = chrono::DateTime::parse_from_rfc3339(&unlocked_at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    cq_common::Error::Internal(format!("Failed to parse unlocked_at: {}", e))
                })?;
            Ok(UnlockedAchievement {
                id,
                scope,
                unlocked_at,
            })
        })
        .collect()
}

/// Union new unlocks into the stored set; returns the ids actually added
pub async fn unlock(
    pool: &SqlitePool,
    session_id: Uuid,
    ids: &BTreeSet<String>,
    scope: AchievementScope,
) -> Result<Vec<String>> {
    let existing = load_ids(pool, session_id).await?;
    let now = Utc::now().to_rfc3339();
    let scope_str = match scope {
        AchievementScope::SingleWorld => "single_world",
        AchievementScope::CrossWorld => "cross_world",
    };

    let mut added = Vec::new();
    for id in ids {
        if existing.contains(id) {
            continue;
        }
        sqlx::query(
            "INSERT OR IGNORE INTO session_achievements (session_id, achievement_id, scope, unlocked_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(session_id.to_string())
        .bind(id)
        .bind(scope_str)
        .bind(&now)
        .execute(pool)
        .await?;
        added.push(id.clone());
    }

    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cq_common::db::connect_memory;
    use cq_common::types::CulturalContext;

    #[tokio::test]
    async fn unlock_is_a_set_union() {
        let pool = connect_memory().await.unwrap();
        let session = crate::db::sessions::create_session(
            &pool,
            &cq_common::codes::hash_code("AB3DFJ9Q"),
            &CulturalContext::default(),
            chrono::Duration::days(30),
        )
        .await
        .unwrap();

        let first: BTreeSet<String> =
            ["first-steps".to_string(), "quick-draw".to_string()].into_iter().collect();
        let added = unlock(&pool, session.session_id, &first, AchievementScope::CrossWorld)
            .await
            .unwrap();
        assert_eq!(added.len(), 2);

        // Re-unlocking adds nothing, set stays intact
        let added = unlock(&pool, session.session_id, &first, AchievementScope::CrossWorld)
            .await
            .unwrap();
        assert!(added.is_empty());
        assert_eq!(load_ids(&pool, session.session_id).await.unwrap().len(), 2);
    }
}
