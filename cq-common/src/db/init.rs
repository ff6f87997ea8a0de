//! Database initialization
//!
//! Creates the database on first run with the full schema. All statements
//! are idempotent (`CREATE TABLE IF NOT EXISTS`) so startup is safe to
//! repeat, and foreign keys cascade so session erasure removes every child
//! record in one statement.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_and_migrate(&pool).await?;
    Ok(pool)
}

/// In-memory database for tests
pub async fn connect_memory() -> Result<SqlitePool> {
    // Single connection so every query sees the same in-memory database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    configure_and_migrate(&pool).await?;
    Ok(pool)
}

async fn configure_and_migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // WAL allows concurrent readers with one writer; multiple devices hit
    // the same session concurrently
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    create_settings_table(pool).await?;
    create_hub_sessions_table(pool).await?;
    create_world_progress_table(pool).await?;
    create_world_leases_table(pool).await?;
    create_sync_deltas_table(pool).await?;
    create_session_achievements_table(pool).await?;

    init_default_settings(pool).await?;

    Ok(())
}

/// Create the settings table
///
/// Stores engine tunables as key-value pairs, editable without a redeploy.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_hub_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hub_sessions (
            session_id TEXT PRIMARY KEY,
            code_hash TEXT NOT NULL,
            cultural_context TEXT NOT NULL DEFAULT 'default',
            total_score INTEGER NOT NULL DEFAULT 0,
            worlds_completed INTEGER NOT NULL DEFAULT 0,
            clock INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            last_active_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            CHECK (total_score >= 0),
            CHECK (worlds_completed >= 0 AND worlds_completed <= 5),
            CHECK (length(code_hash) = 64)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // O(1) code validation goes through this index; uniqueness among active
    // codes is enforced at issuance time, not by the schema, because an
    // expired session may linger until the retention sweep while its code
    // is reissued
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_hub_sessions_code_hash ON hub_sessions(code_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_hub_sessions_expires ON hub_sessions(expires_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_world_progress_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS world_progress (
            session_id TEXT NOT NULL REFERENCES hub_sessions(session_id) ON DELETE CASCADE,
            world_index INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'locked'
                CHECK (status IN ('locked', 'unlocked', 'in_progress', 'completed', 'abandoned')),
            score INTEGER,
            started_at TEXT,
            completed_at TEXT,
            state_blob BLOB,
            status_lamport INTEGER NOT NULL DEFAULT 0,
            status_device TEXT,
            blob_lamport INTEGER NOT NULL DEFAULT 0,
            blob_device TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (session_id, world_index),
            CHECK (world_index >= 1 AND world_index <= 5),
            CHECK (score IS NULL OR score >= 0),
            CHECK (status != 'completed' OR score IS NOT NULL)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_world_leases_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS world_leases (
            session_id TEXT NOT NULL REFERENCES hub_sessions(session_id) ON DELETE CASCADE,
            world_index INTEGER NOT NULL,
            device_id TEXT NOT NULL,
            acquired_at TEXT NOT NULL,
            renewed_at TEXT NOT NULL,
            PRIMARY KEY (session_id, world_index),
            CHECK (world_index >= 1 AND world_index <= 5)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sync_deltas_table(pool: &SqlitePool) -> Result<()> {
    // Append-only audit log; rows are marked applied once merged and are
    // never read back as a source of truth
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_deltas (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES hub_sessions(session_id) ON DELETE CASCADE,
            device_id TEXT NOT NULL,
            lamport INTEGER NOT NULL,
            payload BLOB NOT NULL,
            applied INTEGER NOT NULL DEFAULT 0,
            received_at TEXT NOT NULL,
            CHECK (applied IN (0, 1))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_deltas_session ON sync_deltas(session_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_session_achievements_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_achievements (
            session_id TEXT NOT NULL REFERENCES hub_sessions(session_id) ON DELETE CASCADE,
            achievement_id TEXT NOT NULL,
            scope TEXT NOT NULL CHECK (scope IN ('single_world', 'cross_world')),
            unlocked_at TEXT NOT NULL,
            PRIMARY KEY (session_id, achievement_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize default settings
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    super::settings::ensure_setting(pool, "retention_days", "30").await?;
    super::settings::ensure_setting(pool, "lease_idle_seconds", "120").await?;
    super::settings::ensure_setting(pool, "load_ceiling_ms", "3000").await?;
    super::settings::ensure_setting(pool, "code_retry_limit", "16").await?;
    super::settings::ensure_setting(pool, "commit_retry_ceiling_ms", "10000").await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_creation_is_idempotent() {
        let pool = connect_memory().await.unwrap();
        configure_and_migrate(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'hub_sessions'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn erasing_a_session_cascades_to_children() {
        let pool = connect_memory().await.unwrap();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO hub_sessions (session_id, code_hash, created_at, last_active_at, expires_at)
             VALUES ('s1', ?, ?, ?, ?)",
        )
        .bind("a".repeat(64))
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query("INSERT INTO world_progress (session_id, world_index) VALUES ('s1', 1)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO sync_deltas (session_id, device_id, lamport, payload, received_at)
             VALUES ('s1', 'd1', 1, x'00', ?)",
        )
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query("DELETE FROM hub_sessions WHERE session_id = 's1'")
            .execute(&pool)
            .await
            .unwrap();

        let progress: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM world_progress")
            .fetch_one(&pool)
            .await
            .unwrap();
        let deltas: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_deltas")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(progress, 0);
        assert_eq!(deltas, 0);
    }
}
