//! Settings table access
//!
//! Tunables live in a key-value table so operators can adjust retention and
//! lease windows without a redeploy. Database values override the TOML file.

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::Result;

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset to the default.
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if !exists {
        // INSERT OR IGNORE handles concurrent initialization races
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(default_value)
            .execute(pool)
            .await?;
        return Ok(());
    }

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if value.is_none() {
        sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;
        warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
    }

    Ok(())
}

/// Read a single setting value
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?
        .flatten();
    Ok(value)
}

async fn get_parsed<T: std::str::FromStr>(pool: &SqlitePool, key: &str, fallback: T) -> Result<T> {
    match get_setting(pool, key).await? {
        Some(raw) => match raw.parse() {
            Ok(v) => Ok(v),
            Err(_) => {
                warn!("Setting '{}' has unparseable value '{}', using fallback", key, raw);
                Ok(fallback)
            }
        },
        None => Ok(fallback),
    }
}

/// Apply database setting overrides on top of a base configuration
pub async fn load_engine_config(pool: &SqlitePool, base: EngineConfig) -> Result<EngineConfig> {
    let config = EngineConfig {
        retention_days: get_parsed(pool, "retention_days", base.retention_days).await?,
        lease_idle_seconds: get_parsed(pool, "lease_idle_seconds", base.lease_idle_seconds).await?,
        load_ceiling_ms: get_parsed(pool, "load_ceiling_ms", base.load_ceiling_ms).await?,
        code_retry_limit: get_parsed(pool, "code_retry_limit", base.code_retry_limit).await?,
        commit_retry_ceiling_ms: get_parsed(pool, "commit_retry_ceiling_ms", base.commit_retry_ceiling_ms)
            .await?,
        event_capacity: base.event_capacity,
    };
    config.validate()?;
    info!(
        retention_days = config.retention_days,
        lease_idle_seconds = config.lease_idle_seconds,
        load_ceiling_ms = config.load_ceiling_ms,
        "Engine configuration loaded"
    );
    Ok(config)
}
