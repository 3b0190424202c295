//! Settings database access
//!
//! Read/write settings from the settings table (key-value store).
//! All settings are global/system-wide; values are stored as TEXT and parsed
//! through FromStr on the way out.

use crate::error::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

/// Generic setting getter
///
/// Returns None if key doesn't exist in database.
pub async fn get_setting<T: FromStr>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match value {
        Some(s) => match s.parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Setting getter with a fallback for missing keys.
pub async fn get_setting_or<T: FromStr>(db: &Pool<Sqlite>, key: &str, default: T) -> Result<T> {
    Ok(get_setting(db, key).await?.unwrap_or(default))
}

/// Generic setting setter
///
/// Inserts or updates setting in database.
pub async fn set_setting<T: ToString>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value)
        VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

/// Number of worker processes the dispatcher should keep alive.
pub async fn get_desired_workers(db: &Pool<Sqlite>) -> Result<usize> {
    get_setting_or(db, "desired_workers", 1).await
}

pub async fn set_desired_workers(db: &Pool<Sqlite>, count: usize) -> Result<()> {
    set_setting(db, "desired_workers", count.clamp(0, 64)).await
}

/// Claim heartbeat timeout; a claim older than this is treated as orphaned.
pub async fn get_claim_timeout_secs(db: &Pool<Sqlite>) -> Result<u64> {
    get_setting_or(db, "claim_timeout_secs", 120).await
}
