//! Database initialization
//!
//! Creates the shared SQLite database on first run and brings the schema up
//! idempotently. Both the coordinator and the workers open the same file;
//! WAL mode keeps concurrent readers alive alongside the single writer.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_connection(&pool).await?;
    create_schema(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

/// In-memory database for tests; same schema and defaults as the real one.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    configure_connection(&pool).await?;
    create_schema(&pool).await?;
    init_default_settings(&pool).await?;
    Ok(pool)
}

async fn configure_connection(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;
    // WAL allows concurrent readers with one writer; workers poll while the
    // coordinator writes.
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;
    Ok(())
}

/// Create all tables (idempotent - safe to call multiple times)
async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'queued',
            error TEXT,
            output_format TEXT NOT NULL DEFAULT 'mp3',
            output_bitrate_kbps INTEGER NOT NULL DEFAULT 128,
            voice_assignments TEXT NOT NULL DEFAULT '{}',
            output_files TEXT NOT NULL DEFAULT '[]',
            total_chapters INTEGER NOT NULL DEFAULT 0,
            completed_chapters INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chapters (
            job_id TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
            chapter_index INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            completed_chunks INTEGER NOT NULL DEFAULT 0,
            total_chunks INTEGER NOT NULL DEFAULT 0,
            current_chunk INTEGER NOT NULL DEFAULT 0,
            worker_name TEXT,
            artifact_path TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (job_id, chapter_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            job_id TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
            chapter_index INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            speaker TEXT NOT NULL DEFAULT 'default',
            text TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0,
            not_before TEXT,
            error TEXT,
            artifact_path TEXT,
            PRIMARY KEY (job_id, chapter_index, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one live claim per chunk, by primary key construction.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS claims (
            job_id TEXT NOT NULL,
            chapter_index INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            worker_name TEXT NOT NULL,
            claimed_at TEXT NOT NULL,
            heartbeat_at TEXT NOT NULL,
            PRIMARY KEY (job_id, chapter_index, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

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

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lexicon (
            word TEXT PRIMARY KEY,
            replacement TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Worker registry: the dispatcher writes desired/drain state, workers
    // report liveness between chunks.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workers (
            worker_name TEXT PRIMARY KEY,
            pid INTEGER,
            started_at TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            drain_requested INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or update default settings
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Segmentation
    ensure_setting(pool, "chunk_char_budget", "450").await?;

    // Worker pool
    ensure_setting(pool, "desired_workers", "1").await?;
    ensure_setting(pool, "claim_timeout_secs", "120").await?;
    ensure_setting(pool, "heartbeat_interval_secs", "10").await?;

    // Retry policy (bounded exponential backoff)
    ensure_setting(pool, "retry_max_attempts", "3").await?;
    ensure_setting(pool, "retry_backoff_base_ms", "1000").await?;
    ensure_setting(pool, "retry_backoff_factor", "2.0").await?;
    ensure_setting(pool, "retry_backoff_cap_ms", "30000").await?;

    // Synthesis defaults
    ensure_setting(pool, "model_server_url", "http://127.0.0.1:8004").await?;
    ensure_setting(pool, "audio_sample_rate", "24000").await?;
    ensure_setting(pool, "default_voice_id", "").await?;
    ensure_setting(pool, "gen_language", "pl").await?;
    ensure_setting(pool, "gen_temperature", "0.8").await?;
    ensure_setting(pool, "gen_top_p", "0.95").await?;
    ensure_setting(pool, "gen_repetition_penalty", "1.2").await?;
    ensure_setting(pool, "gen_cfg_weight", "0.5").await?;
    ensure_setting(pool, "gen_exaggeration", "0.5").await?;
    ensure_setting(pool, "gen_speed_factor", "1.0").await?;

    // Pipeline parameters (see params.rs for the snapshot struct)
    ensure_setting(pool, "pipeline_version", "1").await?;
    ensure_setting(pool, "denoise_enabled", "false").await?;
    ensure_setting(pool, "denoise_strength", "0.5").await?;
    ensure_setting(pool, "trim_enabled", "false").await?;
    ensure_setting(pool, "trim_threshold_pct", "2.0").await?;
    ensure_setting(pool, "trim_margin_s", "0.2").await?;
    ensure_setting(pool, "validation_enabled", "false").await?;
    ensure_setting(pool, "validation_language", "pl").await?;
    ensure_setting(pool, "validation_similarity", "0.5").await?;
    ensure_setting(pool, "validation_hard_fail", "false").await?;

    // Assembly / output
    ensure_setting(pool, "intro_silence_ms", "0").await?;
    ensure_setting(pool, "inter_chunk_silence_ms", "0").await?;
    ensure_setting(pool, "sentence_pause_ms", "500").await?;
    ensure_setting(pool, "crossfade_ms", "0").await?;
    ensure_setting(pool, "group_chunks_by_speaker", "false").await?;
    ensure_setting(pool, "target_loudness_lufs", "-18.0").await?;

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    // INSERT OR IGNORE handles concurrent initialization races.
    sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(default_value)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_database_creates_schema_and_defaults() {
        let pool = init_memory_database().await.unwrap();

        let job_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(job_count, 0);

        let budget: String =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = 'chunk_char_budget'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(budget, "450");
    }

    #[tokio::test]
    async fn ensure_setting_does_not_overwrite_existing_value() {
        let pool = init_memory_database().await.unwrap();
        sqlx::query("UPDATE settings SET value = '7' WHERE key = 'desired_workers'")
            .execute(&pool)
            .await
            .unwrap();

        ensure_setting(&pool, "desired_workers", "1").await.unwrap();

        let value: String =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = 'desired_workers'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(value, "7");
    }
}
