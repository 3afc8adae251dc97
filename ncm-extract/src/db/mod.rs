//! Database access for ncm-extract
//!
//! Local SQLite track catalog: every persisted playlist feeds its tracks
//! back in, and later merges use it to fill gaps.

pub mod catalog;

pub use catalog::SqliteCatalog;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Creates the parent directory and the file if missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create catalog tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            netease_id INTEGER PRIMARY KEY,
            name TEXT,
            duration_ms INTEGER,
            artist_names TEXT,
            album_name TEXT,
            raw_json TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS playlists (
            playlist_id TEXT PRIMARY KEY,
            name TEXT,
            track_count INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS playlist_tracks (
            playlist_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            netease_id INTEGER NOT NULL,
            PRIMARY KEY (playlist_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::debug!("Catalog tables initialized (tracks, playlists, playlist_tracks)");

    Ok(())
}
