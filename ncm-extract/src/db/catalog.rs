//! SQLite track catalog
//!
//! Stores the raw JSON of every track that made it into a saved playlist,
//! plus a few denormalized columns for inspection with plain SQL.

use crate::error::{ExtractError, ExtractResult};
use crate::models::MergedPlaylist;
use crate::services::fragment_classifier::normalize_track_id;
use crate::types::{CatalogLookup, Track, TrackId};
use anyhow::Result;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;

/// SQLite bind-parameter headroom per lookup query
const LOOKUP_CHUNK: usize = 500;

/// Track catalog backed by SQLite
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

/// Denormalized columns pulled from a track object
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSummary {
    pub netease_id: TrackId,
    pub name: Option<String>,
    pub duration_ms: Option<i64>,
    pub artist_names: Option<String>,
    pub album_name: Option<String>,
}

impl TrackSummary {
    /// Summarize a track object; `None` if it has no usable id
    ///
    /// Accepts both the compact (`dt`, `ar`, `al`) and the long (`duration`,
    /// `artists`, `album`) field names.
    pub fn from_track(track: &Track) -> Option<Self> {
        let netease_id = track.get("id").and_then(normalize_track_id)?;
        let name = track.get("name").and_then(Value::as_str).map(str::to_string);
        let duration_ms = track
            .get("dt")
            .or_else(|| track.get("duration"))
            .and_then(Value::as_i64);
        let artist_names = track
            .get("ar")
            .or_else(|| track.get("artists"))
            .and_then(Value::as_array)
            .map(|artists| {
                artists
                    .iter()
                    .filter_map(|a| a.get("name").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join(" / ")
            })
            .filter(|s| !s.is_empty());
        let album_name = track
            .get("al")
            .or_else(|| track.get("album"))
            .and_then(|a| a.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(Self {
            netease_id,
            name,
            duration_ms,
            artist_names,
            album_name,
        })
    }
}

impl SqliteCatalog {
    /// Open (creating if needed) a catalog database file
    pub async fn connect(db_path: &Path) -> Result<Self> {
        let pool = super::init_database_pool(db_path).await?;
        Ok(Self { pool })
    }

    /// Open the configured catalog file, failures reported as [`ExtractError::Catalog`]
    pub async fn open(db_path: &Path) -> ExtractResult<Self> {
        Self::connect(db_path)
            .await
            .map_err(|e| ExtractError::Catalog(format!("{}: {:#}", db_path.display(), e)))
    }

    /// Private in-memory catalog (single connection so every query sees the same db)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        super::init_tables(&pool).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool; tables are created if missing
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        super::init_tables(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upsert track objects; returns how many had a usable id
    pub async fn record_tracks(&self, tracks: &[Track]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let now = chrono::Utc::now().to_rfc3339();
        let mut recorded = 0;

        for track in tracks {
            let Some(summary) = TrackSummary::from_track(track) else {
                continue;
            };
            sqlx::query(
                r#"
                INSERT INTO tracks (
                    netease_id, name, duration_ms, artist_names, album_name, raw_json, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(netease_id) DO UPDATE SET
                    name = excluded.name,
                    duration_ms = excluded.duration_ms,
                    artist_names = excluded.artist_names,
                    album_name = excluded.album_name,
                    raw_json = excluded.raw_json,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(summary.netease_id)
            .bind(&summary.name)
            .bind(summary.duration_ms)
            .bind(&summary.artist_names)
            .bind(&summary.album_name)
            .bind(track.to_string())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            recorded += 1;
        }

        tx.commit().await?;
        Ok(recorded)
    }

    /// Upsert a playlist row and replace its ordered track list
    pub async fn save_playlist(&self, playlist: &MergedPlaylist) -> Result<()> {
        self.record_tracks(playlist.tracks()).await?;

        let mut tx = self.pool.begin().await?;
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO playlists (playlist_id, name, track_count, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(playlist_id) DO UPDATE SET
                name = excluded.name,
                track_count = excluded.track_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&playlist.playlist_id)
        .bind(playlist.name())
        .bind(playlist.track_count as i64)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM playlist_tracks WHERE playlist_id = ?")
            .bind(&playlist.playlist_id)
            .execute(&mut *tx)
            .await?;

        for (position, track_id) in playlist.track_ids().into_iter().enumerate() {
            sqlx::query(
                "INSERT INTO playlist_tracks (playlist_id, position, netease_id) VALUES (?, ?, ?)",
            )
            .bind(&playlist.playlist_id)
            .bind(position as i64)
            .bind(track_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            playlist_id = %playlist.playlist_id,
            tracks = playlist.track_count,
            "Playlist recorded in catalog"
        );
        Ok(())
    }

    /// Load one stored track
    pub async fn load_track(&self, track_id: TrackId) -> Result<Option<Track>> {
        let row = sqlx::query("SELECT raw_json FROM tracks WHERE netease_id = ?")
            .bind(track_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("raw_json");
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    /// Ordered track ids last recorded for a playlist
    pub async fn playlist_track_ids(&self, playlist_id: &str) -> Result<Vec<TrackId>> {
        let rows = sqlx::query(
            "SELECT netease_id FROM playlist_tracks WHERE playlist_id = ? ORDER BY position",
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get::<i64, _>("netease_id")).collect())
    }

    pub async fn track_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM tracks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    async fn lookup_chunked(&self, track_ids: &[TrackId]) -> Result<HashMap<TrackId, Track>> {
        let mut found = HashMap::new();

        for chunk in track_ids.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT netease_id, raw_json FROM tracks WHERE netease_id IN ({})",
                placeholders
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(*id);
            }

            for row in query.fetch_all(&self.pool).await? {
                let id: i64 = row.get("netease_id");
                let raw: String = row.get("raw_json");
                match serde_json::from_str::<Value>(&raw) {
                    Ok(track) => {
                        found.insert(id, track);
                    }
                    Err(e) => tracing::warn!(track_id = id, error = %e, "Stored track JSON unreadable"),
                }
            }
        }

        Ok(found)
    }
}

#[async_trait::async_trait]
impl CatalogLookup for SqliteCatalog {
    async fn lookup(&self, track_ids: &[TrackId]) -> Option<HashMap<TrackId, Track>> {
        if track_ids.is_empty() {
            return Some(HashMap::new());
        }
        match self.lookup_chunked(track_ids).await {
            Ok(found) => Some(found),
            Err(e) => {
                tracing::warn!(error = %e, "Catalog lookup failed");
                None
            }
        }
    }

    async fn record_playlist(&self, playlist: &MergedPlaylist) -> anyhow::Result<()> {
        self.save_playlist(playlist).await
    }
}
