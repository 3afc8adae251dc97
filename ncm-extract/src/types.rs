//! Core types and the catalog capability trait
//!
//! Playlists are identified by strings (the API sends both `"60567077"` and
//! `60567077`); tracks by integers. Track objects themselves are kept as raw
//! JSON so nothing the API sends is lost on the way to disk.

use crate::models::MergedPlaylist;
use std::collections::HashMap;

/// Playlist identifier, normalized to its decimal string form
pub type PlaylistId = String;

/// Track identifier, normalized to integer form
pub type TrackId = i64;

/// A fully populated track object as sent by the API
pub type Track = serde_json::Value;

/// Optional local track catalog used to fill gaps in a merged playlist
///
/// Lookups are best-effort: `None` means the catalog is unavailable, an empty
/// map means it answered but knows none of the ids.
///
/// # Example
/// ```rust,ignore
/// struct Fixed(HashMap<TrackId, Track>);
///
/// #[async_trait::async_trait]
/// impl CatalogLookup for Fixed {
///     async fn lookup(&self, ids: &[TrackId]) -> Option<HashMap<TrackId, Track>> {
///         Some(ids.iter().filter_map(|id| self.0.get(id).map(|t| (*id, t.clone()))).collect())
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait CatalogLookup: Send + Sync {
    /// Resolve track ids to track objects
    async fn lookup(&self, track_ids: &[TrackId]) -> Option<HashMap<TrackId, Track>>;

    /// Remember a persisted playlist so later lookups can resolve its tracks
    ///
    /// Catalogs that are read-only keep the default no-op.
    async fn record_playlist(&self, _playlist: &MergedPlaylist) -> anyhow::Result<()> {
        Ok(())
    }
}
