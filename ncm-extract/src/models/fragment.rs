//! Decoded fragments and the merged playlist they become

use crate::types::{PlaylistId, Track, TrackId};
use ncm_common::events::SaveOrigin;
use serde_json::Value;

/// Playlist response: metadata plus the intended track order
///
/// The document is kept whole (`{"playlist": {...}, ...}`) and treated as
/// immutable once classified.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellFragment {
    pub playlist_id: PlaylistId,
    /// `playlist.trackIds`, normalized to integers, malformed entries skipped
    pub track_ids: Vec<TrackId>,
    /// `playlist.tracks` was already populated
    pub self_complete: bool,
    pub document: Value,
}

impl ShellFragment {
    /// Playlist display name, if present
    pub fn name(&self) -> Option<&str> {
        self.document
            .get("playlist")
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
    }

    /// Tracks embedded in a self-complete shell
    pub fn embedded_tracks(&self) -> Vec<Track> {
        self.document
            .get("playlist")
            .and_then(|p| p.get("tracks"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }
}

/// Batch song-detail response: fully populated tracks, no playlist context
#[derive(Debug, Clone, PartialEq)]
pub struct DetailFragment {
    /// The `songs` array, never empty, every element has an `id`
    pub songs: Vec<Track>,
}

impl DetailFragment {
    /// Ids of the songs in response order (unparseable ids skipped)
    pub fn song_ids(&self) -> Vec<TrackId> {
        self.songs
            .iter()
            .filter_map(|song| song.get("id"))
            .filter_map(crate::services::fragment_classifier::normalize_track_id)
            .collect()
    }
}

/// Result of classifying a decoded document
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Shell(ShellFragment),
    Detail(DetailFragment),
    Unclassified,
}

impl Fragment {
    pub fn kind(&self) -> &'static str {
        match self {
            Fragment::Shell(_) => "shell",
            Fragment::Detail(_) => "detail",
            Fragment::Unclassified => "unclassified",
        }
    }
}

/// Final artifact written as `playlist_<id>.json`
#[derive(Debug, Clone, PartialEq)]
pub struct MergedPlaylist {
    pub playlist_id: PlaylistId,
    /// `{"playlist": {..., "tracks": [...], "trackCount": N}}`
    pub document: Value,
    /// Number of tracks in `document` (mirrors `trackCount`)
    pub track_count: usize,
    /// Shell ids that neither the detail fragment nor the catalog could supply
    pub unresolved: Vec<TrackId>,
    pub origin: SaveOrigin,
}

impl MergedPlaylist {
    pub fn name(&self) -> Option<&str> {
        self.document
            .get("playlist")
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
    }

    /// Tracks in final order
    pub fn tracks(&self) -> &[Track] {
        self.document
            .get("playlist")
            .and_then(|p| p.get("tracks"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Ids of the final tracks in order
    pub fn track_ids(&self) -> Vec<TrackId> {
        self.tracks()
            .iter()
            .filter_map(|t| t.get("id"))
            .filter_map(crate::services::fragment_classifier::normalize_track_id)
            .collect()
    }
}
