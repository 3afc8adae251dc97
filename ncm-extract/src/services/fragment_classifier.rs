//! Fragment classification
//!
//! Decides whether a decoded response is a playlist shell, a song-detail
//! batch, or neither, and pulls identifiers out of decoded request
//! documents.
//!
//! Shell: top-level `playlist` object carrying an `id`.
//! Detail: top-level `songs` array, non-empty, every element carrying an `id`.
//! Anything else is unclassified and ignored by the engine.

use crate::models::{DetailFragment, Fragment, ShellFragment};
use crate::types::{PlaylistId, TrackId};
use serde_json::Value;

/// Classify a decoded response document
pub fn classify(document: Value) -> Fragment {
    if let Some(playlist) = document.get("playlist").filter(|p| p.is_object()) {
        let Some(playlist_id) = playlist.get("id").and_then(normalize_playlist_id) else {
            tracing::debug!("Playlist object without usable id");
            return Fragment::Unclassified;
        };

        let track_ids = playlist
            .get("trackIds")
            .map(extract_track_ids)
            .unwrap_or_default();

        let self_complete = playlist
            .get("tracks")
            .and_then(Value::as_array)
            .is_some_and(|tracks| !tracks.is_empty());

        return Fragment::Shell(ShellFragment {
            playlist_id,
            track_ids,
            self_complete,
            document,
        });
    }

    if let Some(songs) = document.get("songs").and_then(Value::as_array) {
        if songs.is_empty() {
            return Fragment::Unclassified;
        }
        if songs
            .iter()
            .any(|song| song.get("id").and_then(normalize_track_id).is_none())
        {
            tracing::debug!("Songs array contains an element without usable id");
            return Fragment::Unclassified;
        }
        return Fragment::Detail(DetailFragment {
            songs: songs.clone(),
        });
    }

    Fragment::Unclassified
}

/// Track id as integer: accepts JSON integers and numeric strings
pub fn normalize_track_id(value: &Value) -> Option<TrackId> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok())),
        Value::String(s) => s.trim().parse::<TrackId>().ok(),
        _ => None,
    }
}

/// Playlist id as decimal string: accepts JSON integers and non-empty strings
pub fn normalize_playlist_id(value: &Value) -> Option<PlaylistId> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(|i| i.to_string())
            .or_else(|| n.as_u64().map(|u| u.to_string())),
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        _ => None,
    }
}

/// Ids from an array of `{id: ...}` objects or of bare ids
///
/// Entries that do not normalize are skipped.
pub fn extract_track_ids(value: &Value) -> Vec<TrackId> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::Object(map) => map.get("id").and_then(normalize_track_id),
            other => normalize_track_id(other),
        })
        .collect()
}

/// Track ids a song-detail request asked for, in request order
///
/// The client sends `c` as a JSON-encoded string of `[{"id":..}, ...]`;
/// some variants send the array directly, older ones an `ids` list.
pub fn requested_track_ids(request: &Value) -> Vec<TrackId> {
    if let Some(c) = request.get("c") {
        let ids = match c {
            Value::String(encoded) => serde_json::from_str::<Value>(encoded)
                .map(|decoded| extract_track_ids(&decoded))
                .unwrap_or_default(),
            other => extract_track_ids(other),
        };
        if !ids.is_empty() {
            return ids;
        }
    }

    match request.get("ids") {
        Some(Value::String(encoded)) => serde_json::from_str::<Value>(encoded)
            .map(|decoded| extract_track_ids(&decoded))
            .unwrap_or_default(),
        Some(other) => extract_track_ids(other),
        None => Vec::new(),
    }
}

/// Playlist id a playlist request asked for
pub fn requested_playlist_id(request: &Value) -> Option<PlaylistId> {
    request.get("id").and_then(normalize_playlist_id)
}
