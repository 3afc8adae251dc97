//! Exchange and document fixtures
//!
//! Builds encrypted EAPI exchanges the way the client and server put them on
//! the wire: requests as `params=<HEX>` form bodies, responses as raw
//! ciphertext.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use ncm_extract::services::envelope_codec::{encode_request, encrypt};
use ncm_extract::{Exchange, TrackId};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

pub const PLAYLIST_PATH: &str = "/eapi/v6/playlist/detail";
pub const DETAIL_PATH: &str = "/eapi/v3/song/detail";

/// Fixed reference instant so file timestamps are reproducible
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn at(offset_ms: i64) -> DateTime<Utc> {
    t0() + Duration::milliseconds(offset_ms)
}

/// Realistic track object
pub fn track(id: TrackId) -> Value {
    json!({
        "id": id,
        "name": format!("Track {}", id),
        "dt": 180_000 + id,
        "ar": [{"id": 1000 + id, "name": format!("Artist {}", id)}],
        "al": {"id": 2000 + id, "name": format!("Album {}", id)},
        "fee": 8
    })
}

/// Shell document with empty `tracks`
pub fn shell_doc(playlist_id: &str, track_ids: &[TrackId]) -> Value {
    json!({
        "code": 200,
        "playlist": {
            "id": playlist_id.parse::<i64>().map(Value::from).unwrap_or_else(|_| Value::from(playlist_id)),
            "name": format!("Playlist {}", playlist_id),
            "trackCount": track_ids.len(),
            "trackIds": track_ids.iter().map(|id| json!({"id": id, "v": 1})).collect::<Vec<_>>(),
            "tracks": []
        }
    })
}

/// Shell document that already carries its tracks
pub fn complete_shell_doc(playlist_id: &str, track_ids: &[TrackId]) -> Value {
    let mut doc = shell_doc(playlist_id, track_ids);
    doc["playlist"]["tracks"] = Value::Array(track_ids.iter().map(|id| track(*id)).collect());
    doc
}

/// Song-detail document with songs in the given order
pub fn detail_doc(song_ids: &[TrackId]) -> Value {
    json!({
        "code": 200,
        "songs": song_ids.iter().map(|id| track(*id)).collect::<Vec<_>>(),
        "privileges": []
    })
}

pub fn playlist_request(playlist_id: &str, at: DateTime<Utc>) -> Exchange {
    let body = encode_request("/api/v6/playlist/detail", &json!({"id": playlist_id, "n": 100000, "s": 8}));
    Exchange::request(PLAYLIST_PATH, body, at)
}

pub fn response(path: &str, doc: &Value, at: DateTime<Utc>) -> Exchange {
    Exchange::response(path, encrypt(doc.to_string().as_bytes()), at)
}

pub fn shell_response(playlist_id: &str, track_ids: &[TrackId], at: DateTime<Utc>) -> Exchange {
    response(PLAYLIST_PATH, &shell_doc(playlist_id, track_ids), at)
}

/// Song-detail request carrying `c` as a JSON-encoded string, as the client does
pub fn detail_request(requested: &[TrackId], at: DateTime<Utc>) -> Exchange {
    let c: Vec<Value> = requested.iter().map(|id| json!({"id": id})).collect();
    let body = encode_request(
        "/api/v3/song/detail",
        &json!({"c": Value::Array(c).to_string(), "e_r": true}),
    );
    Exchange::request(DETAIL_PATH, body, at)
}

pub fn detail_response(song_ids: &[TrackId], at: DateTime<Utc>) -> Exchange {
    response(DETAIL_PATH, &detail_doc(song_ids), at)
}

/// Write a capture file in the layout the debug recorder produces
pub fn write_capture(
    dir: &Path,
    counter: u32,
    path: &str,
    request: &Exchange,
    response: Option<&Exchange>,
) -> PathBuf {
    let millis = request.timestamp.timestamp_millis();
    let file = dir.join(format!("post_request_{}_{}.json", counter, millis));
    let mut data = json!({
        "timestamp": request.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        "url": format!("https://interface.music.163.com{}", path),
        "method": "POST",
        "domain": "interface.music.163.com",
        "path": path,
        "headers": {"content-type": "application/x-www-form-urlencoded"},
        "payload": String::from_utf8_lossy(&request.raw_body),
        "payload_type": "encrypted_form",
        "response": null
    });
    if let Some(response) = response {
        data["response"] = json!({
            "status_code": 200,
            "headers": {},
            "content": hex::encode(&response.raw_body),
            "content_type": "eapi_hex"
        });
    }
    std::fs::write(&file, serde_json::to_string_pretty(&data).unwrap()).unwrap();
    file
}

/// Parse a written playlist file
pub fn read_playlist(output_dir: &Path, playlist_id: &str) -> Value {
    let path = output_dir.join(format!("playlist_{}.json", playlist_id));
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("missing {}: {}", path.display(), e));
    serde_json::from_str(&text).unwrap()
}

/// Ids of `playlist.tracks` in a written document
pub fn track_ids_of(doc: &Value) -> Vec<TrackId> {
    doc["playlist"]["tracks"]
        .as_array()
        .map(|tracks| tracks.iter().filter_map(|t| t["id"].as_i64()).collect())
        .unwrap_or_default()
}
