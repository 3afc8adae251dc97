//! Capture replay
//!
//! Feeds a directory of saved debug captures (`post_*.json`) through the
//! engine, as if the exchanges were being observed live. Each file holds one
//! request and, usually, its response:
//!
//! ```json
//! {
//!   "timestamp": "2024-05-01 12:00:00",
//!   "url": "https://interface.music.163.com/eapi/v6/playlist/detail",
//!   "path": "/eapi/v6/playlist/detail",
//!   "payload": "params=0A1B...",
//!   "response": { "status_code": 200, "content": "9f3c..." }
//! }
//! ```
//!
//! `payload_raw` / `content_raw` take precedence when present.

use crate::error::{ExtractError, ExtractResult};
use crate::models::Exchange;
use crate::services::capture_engine::{CaptureEngine, EngineOutcome};
use crate::services::envelope_codec::{self, DecodedPayload};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

const CAPTURE_PREFIX: &str = "post_";
const CAPTURE_SUFFIX: &str = ".json";

/// One capture file, parsed
#[derive(Debug, Clone)]
pub struct CaptureFile {
    pub file_name: String,
    pub path: String,
    pub timestamp: DateTime<Utc>,
    pub request_body: Option<Vec<u8>>,
    pub response_body: Option<Vec<u8>>,
}

/// Result of replaying a directory
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplaySummary {
    pub total_files: usize,
    /// Files processed without a decode failure
    pub success_count: usize,
    /// Files unreadable or with an undecodable body
    pub error_count: usize,
    /// Paths of playlist files written, in save order
    pub saved: Vec<PathBuf>,
}

/// Replays capture files from one directory
#[derive(Debug, Clone)]
pub struct CaptureReplay {
    dir: PathBuf,
}

impl CaptureReplay {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Capture files in replay order
    ///
    /// Files are ordered by the numbers in their names (capture counter,
    /// then millisecond timestamp), then by name.
    pub fn capture_files(&self) -> ExtractResult<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Err(ExtractError::Replay(format!(
                "capture directory not found: {}",
                self.dir.display()
            )));
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(CAPTURE_PREFIX) && n.ends_with(CAPTURE_SUFFIX))
            })
            .collect();

        files.sort_by_cached_key(|path| {
            let name = file_name(path);
            (numeric_groups(&name), name)
        });
        Ok(files)
    }

    /// Replay every capture file through `engine`
    pub async fn replay(&self, engine: &CaptureEngine) -> ExtractResult<ReplaySummary> {
        let files = self.capture_files()?;
        tracing::info!(dir = %self.dir.display(), files = files.len(), "Replaying captures");

        let mut summary = ReplaySummary {
            total_files: files.len(),
            ..Default::default()
        };

        for path in files {
            let capture = match load_capture(&path) {
                Ok(capture) => capture,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable capture");
                    summary.error_count += 1;
                    continue;
                }
            };

            let mut failed = false;
            for exchange in capture.exchanges() {
                for outcome in engine.on_exchange_observed(exchange).await {
                    match outcome {
                        EngineOutcome::Saved { path, .. } => summary.saved.push(path),
                        EngineOutcome::Dropped { .. } | EngineOutcome::PersistFailed { .. } => failed = true,
                        _ => {}
                    }
                }
            }

            if failed {
                summary.error_count += 1;
            } else {
                summary.success_count += 1;
            }
        }

        tracing::info!(
            success = summary.success_count,
            errors = summary.error_count,
            saved = summary.saved.len(),
            "Replay finished"
        );
        Ok(summary)
    }
}

impl CaptureFile {
    /// Request then response exchanges sharing the file name as flow id
    pub fn exchanges(&self) -> Vec<Exchange> {
        let mut exchanges = Vec::with_capacity(2);
        if let Some(body) = &self.request_body {
            exchanges.push(
                Exchange::request(&self.path, body.clone(), self.timestamp).with_flow_id(&self.file_name),
            );
        }
        if let Some(body) = &self.response_body {
            exchanges.push(
                Exchange::response(&self.path, body.clone(), self.timestamp).with_flow_id(&self.file_name),
            );
        }
        exchanges
    }
}

/// Parse one capture file
pub fn load_capture(path: &Path) -> ExtractResult<CaptureFile> {
    let text = std::fs::read_to_string(path)?;
    let data: Value = serde_json::from_str(&text)
        .map_err(|e| ExtractError::Replay(format!("{}: {}", path.display(), e)))?;

    let file_name = file_name(path);
    let request_path = data
        .get("path")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| data.get("url").and_then(Value::as_str).and_then(path_from_url))
        .ok_or_else(|| ExtractError::Replay(format!("{}: no path or url", path.display())))?;

    let timestamp = filename_millis(&file_name)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .or_else(|| {
            data.get("timestamp")
                .and_then(Value::as_str)
                .and_then(ncm_common::time::parse_capture_timestamp)
        })
        .unwrap_or_else(Utc::now);

    let request_body = body_bytes(&data, "payload_raw", "payload");
    let response_body = data
        .get("response")
        .and_then(|r| body_bytes(r, "content_raw", "content"));

    Ok(CaptureFile {
        file_name,
        path: request_path,
        timestamp,
        request_body,
        response_body,
    })
}

/// Decode one body given as text or as `@<file>` (e.g. a saved `payload`)
pub fn decode_argument(input: &str) -> ExtractResult<DecodedPayload> {
    let body = match input.strip_prefix('@') {
        Some(path) => std::fs::read(path)?,
        None => input.as_bytes().to_vec(),
    };
    Ok(envelope_codec::decode(&body)?)
}

fn body_bytes(container: &Value, raw_key: &str, key: &str) -> Option<Vec<u8>> {
    let value = container
        .get(raw_key)
        .filter(|v| !v.is_null())
        .or_else(|| container.get(key).filter(|v| !v.is_null()))?;
    match value {
        Value::String(s) => Some(s.as_bytes().to_vec()),
        other => Some(other.to_string().into_bytes()),
    }
}

fn path_from_url(url: &str) -> Option<String> {
    let after_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    after_scheme.find('/').map(|i| after_scheme[i..].to_string())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn numeric_groups(name: &str) -> Vec<u64> {
    name.split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

/// Trailing millisecond timestamp in `post_request_<n>_<ms>.json`
fn filename_millis(name: &str) -> Option<i64> {
    let stem = name.strip_suffix(CAPTURE_SUFFIX)?;
    let last = stem.rsplit('_').next()?;
    // Anything shorter is a counter, not epoch milliseconds
    if last.len() < 12 {
        return None;
    }
    last.parse().ok()
}
