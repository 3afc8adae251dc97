//! ncm-extract library interface
//!
//! Reconstructs complete NetEase Cloud Music playlists from intercepted EAPI
//! traffic. A playlist arrives in two halves on separate exchanges: a shell
//! (metadata and ordered track ids) and a song-detail batch (full track
//! objects). The capture engine decrypts both, correlates them, restores the
//! shell's track order and writes `playlist_<id>.json`.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod replay;
pub mod services;
pub mod types;

pub use crate::error::{ExtractError, ExtractResult};
pub use crate::models::{Exchange, MergedPlaylist};
pub use crate::replay::{CaptureReplay, ReplaySummary};
pub use crate::services::{CaptureEngine, EngineOutcome, EngineStatus};
pub use crate::types::{CatalogLookup, PlaylistId, Track, TrackId};
