//! Merge & order resolver
//!
//! Turns a shell plus its detail tracks into the playlist document that gets
//! written to disk. Track order follows the shell's `trackIds`; ids the detail
//! fragment does not cover are looked up in the catalog in one batch, and
//! whatever stays unresolved is dropped (never replaced by placeholders).

use crate::models::{MergedPlaylist, ShellFragment};
use crate::types::{CatalogLookup, Track, TrackId};
use ncm_common::events::SaveOrigin;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::fragment_classifier::normalize_track_id;

/// Default cap on a catalog lookup
pub const DEFAULT_CATALOG_TIMEOUT: Duration = Duration::from_millis(3000);

/// Merge & order resolver
#[derive(Clone)]
pub struct OrderResolver {
    catalog: Option<Arc<dyn CatalogLookup>>,
    catalog_timeout: Duration,
}

impl OrderResolver {
    pub fn new(catalog: Option<Arc<dyn CatalogLookup>>, catalog_timeout: Duration) -> Self {
        Self {
            catalog,
            catalog_timeout,
        }
    }

    /// Resolver without a catalog: gaps are always dropped
    pub fn without_catalog() -> Self {
        Self::new(None, DEFAULT_CATALOG_TIMEOUT)
    }

    /// Merge detail tracks into a shell
    ///
    /// **Algorithm:**
    /// 1. Shell has no trackIds: keep detail order as-is
    /// 2. Detail ids already equal trackIds: attach directly
    /// 3. Otherwise walk trackIds, taking each id from the detail tracks
    /// 4. Missing ids go to the catalog in a single batch under the timeout
    /// 5. Ids still missing are dropped and reported as unresolved
    ///
    /// `trackCount` always equals the number of tracks written.
    pub async fn merge(&self, shell: &ShellFragment, detail_tracks: Vec<Track>) -> MergedPlaylist {
        let detail_ids: Vec<Option<TrackId>> = detail_tracks
            .iter()
            .map(|t| t.get("id").and_then(normalize_track_id))
            .collect();

        if shell.track_ids.is_empty() {
            tracing::debug!(
                playlist_id = %shell.playlist_id,
                tracks = detail_tracks.len(),
                "Shell has no trackIds, keeping detail order"
            );
            return build(shell, detail_tracks, Vec::new(), SaveOrigin::Merged);
        }

        let in_order = detail_ids.len() == shell.track_ids.len()
            && detail_ids
                .iter()
                .zip(shell.track_ids.iter())
                .all(|(d, s)| *d == Some(*s));
        if in_order {
            return build(shell, detail_tracks, Vec::new(), SaveOrigin::Merged);
        }

        let mut by_id: HashMap<TrackId, Track> = HashMap::with_capacity(detail_tracks.len());
        for (id, track) in detail_ids.into_iter().zip(detail_tracks) {
            if let Some(id) = id {
                by_id.entry(id).or_insert(track);
            }
        }

        let mut seen = HashSet::new();
        let missing: Vec<TrackId> = shell
            .track_ids
            .iter()
            .filter(|id| !by_id.contains_key(id) && seen.insert(**id))
            .copied()
            .collect();

        if !missing.is_empty() {
            let found = self.lookup_missing(&shell.playlist_id, &missing).await;
            by_id.extend(found);
        }

        let mut tracks = Vec::with_capacity(shell.track_ids.len());
        let mut unresolved = Vec::new();
        for id in &shell.track_ids {
            match by_id.get(id) {
                Some(track) => tracks.push(track.clone()),
                None => unresolved.push(*id),
            }
        }

        if !unresolved.is_empty() {
            tracing::warn!(
                playlist_id = %shell.playlist_id,
                unresolved = unresolved.len(),
                written = tracks.len(),
                "Dropping unresolved tracks"
            );
        }

        build(shell, tracks, unresolved, SaveOrigin::Merged)
    }

    /// Pass a self-complete shell through with `trackCount` recomputed
    pub fn finalize_complete(&self, shell: &ShellFragment) -> MergedPlaylist {
        build(shell, shell.embedded_tracks(), Vec::new(), SaveOrigin::SelfComplete)
    }

    async fn lookup_missing(&self, playlist_id: &str, missing: &[TrackId]) -> HashMap<TrackId, Track> {
        let Some(catalog) = &self.catalog else {
            return HashMap::new();
        };

        match tokio::time::timeout(self.catalog_timeout, catalog.lookup(missing)).await {
            Ok(Some(found)) => {
                tracing::debug!(
                    playlist_id = %playlist_id,
                    requested = missing.len(),
                    found = found.len(),
                    "Catalog filled gaps"
                );
                found
            }
            Ok(None) => {
                tracing::info!(playlist_id = %playlist_id, "Catalog unavailable");
                HashMap::new()
            }
            Err(_) => {
                tracing::warn!(
                    playlist_id = %playlist_id,
                    timeout_ms = self.catalog_timeout.as_millis() as u64,
                    "Catalog lookup timed out"
                );
                HashMap::new()
            }
        }
    }
}

impl std::fmt::Debug for OrderResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderResolver")
            .field("catalog", &self.catalog.is_some())
            .field("catalog_timeout", &self.catalog_timeout)
            .finish()
    }
}

fn build(
    shell: &ShellFragment,
    tracks: Vec<Track>,
    unresolved: Vec<TrackId>,
    origin: SaveOrigin,
) -> MergedPlaylist {
    let track_count = tracks.len();
    let mut document = shell.document.clone();

    if !document.get("playlist").is_some_and(Value::is_object) {
        if let Some(root) = document.as_object_mut() {
            root.insert(
                "playlist".to_string(),
                serde_json::json!({ "id": shell.playlist_id }),
            );
        }
    }
    if let Some(playlist) = document.get_mut("playlist").and_then(Value::as_object_mut) {
        playlist.insert("tracks".to_string(), Value::Array(tracks));
        playlist.insert("trackCount".to_string(), Value::from(track_count));
    }

    MergedPlaylist {
        playlist_id: shell.playlist_id.clone(),
        document,
        track_count,
        unresolved,
        origin,
    }
}
