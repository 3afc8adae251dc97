//! Correlation store
//!
//! Pairs playlist shells with song-detail fragments that arrive on separate
//! HTTP exchanges, in either order, with no shared key on the wire.
//!
//! A shell caches its ordered track id list. A detail fragment is attached
//! to a shell either through the playlist id hint taken from the request, or
//! by comparing the ids its request asked for against every cached list.
//! Details that match nothing wait in an unassigned list and are retried each
//! time a new shell arrives. A detail never joins a shell whose track ids it
//! shares none of. Everything expires after the correlation window.
//!
//! The store is plain synchronous state; the engine owns it behind one mutex.

use crate::models::{DetailFragment, ShellFragment};
use crate::types::{PlaylistId, TrackId};
use chrono::{DateTime, Utc};
use ncm_common::config::CorrelationConfig;
use ncm_common::events::FragmentSide;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// A fragment plus the moment it was observed
#[derive(Debug, Clone)]
struct Timed<T> {
    payload: T,
    observed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PendingEntry {
    shell: Option<Timed<ShellFragment>>,
    detail: Option<Timed<DetailFragment>>,
}

impl PendingEntry {
    fn is_empty(&self) -> bool {
        self.shell.is_none() && self.detail.is_none()
    }
}

#[derive(Debug, Clone)]
struct CachedTrackIds {
    ids: Vec<TrackId>,
    arrived_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct UnassignedDetail {
    ids_requested: Vec<TrackId>,
    hint: Option<PlaylistId>,
    detail: DetailFragment,
    observed_at: DateTime<Utc>,
}

/// Both halves of one playlist, ready for the resolver
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReady {
    pub playlist_id: PlaylistId,
    pub shell: ShellFragment,
    pub detail: DetailFragment,
}

/// What the store did with a fragment
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome {
    /// Self-complete shell, bypasses correlation
    Complete(ShellFragment),
    /// A shell/detail pair was completed
    Ready(MergeReady),
    /// Filed under this playlist id, waiting for the other half
    Pending(PlaylistId),
    /// Detail matched no shell yet
    Unassigned,
}

/// A fragment evicted by `sweep`
#[derive(Debug, Clone, PartialEq)]
pub struct Expired {
    pub side: FragmentSide,
    pub playlist_id: Option<PlaylistId>,
    pub waited_ms: i64,
}

/// Snapshot for status readers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStatus {
    pub pending_shells: usize,
    pub pending_details: usize,
    pub unassigned_details: usize,
    pub cached_track_lists: usize,
    /// Playlist ids with pending state, sorted
    pub pending_ids: Vec<PlaylistId>,
}

/// Correlation state for in-flight fragments
#[derive(Debug)]
pub struct CorrelationStore {
    config: CorrelationConfig,
    pending: HashMap<PlaylistId, PendingEntry>,
    unassigned: Vec<UnassignedDetail>,
    track_id_cache: HashMap<PlaylistId, CachedTrackIds>,
}

impl CorrelationStore {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
            unassigned: Vec::new(),
            track_id_cache: HashMap::new(),
        }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Accept a shell fragment
    ///
    /// Self-complete shells are returned as-is and clear any stale state for
    /// their id. Other shells replace a previous shell for the same id,
    /// refresh the id cache, adopt the best waiting unassigned detail, and
    /// complete the pair if a detail is already filed.
    pub fn on_shell(&mut self, shell: ShellFragment, now: DateTime<Utc>) -> StoreOutcome {
        let playlist_id = shell.playlist_id.clone();

        if shell.self_complete {
            if let Some(stale) = self.pending.remove(&playlist_id) {
                tracing::debug!(
                    playlist_id = %playlist_id,
                    had_shell = stale.shell.is_some(),
                    had_detail = stale.detail.is_some(),
                    "Self-complete shell supersedes pending state"
                );
            }
            self.track_id_cache.remove(&playlist_id);
            return StoreOutcome::Complete(shell);
        }

        self.track_id_cache.insert(
            playlist_id.clone(),
            CachedTrackIds {
                ids: shell.track_ids.clone(),
                arrived_at: now,
            },
        );

        let entry = self.pending.entry(playlist_id.clone()).or_default();
        if entry.shell.is_some() {
            tracing::debug!(playlist_id = %playlist_id, "Replacing pending shell");
        }
        entry.shell = Some(Timed {
            payload: shell,
            observed_at: now,
        });

        let needs_detail = entry.detail.is_none();
        if needs_detail {
            if let Some(adopted) = self.adopt_unassigned(&playlist_id) {
                tracing::debug!(
                    playlist_id = %playlist_id,
                    songs = adopted.detail.songs.len(),
                    "Adopted unassigned detail"
                );
                if let Some(entry) = self.pending.get_mut(&playlist_id) {
                    entry.detail = Some(Timed {
                        payload: adopted.detail,
                        observed_at: adopted.observed_at,
                    });
                }
            }
        }

        self.try_merge(&playlist_id)
    }

    /// Accept a detail fragment with the ids its request asked for
    pub fn on_detail(
        &mut self,
        detail: DetailFragment,
        ids_requested: Vec<TrackId>,
        hint: Option<PlaylistId>,
        now: DateTime<Utc>,
    ) -> StoreOutcome {
        let song_ids: HashSet<TrackId> = detail.song_ids().into_iter().collect();
        let target = hint
            .as_ref()
            .filter(|id| {
                self.pending
                    .get(*id)
                    .and_then(|e| e.shell.as_ref())
                    .is_some_and(|s| shares_tracks(&s.payload.track_ids, &song_ids))
            })
            .cloned()
            .or_else(|| self.best_cached_match(&ids_requested, &song_ids));

        let Some(playlist_id) = target else {
            tracing::debug!(
                requested = ids_requested.len(),
                songs = detail.songs.len(),
                hint = ?hint,
                "Detail matched no cached track list"
            );
            self.unassigned.push(UnassignedDetail {
                ids_requested,
                hint,
                detail,
                observed_at: now,
            });
            return StoreOutcome::Unassigned;
        };

        let entry = self.pending.entry(playlist_id.clone()).or_default();
        entry.detail = Some(Timed {
            payload: detail,
            observed_at: now,
        });

        self.try_merge(&playlist_id)
    }

    /// Evict everything older than the correlation window
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<Expired> {
        let window = self.config.window();
        let is_stale = |at: DateTime<Utc>| now.signed_duration_since(at) > window;
        let waited = |at: DateTime<Utc>| ncm_common::time::elapsed_ms(at, now);
        let mut expired = Vec::new();

        for (playlist_id, entry) in self.pending.iter_mut() {
            if entry.shell.as_ref().is_some_and(|s| is_stale(s.observed_at)) {
                if let Some(shell) = entry.shell.take() {
                    expired.push(Expired {
                        side: FragmentSide::Shell,
                        playlist_id: Some(playlist_id.clone()),
                        waited_ms: waited(shell.observed_at),
                    });
                }
            }
            if entry.detail.as_ref().is_some_and(|d| is_stale(d.observed_at)) {
                if let Some(detail) = entry.detail.take() {
                    expired.push(Expired {
                        side: FragmentSide::Detail,
                        playlist_id: Some(playlist_id.clone()),
                        waited_ms: waited(detail.observed_at),
                    });
                }
            }
        }
        self.pending.retain(|_, entry| !entry.is_empty());

        self.track_id_cache.retain(|_, cached| !is_stale(cached.arrived_at));

        self.unassigned.retain(|item| {
            if is_stale(item.observed_at) {
                expired.push(Expired {
                    side: FragmentSide::UnassignedDetail,
                    playlist_id: item.hint.clone(),
                    waited_ms: waited(item.observed_at),
                });
                false
            } else {
                true
            }
        });

        expired
    }

    pub fn status(&self) -> StoreStatus {
        let mut pending_ids: Vec<PlaylistId> = self.pending.keys().cloned().collect();
        pending_ids.sort();
        StoreStatus {
            pending_shells: self.pending.values().filter(|e| e.shell.is_some()).count(),
            pending_details: self.pending.values().filter(|e| e.detail.is_some()).count(),
            unassigned_details: self.unassigned.len(),
            cached_track_lists: self.track_id_cache.len(),
            pending_ids,
        }
    }

    pub fn is_pending(&self, playlist_id: &str) -> bool {
        self.pending.contains_key(playlist_id)
    }

    fn try_merge(&mut self, playlist_id: &PlaylistId) -> StoreOutcome {
        let complete = self
            .pending
            .get(playlist_id)
            .is_some_and(|e| e.shell.is_some() && e.detail.is_some());
        if !complete {
            return StoreOutcome::Pending(playlist_id.clone());
        }

        let entry = self.pending.remove(playlist_id);
        self.track_id_cache.remove(playlist_id);
        match entry {
            Some(PendingEntry {
                shell: Some(shell),
                detail: Some(detail),
            }) => StoreOutcome::Ready(MergeReady {
                playlist_id: playlist_id.clone(),
                shell: shell.payload,
                detail: detail.payload,
            }),
            _ => StoreOutcome::Pending(playlist_id.clone()),
        }
    }

    /// Best cached playlist for a detail, if any clears the threshold
    ///
    /// Without requested ids only the length check applies and the most
    /// recently arrived compatible shell wins. Lists sharing no id with the
    /// detail's songs are never candidates.
    fn best_cached_match(&self, ids_requested: &[TrackId], song_ids: &HashSet<TrackId>) -> Option<PlaylistId> {
        let tolerance = self.config.length_tolerance;
        let candidates = self
            .track_id_cache
            .iter()
            .filter(|(_, cached)| shares_tracks(&cached.ids, song_ids));

        if ids_requested.is_empty() {
            return candidates
                .filter(|(_, cached)| lengths_compatible(cached.ids.len(), song_ids.len(), tolerance))
                .max_by_key(|(_, cached)| cached.arrived_at)
                .map(|(id, _)| id.clone());
        }

        let mut best: Option<(f64, DateTime<Utc>, &PlaylistId)> = None;
        for (playlist_id, cached) in candidates {
            let Some(score) = match_score(&cached.ids, ids_requested, tolerance) else {
                continue;
            };
            if score <= self.config.match_threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_score, best_at, _)) => {
                    score > best_score || (score == best_score && cached.arrived_at > best_at)
                }
            };
            if better {
                best = Some((score, cached.arrived_at, playlist_id));
            }
        }
        best.map(|(_, _, id)| id.clone())
    }

    /// Remove and return the unassigned detail that best fits `playlist_id`
    fn adopt_unassigned(&mut self, playlist_id: &PlaylistId) -> Option<UnassignedDetail> {
        let cached = self.track_id_cache.get(playlist_id)?;
        let tolerance = self.config.length_tolerance;
        let threshold = self.config.match_threshold;

        // Rank: hinted detail, then scored match, then length-only fallback
        let mut best: Option<(usize, (u8, f64), DateTime<Utc>)> = None;
        for (index, item) in self.unassigned.iter().enumerate() {
            let song_ids: HashSet<TrackId> = item.detail.song_ids().into_iter().collect();
            if !shares_tracks(&cached.ids, &song_ids) {
                continue;
            }
            let rank = if item.hint.as_ref() == Some(playlist_id) {
                (2, 1.0)
            } else if item.ids_requested.is_empty() {
                if !lengths_compatible(cached.ids.len(), item.detail.songs.len(), tolerance) {
                    continue;
                }
                (0, 0.0)
            } else {
                match match_score(&cached.ids, &item.ids_requested, tolerance) {
                    Some(score) if score > threshold => (1, score),
                    _ => continue,
                }
            };
            let better = match best {
                None => true,
                Some((_, best_rank, best_at)) => {
                    rank > best_rank || (rank == best_rank && item.observed_at > best_at)
                }
            };
            if better {
                best = Some((index, rank, item.observed_at));
            }
        }

        best.map(|(index, _, _)| self.unassigned.remove(index))
    }
}

/// Detail songs include at least one of the shell's track ids
///
/// A shell without track ids accepts any detail.
pub fn shares_tracks(track_ids: &[TrackId], song_ids: &HashSet<TrackId>) -> bool {
    track_ids.is_empty() || track_ids.iter().any(|id| song_ids.contains(id))
}

/// Relative length difference is within `tolerance`
pub fn lengths_compatible(a: usize, b: usize, tolerance: f64) -> bool {
    let longest = a.max(b);
    if longest == 0 {
        return false;
    }
    (a.abs_diff(b) as f64) / (longest as f64) <= tolerance
}

/// Similarity of a cached track id list and a requested id list
///
/// `None` when either list is empty or their lengths differ by more than
/// `tolerance`. Otherwise the fraction of the shorter length whose positions
/// hold the same id, where a pair of positions holding each other's ids (a
/// transposition) counts as one matching position.
pub fn match_score(cached: &[TrackId], requested: &[TrackId], tolerance: f64) -> Option<f64> {
    if !lengths_compatible(cached.len(), requested.len(), tolerance) {
        return None;
    }
    let compared = cached.len().min(requested.len());

    let mut hits = 0usize;
    let mut swaps = 0usize;
    let mut unpaired: HashMap<(TrackId, TrackId), usize> = HashMap::new();
    for (a, b) in cached.iter().zip(requested.iter()) {
        if a == b {
            hits += 1;
            continue;
        }
        match unpaired.get_mut(&(*b, *a)) {
            Some(count) if *count > 0 => {
                *count -= 1;
                swaps += 1;
            }
            _ => *unpaired.entry((*a, *b)).or_insert(0) += 1,
        }
    }

    Some((hits + swaps) as f64 / compared as f64)
}
