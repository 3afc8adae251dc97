//! Capture engine
//!
//! Entry point for the interception layer. Every observed request or
//! response is handed to [`CaptureEngine::on_exchange_observed`], which
//!
//! 1. sweeps expired correlation state (using the exchange timestamp as clock)
//! 2. records requests so their response can recover the playlist id hint or
//!    the requested track ids
//! 3. decodes and classifies responses and feeds them to the correlation store
//! 4. merges completed pairs, writes the playlist file and updates the catalog
//!
//! The correlation store and request ledger sit behind one mutex; it is
//! released before any catalog lookup or file write.

use crate::config::ExtractSettings;
use crate::models::{Direction, Exchange, ExchangeRoute, Fragment, MergedPlaylist, ShellFragment};
use crate::services::correlation_store::{
    CorrelationStore, Expired, MergeReady, StoreOutcome, StoreStatus,
};
use crate::services::envelope_codec;
use crate::services::fragment_classifier::{classify, requested_playlist_id, requested_track_ids};
use crate::services::order_resolver::{OrderResolver, DEFAULT_CATALOG_TIMEOUT};
use crate::services::playlist_sink::PlaylistSink;
use crate::types::{CatalogLookup, PlaylistId, TrackId};
use chrono::{DateTime, Utc};
use ncm_common::config::CorrelationConfig;
use ncm_common::events::{CaptureEvent, EventBus, FragmentSide, SaveOrigin};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Event bus capacity when none is injected
const DEFAULT_EVENT_CAPACITY: usize = 100;

/// What happened to one observed exchange
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutcome {
    /// Path is not a playlist or song-detail endpoint
    Ignored,
    /// Request remembered for pairing with its response
    RequestRecorded { route: ExchangeRoute },
    /// Body could not be decoded
    Dropped { reason: String },
    /// Response decoded but is neither shell nor detail
    Unclassified,
    /// Fragment waiting for its partner (`None`: unassigned detail)
    Pending { playlist_id: Option<PlaylistId> },
    /// Playlist file written
    Saved {
        playlist_id: PlaylistId,
        path: PathBuf,
        track_count: usize,
        unresolved: usize,
        origin: SaveOrigin,
    },
    /// Merged but not in the target id allow-list
    Skipped { playlist_id: PlaylistId },
    /// Merged but the write failed
    PersistFailed { playlist_id: PlaylistId, error: String },
    /// Swept out by the correlation window
    Expired {
        side: FragmentSide,
        playlist_id: Option<PlaylistId>,
    },
    /// Engine no longer accepts exchanges
    ShutDown,
}

/// Snapshot for status readers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStatus {
    #[serde(flatten)]
    pub store: StoreStatus,
    pub outstanding_requests: usize,
}

/// A request waiting for its response
///
/// Undecodable requests are queued with neither hint nor ids so per-path
/// pairing stays aligned.
#[derive(Debug, Clone)]
struct OutstandingRequest {
    hint: Option<PlaylistId>,
    ids_requested: Vec<TrackId>,
    observed_at: DateTime<Utc>,
}

/// Requests keyed by flow id, or queued per path when there is none
#[derive(Debug, Default)]
struct RequestLedger {
    by_flow: HashMap<String, OutstandingRequest>,
    by_path: HashMap<String, VecDeque<OutstandingRequest>>,
}

impl RequestLedger {
    fn record(&mut self, exchange: &Exchange, request: OutstandingRequest) {
        match &exchange.flow_id {
            Some(flow_id) => {
                self.by_flow.insert(flow_id.clone(), request);
            }
            None => self
                .by_path
                .entry(path_key(&exchange.path))
                .or_default()
                .push_back(request),
        }
    }

    fn take(&mut self, exchange: &Exchange) -> Option<OutstandingRequest> {
        if let Some(request) = exchange
            .flow_id
            .as_ref()
            .and_then(|flow_id| self.by_flow.remove(flow_id))
        {
            return Some(request);
        }
        let key = path_key(&exchange.path);
        let queue = self.by_path.get_mut(&key)?;
        let request = queue.pop_front();
        if queue.is_empty() {
            self.by_path.remove(&key);
        }
        request
    }

    fn expire(&mut self, now: DateTime<Utc>, window: chrono::Duration) -> usize {
        let is_live = |r: &OutstandingRequest| now.signed_duration_since(r.observed_at) <= window;
        let before = self.len();
        self.by_flow.retain(|_, r| is_live(r));
        for queue in self.by_path.values_mut() {
            queue.retain(|r| is_live(r));
        }
        self.by_path.retain(|_, queue| !queue.is_empty());
        before - self.len()
    }

    fn len(&self) -> usize {
        self.by_flow.len() + self.by_path.values().map(VecDeque::len).sum::<usize>()
    }

    fn clear(&mut self) {
        self.by_flow.clear();
        self.by_path.clear();
    }
}

/// Path without query string, used to pair responses with requests
fn path_key(path: &str) -> String {
    path.split('?').next().unwrap_or(path).to_ascii_lowercase()
}

struct EngineState {
    store: CorrelationStore,
    ledger: RequestLedger,
}

/// Work left to do once the state lock is released
enum Finalize {
    Complete(ShellFragment),
    Merge(MergeReady),
}

/// Capture engine
pub struct CaptureEngine {
    state: Arc<Mutex<EngineState>>,
    resolver: OrderResolver,
    sink: PlaylistSink,
    catalog: Option<Arc<dyn CatalogLookup>>,
    catalog_timeout: Duration,
    event_bus: EventBus,
    target_ids: HashSet<PlaylistId>,
    window: chrono::Duration,
    shut_down: AtomicBool,
}

impl CaptureEngine {
    /// Engine without catalog or target filter
    pub fn new(correlation: CorrelationConfig, sink: PlaylistSink) -> Self {
        let window = correlation.window();
        Self {
            state: Arc::new(Mutex::new(EngineState {
                store: CorrelationStore::new(correlation),
                ledger: RequestLedger::default(),
            })),
            resolver: OrderResolver::without_catalog(),
            sink,
            catalog: None,
            catalog_timeout: DEFAULT_CATALOG_TIMEOUT,
            event_bus: EventBus::new(DEFAULT_EVENT_CAPACITY),
            target_ids: HashSet::new(),
            window,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Engine configured from resolved settings
    pub fn from_settings(settings: &ExtractSettings, catalog: Option<Arc<dyn CatalogLookup>>) -> Self {
        let mut engine = Self::new(settings.correlation.clone(), PlaylistSink::new(&settings.output_dir))
            .with_target_ids(settings.target_ids.iter().cloned());
        if let Some(catalog) = catalog {
            engine = engine.with_catalog(catalog, settings.catalog_timeout);
        }
        engine
    }

    /// Use `catalog` to fill gaps and remember saved playlists
    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogLookup>, timeout: Duration) -> Self {
        self.resolver = OrderResolver::new(Some(catalog.clone()), timeout);
        self.catalog = Some(catalog);
        self.catalog_timeout = timeout;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Only persist these playlist ids (empty: persist all)
    pub fn with_target_ids(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.target_ids = ids.into_iter().collect();
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CaptureEvent> {
        self.event_bus.subscribe()
    }

    pub fn sink(&self) -> &PlaylistSink {
        &self.sink
    }

    pub async fn status(&self) -> EngineStatus {
        let state = self.state.lock().await;
        EngineStatus {
            store: state.store.status(),
            outstanding_requests: state.ledger.len(),
        }
    }

    /// Stop accepting exchanges and discard pending state
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        let status = state.store.status();
        state.store = CorrelationStore::new(state.store.config().clone());
        state.ledger.clear();
        tracing::info!(
            pending_shells = status.pending_shells,
            unassigned_details = status.unassigned_details,
            "Capture engine shut down, pending fragments discarded"
        );
    }

    /// Process one observed exchange
    ///
    /// Never fails: decode errors, soft misses and write failures are all
    /// reported as outcomes (and logged / broadcast).
    pub async fn on_exchange_observed(&self, exchange: Exchange) -> Vec<EngineOutcome> {
        if self.shut_down.load(Ordering::SeqCst) {
            return vec![EngineOutcome::ShutDown];
        }

        let now = exchange.timestamp;
        let mut outcomes = Vec::new();

        let finalize = {
            let mut state = self.state.lock().await;
            if self.shut_down.load(Ordering::SeqCst) {
                return vec![EngineOutcome::ShutDown];
            }
            let expired = state.store.sweep(now);
            let dropped_requests = state.ledger.expire(now, self.window);
            if dropped_requests > 0 {
                tracing::debug!(count = dropped_requests, "Dropped unanswered requests");
            }
            for item in expired {
                outcomes.push(self.report_expired(item));
            }

            let route = exchange.route();
            if route == ExchangeRoute::Other {
                outcomes.push(EngineOutcome::Ignored);
                return outcomes;
            }

            match exchange.direction {
                Direction::Request => {
                    outcomes.push(self.record_request(&mut state.ledger, &exchange, route));
                    return outcomes;
                }
                Direction::Response => {
                    let request = state.ledger.take(&exchange);
                    match self.accept_response(&mut state.store, &exchange, request) {
                        Ok(finalize) => finalize,
                        Err(outcome) => {
                            outcomes.push(outcome);
                            return outcomes;
                        }
                    }
                }
            }
        };

        let merged = match finalize {
            Finalize::Complete(shell) => self.resolver.finalize_complete(&shell),
            Finalize::Merge(ready) => self.resolver.merge(&ready.shell, ready.detail.songs).await,
        };
        outcomes.push(self.persist(merged).await);
        outcomes
    }

    fn report_expired(&self, item: Expired) -> EngineOutcome {
        tracing::info!(
            side = %item.side,
            playlist_id = ?item.playlist_id,
            waited_ms = item.waited_ms,
            "Fragment expired without a partner"
        );
        self.event_bus.emit_lossy(CaptureEvent::FragmentExpired {
            side: item.side,
            playlist_id: item.playlist_id.clone(),
            waited_ms: item.waited_ms,
            timestamp: Utc::now(),
        });
        EngineOutcome::Expired {
            side: item.side,
            playlist_id: item.playlist_id,
        }
    }

    fn drop_exchange(&self, exchange: &Exchange, reason: String) -> EngineOutcome {
        tracing::warn!(
            path = %exchange.path,
            direction = ?exchange.direction,
            reason = %reason,
            "Dropping exchange"
        );
        self.event_bus.emit_lossy(CaptureEvent::ExchangeDropped {
            path: exchange.path.clone(),
            reason: reason.clone(),
            timestamp: Utc::now(),
        });
        EngineOutcome::Dropped { reason }
    }

    fn record_request(&self, ledger: &mut RequestLedger, exchange: &Exchange, route: ExchangeRoute) -> EngineOutcome {
        let decoded = match envelope_codec::decode(&exchange.raw_body) {
            Ok(decoded) => decoded,
            Err(e) => {
                ledger.record(
                    exchange,
                    OutstandingRequest {
                        hint: None,
                        ids_requested: Vec::new(),
                        observed_at: exchange.timestamp,
                    },
                );
                return self.drop_exchange(exchange, e.to_string());
            }
        };

        let (hint, ids_requested) = match route {
            ExchangeRoute::PlaylistFetch => (requested_playlist_id(&decoded.document), Vec::new()),
            ExchangeRoute::SongDetail => (None, requested_track_ids(&decoded.document)),
            ExchangeRoute::Other => (None, Vec::new()),
        };

        tracing::debug!(
            path = %exchange.path,
            hint = ?hint,
            requested = ids_requested.len(),
            "Request recorded"
        );
        ledger.record(
            exchange,
            OutstandingRequest {
                hint,
                ids_requested,
                observed_at: exchange.timestamp,
            },
        );
        EngineOutcome::RequestRecorded { route }
    }

    /// Decode, classify and store a response; `Ok` when a playlist is ready
    fn accept_response(
        &self,
        store: &mut CorrelationStore,
        exchange: &Exchange,
        request: Option<OutstandingRequest>,
    ) -> Result<Finalize, EngineOutcome> {
        let decoded = envelope_codec::decode(&exchange.raw_body)
            .map_err(|e| self.drop_exchange(exchange, e.to_string()))?;

        let (hint, ids_requested) = match request {
            Some(r) => (r.hint, r.ids_requested),
            None => {
                tracing::debug!(path = %exchange.path, "Response without a recorded request");
                (None, Vec::new())
            }
        };

        let outcome = match classify(decoded.document) {
            Fragment::Shell(shell) => {
                if let Some(hint) = hint.as_ref().filter(|h| **h != shell.playlist_id) {
                    tracing::warn!(
                        requested = %hint,
                        received = %shell.playlist_id,
                        "Playlist id differs from request, using response id"
                    );
                }
                tracing::debug!(
                    playlist_id = %shell.playlist_id,
                    track_ids = shell.track_ids.len(),
                    self_complete = shell.self_complete,
                    "Shell received"
                );
                store.on_shell(shell, exchange.timestamp)
            }
            Fragment::Detail(detail) => {
                tracing::debug!(
                    songs = detail.songs.len(),
                    requested = ids_requested.len(),
                    "Detail received"
                );
                store.on_detail(detail, ids_requested, hint, exchange.timestamp)
            }
            Fragment::Unclassified => {
                tracing::debug!(path = %exchange.path, "Unclassified response ignored");
                return Err(EngineOutcome::Unclassified);
            }
        };

        match outcome {
            StoreOutcome::Complete(shell) => Ok(Finalize::Complete(shell)),
            StoreOutcome::Ready(ready) => Ok(Finalize::Merge(ready)),
            StoreOutcome::Pending(playlist_id) => Err(EngineOutcome::Pending {
                playlist_id: Some(playlist_id),
            }),
            StoreOutcome::Unassigned => Err(EngineOutcome::Pending { playlist_id: None }),
        }
    }

    async fn persist(&self, merged: MergedPlaylist) -> EngineOutcome {
        let playlist_id = merged.playlist_id.clone();

        if !self.target_ids.is_empty() && !self.target_ids.contains(&playlist_id) {
            tracing::info!(playlist_id = %playlist_id, "Playlist not in target ids, skipping");
            return EngineOutcome::Skipped { playlist_id };
        }

        let path = match self.sink.write(&playlist_id, &merged.document) {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(playlist_id = %playlist_id, error = %e, "Failed to save playlist");
                self.event_bus.emit_lossy(CaptureEvent::PersistenceFailed {
                    playlist_id: playlist_id.clone(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                return EngineOutcome::PersistFailed {
                    playlist_id,
                    error: e.to_string(),
                };
            }
        };

        tracing::info!(
            playlist_id = %playlist_id,
            name = merged.name().unwrap_or(""),
            tracks = merged.track_count,
            unresolved = merged.unresolved.len(),
            origin = ?merged.origin,
            path = %path.display(),
            "Playlist saved"
        );
        self.event_bus.emit_lossy(CaptureEvent::PlaylistSaved {
            playlist_id: playlist_id.clone(),
            name: merged.name().map(str::to_string),
            track_count: merged.track_count,
            unresolved_count: merged.unresolved.len(),
            origin: merged.origin,
            path: path.display().to_string(),
            timestamp: Utc::now(),
        });

        if let Some(catalog) = &self.catalog {
            match tokio::time::timeout(self.catalog_timeout, catalog.record_playlist(&merged)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(playlist_id = %playlist_id, error = %e, "Failed to record playlist in catalog")
                }
                Err(_) => tracing::warn!(
                    playlist_id = %playlist_id,
                    timeout_ms = self.catalog_timeout.as_millis() as u64,
                    "Catalog update timed out"
                ),
            }
        }

        EngineOutcome::Saved {
            playlist_id,
            path,
            track_count: merged.track_count,
            unresolved: merged.unresolved.len(),
            origin: merged.origin,
        }
    }
}

impl Default for CaptureEngine {
    fn default() -> Self {
        Self::new(CorrelationConfig::default(), PlaylistSink::new("playlists"))
    }
}

impl std::fmt::Debug for CaptureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureEngine")
            .field("output_dir", &self.sink.output_dir())
            .field("catalog", &self.catalog.is_some())
            .field("catalog_timeout", &self.catalog_timeout)
            .field("target_ids", &self.target_ids)
            .field("window", &self.window)
            .finish()
    }
}
