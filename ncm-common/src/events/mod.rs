//! Event types for the NCM capture event system
//!
//! Provides the shared event definitions and EventBus used by the capture
//! engine to report what happened to each exchange and playlist.

mod capture_types;

pub use capture_types::{FragmentSide, SaveOrigin};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Capture event types
///
/// Events are broadcast via EventBus and serialize with a `type` tag so a
/// status collaborator can forward them as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CaptureEvent {
    /// A playlist file was written
    PlaylistSaved {
        playlist_id: String,
        /// Playlist name, if the shell carried one
        name: Option<String>,
        /// Tracks actually written (always equals the file's trackCount)
        track_count: usize,
        /// Ids from the shell that could not be resolved
        unresolved_count: usize,
        origin: SaveOrigin,
        path: String,
        timestamp: DateTime<Utc>,
    },

    /// A pending fragment aged out without a partner (soft miss)
    FragmentExpired {
        side: FragmentSide,
        playlist_id: Option<String>,
        /// How long the fragment waited, in milliseconds
        waited_ms: i64,
        timestamp: DateTime<Utc>,
    },

    /// An exchange could not be decoded and was dropped
    ExchangeDropped {
        path: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Writing a merged playlist failed; the next merge for the id retries
    PersistenceFailed {
        playlist_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl CaptureEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            CaptureEvent::PlaylistSaved { .. } => "PlaylistSaved",
            CaptureEvent::FragmentExpired { .. } => "FragmentExpired",
            CaptureEvent::ExchangeDropped { .. } => "ExchangeDropped",
            CaptureEvent::PersistenceFailed { .. } => "PersistenceFailed",
        }
    }
}

/// Broadcast bus for capture events
///
/// Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CaptureEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered before slow receivers
    /// start losing the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: CaptureEvent,
    ) -> Result<usize, broadcast::error::SendError<CaptureEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CaptureEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
