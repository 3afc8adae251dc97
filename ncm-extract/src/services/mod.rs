//! Capture pipeline services
//!
//! Codec → classifier → correlation store → resolver → sink, driven by the
//! capture engine.

pub mod capture_engine;
pub mod correlation_store;
pub mod envelope_codec;
pub mod fragment_classifier;
pub mod order_resolver;
pub mod playlist_sink;

pub use capture_engine::{CaptureEngine, EngineOutcome, EngineStatus};
pub use correlation_store::{CorrelationStore, MergeReady, StoreOutcome, StoreStatus};
pub use envelope_codec::{CodecError, DecodedPayload};
pub use order_resolver::OrderResolver;
pub use playlist_sink::{PersistenceError, PlaylistSink};
