//! Error types for ncm-extract
//!
//! Per-exchange failures never stop the engine; they surface here only where
//! a caller asked for one specific operation, such as decoding a single body
//! from the command line, opening the catalog or replaying a directory.

use crate::services::envelope_codec::CodecError;
use thiserror::Error;

/// ncm-extract error type
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Body could not be decrypted or parsed
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Catalog database could not be opened
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Capture file or directory unusable
    #[error("Replay error: {0}")]
    Replay(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error from ncm-common
    #[error("Common error: {0}")]
    Common(#[from] ncm_common::Error),
}

/// Result type alias for ncm-extract operations
pub type ExtractResult<T> = Result<T, ExtractError>;
