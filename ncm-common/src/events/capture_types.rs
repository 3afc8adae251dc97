//! Supporting types carried by capture events

use serde::{Deserialize, Serialize};

/// Which half of a playlist a pending fragment was
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FragmentSide {
    /// Playlist metadata + ordered track id list
    Shell,
    /// Detail fragment filed under a playlist id
    Detail,
    /// Detail fragment that never found its playlist
    UnassignedDetail,
}

impl std::fmt::Display for FragmentSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FragmentSide::Shell => write!(f, "shell"),
            FragmentSide::Detail => write!(f, "detail"),
            FragmentSide::UnassignedDetail => write!(f, "unassigned detail"),
        }
    }
}

/// How a playlist reached the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveOrigin {
    /// Shell response already carried its tracks
    SelfComplete,
    /// Shell and detail fragments were correlated and merged
    Merged,
}
