//! Persistence sink
//!
//! Writes merged playlists as `playlist_<id>.json`. Each write goes to a
//! uniquely named temp file in the destination directory, is synced, then
//! renamed over the target, so readers only ever see a complete file.

use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Persistence errors
///
/// All are recoverable: the next merge for the same playlist retries.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Playlist id not usable as a file name: {0:?}")]
    InvalidId(String),
}

/// Writes playlist documents into one output directory
#[derive(Debug, Clone)]
pub struct PlaylistSink {
    output_dir: PathBuf,
}

impl PlaylistSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Final path for a playlist id
    pub fn path_for(&self, playlist_id: &str) -> Result<PathBuf, PersistenceError> {
        validate_id(playlist_id)?;
        Ok(self.output_dir.join(format!("playlist_{}.json", playlist_id)))
    }

    /// Atomically write `data` as pretty-printed JSON
    ///
    /// Last writer wins; identical input produces byte-identical files.
    pub fn write(&self, playlist_id: &str, data: &Value) -> Result<PathBuf, PersistenceError> {
        let final_path = self.path_for(playlist_id)?;
        let mut bytes = serde_json::to_vec_pretty(data)?;
        bytes.push(b'\n');

        std::fs::create_dir_all(&self.output_dir).map_err(|source| PersistenceError::Io {
            path: self.output_dir.clone(),
            source,
        })?;

        let temp_path = self
            .output_dir
            .join(format!(".playlist_{}.json.{}.tmp", playlist_id, Uuid::new_v4()));

        if let Err(e) = write_synced(&temp_path, &bytes) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        if let Err(source) = std::fs::rename(&temp_path, &final_path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(PersistenceError::Io {
                path: final_path,
                source,
            });
        }

        tracing::debug!(
            playlist_id = %playlist_id,
            path = %final_path.display(),
            bytes = bytes.len(),
            "Playlist file written"
        );
        Ok(final_path)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let io_err = |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::create(path).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    Ok(())
}

fn validate_id(playlist_id: &str) -> Result<(), PersistenceError> {
    let valid = !playlist_id.is_empty()
        && playlist_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(PersistenceError::InvalidId(playlist_id.to_string()))
    }
}
