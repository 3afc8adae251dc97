//! Exchanges handed over by the interception layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of an HTTP flow was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Request,
    Response,
}

/// One observed request or response body
///
/// The interception layer has already filtered to the relevant domains.
/// `flow_id` ties a response to its request when the layer can provide it;
/// without it responses pair with the oldest unanswered request on the
/// same path.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub direction: Direction,
    pub path: String,
    pub raw_body: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub flow_id: Option<String>,
}

impl Exchange {
    pub fn request(path: impl Into<String>, raw_body: impl Into<Vec<u8>>, timestamp: DateTime<Utc>) -> Self {
        Self {
            direction: Direction::Request,
            path: path.into(),
            raw_body: raw_body.into(),
            timestamp,
            flow_id: None,
        }
    }

    pub fn response(path: impl Into<String>, raw_body: impl Into<Vec<u8>>, timestamp: DateTime<Utc>) -> Self {
        Self {
            direction: Direction::Response,
            path: path.into(),
            raw_body: raw_body.into(),
            timestamp,
            flow_id: None,
        }
    }

    pub fn with_flow_id(mut self, flow_id: impl Into<String>) -> Self {
        self.flow_id = Some(flow_id.into());
        self
    }

    pub fn route(&self) -> ExchangeRoute {
        ExchangeRoute::from_path(&self.path)
    }
}

/// EAPI endpoints the engine cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeRoute {
    /// `/eapi/playlist/...` (shell-producing)
    PlaylistFetch,
    /// `/eapi/v3/song/detail` and friends (detail-producing)
    SongDetail,
    Other,
}

impl ExchangeRoute {
    pub fn from_path(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        if !lower.contains("/eapi/") {
            return ExchangeRoute::Other;
        }
        if lower.contains("/song/detail") {
            ExchangeRoute::SongDetail
        } else if lower.contains("playlist") {
            ExchangeRoute::PlaylistFetch
        } else {
            ExchangeRoute::Other
        }
    }
}
