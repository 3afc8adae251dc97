//! Data models for the capture pipeline

pub mod exchange;
pub mod fragment;

pub use exchange::{Direction, Exchange, ExchangeRoute};
pub use fragment::{DetailFragment, Fragment, MergedPlaylist, ShellFragment};
