//! # NCM Common Library
//!
//! Shared code for the NCM capture crates including:
//! - Configuration loading (TOML) and root folder resolution
//! - Event types (CaptureEvent enum) and the broadcast EventBus
//! - Common error type
//! - Time helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
