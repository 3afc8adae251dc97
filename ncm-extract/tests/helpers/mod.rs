//! Test Helper Utilities
//!
//! Shared utilities for ncm-extract integration tests

pub mod fixtures;
pub mod log_capture;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use log_capture::LogCapture;
