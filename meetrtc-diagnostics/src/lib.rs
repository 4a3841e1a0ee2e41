//! # meetrtc diagnostics
//!
//! Structured logging setup shared by hosts embedding meetrtc.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod debug_logger;

// Re-export main types
pub use debug_logger::{DebugLogger, LogConfig};
