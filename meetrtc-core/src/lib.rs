//! # meetrtc core
//!
//! Foundational types shared by every meetrtc crate: the error taxonomy,
//! media kind and source tags, and the typed event fan-out used in place of
//! string-keyed event emitters.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod emitter;
pub mod error;
pub mod model;

// Re-export main types
pub use emitter::{Emitter, EventStream};
pub use error::{MeetRtcError, Result};
pub use model::{AppData, MediaKind, MediaSource};
