//! Window Module
//!
//! - `types`: EntityKey, DetectorFamily, Window
//! - `builder`: per-key buffering, idle flush, eviction

pub mod types;
pub mod builder;

pub use types::{DetectorFamily, EmitReason, EntityKey, Window, WindowId};
pub use builder::{WindowBuilder, WindowStats};
