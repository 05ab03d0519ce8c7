//! Logic Module - Pipeline stages & engines
//!
//! Chứa các stage của pipeline, theo thứ tự dữ liệu đi qua:
//! - `parser/` - raw lines → normalized records (syslog, Windows events)
//! - `vocab/` - token ↔ id, snapshot persistence
//! - `window/` - per-entity fixed-length windows
//! - `model/` - scoring models, hot-swap registry, scorer adapter
//! - `threshold/` - cutoffs, hysteresis, severity bands
//! - `alert/` - dedup, lifecycle, sinks
//! - `flow/` - bounded boundaries with block/shed policies
//! - `telemetry/` - counters and periodic snapshots
//! - `pipeline/` - orchestration

// Shared
pub mod config;
pub mod error;

// Stages
pub mod parser;
pub mod vocab;
pub mod window;
pub mod model;
pub mod threshold;
pub mod alert;

// Plumbing
pub mod flow;
pub mod telemetry;
pub mod pipeline;
