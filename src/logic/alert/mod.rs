//! Alert Module
//!
//! - `types`: Alert, AlertRecord (wire format), AlertStats
//! - `manager`: dedup, lifecycle, hand-off
//! - `sink`: sink boundary and concrete sinks

pub mod types;
pub mod manager;
pub mod sink;

pub use types::{Alert, AlertChange, AlertRecord, AlertStats, AlertStatus, AlertWindow};
pub use manager::AlertManager;
pub use sink::{
    build_sink, spawn_sink_task, AlertSink, JsonlSink, LogSink, MemorySink, SinkHandle, WebhookSink,
};
