//! Logsight Core - streaming log anomaly detection
//!
//! Parser → Vocabulary → Window Builder → Scorer → Threshold → Alerts → Sink,
//! with bounded, policy-driven queues between the stages.

pub mod constants;
pub mod logic;
