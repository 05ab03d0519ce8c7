//! Parser Types
//!
//! Raw lines in, normalized records out. KHÔNG chứa logic - chỉ data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// INPUT
// ============================================================================

/// One line as delivered by the log source. Consumed once by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLine {
    pub source_offset: u64,
    pub host: String,
    pub raw_text: String,
    pub ingest_time: DateTime<Utc>,
}

impl RawLine {
    pub fn new(source_offset: u64, host: &str, raw_text: &str, ingest_time: DateTime<Utc>) -> Self {
        Self {
            source_offset,
            host: host.to_string(),
            raw_text: raw_text.to_string(),
            ingest_time,
        }
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

/// Log dialects the parser understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// Unix auth.log / syslog (BSD or RFC3339 timestamp)
    Syslog,
    /// Windows-event key=value lines
    WindowsEvent,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Syslog => "syslog",
            Dialect::WindowsEvent => "windows_event",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized event. `tokens[0]` is always the event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub process: Option<String>,
    pub user: Option<String>,
    pub event_type: String,
    pub tokens: Vec<String>,
    /// Offset of the originating RawLine (reference only)
    pub raw_ref: u64,
    pub dialect: Dialect,
}

impl NormalizedRecord {
    /// Token fed into windows (one per record)
    pub fn event_token(&self) -> &str {
        &self.event_type
    }
}
