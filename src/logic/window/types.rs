//! Window Types
//!
//! EntityKey scopes every ordering/state invariant. Window is immutable once emitted.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logic::parser::NormalizedRecord;

// ============================================================================
// DETECTOR FAMILY / ENTITY KEY
// ============================================================================

/// Which field pairs with the host to form the key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorFamily {
    /// (host, process)
    Process,
    /// (host, user)
    User,
}

impl DetectorFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorFamily::Process => "process",
            DetectorFamily::User => "user",
        }
    }
}

impl fmt::Display for DetectorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializes as `{host, process}` or `{host, user}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityKey {
    Process { host: String, process: String },
    User { host: String, user: String },
}

impl EntityKey {
    pub fn process(host: &str, process: &str) -> Self {
        EntityKey::Process {
            host: host.to_string(),
            process: process.to_string(),
        }
    }

    pub fn user(host: &str, user: &str) -> Self {
        EntityKey::User {
            host: host.to_string(),
            user: user.to_string(),
        }
    }

    /// None when the record lacks the field this family needs
    pub fn for_record(record: &NormalizedRecord, family: DetectorFamily) -> Option<Self> {
        match family {
            DetectorFamily::Process => record
                .process
                .as_deref()
                .map(|p| Self::process(&record.host, p)),
            DetectorFamily::User => record.user.as_deref().map(|u| Self::user(&record.host, u)),
        }
    }

    pub fn host(&self) -> &str {
        match self {
            EntityKey::Process { host, .. } | EntityKey::User { host, .. } => host,
        }
    }

    pub fn family(&self) -> DetectorFamily {
        match self {
            EntityKey::Process { .. } => DetectorFamily::Process,
            EntityKey::User { .. } => DetectorFamily::User,
        }
    }

    /// Stable hash -> worker index. Same key always lands on the same worker.
    pub fn partition(&self, workers: usize) -> usize {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(self.family().as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.host().as_bytes());
        hasher.update(&[0]);
        match self {
            EntityKey::Process { process, .. } => hasher.update(process.as_bytes()),
            EntityKey::User { user, .. } => hasher.update(user.as_bytes()),
        }
        hasher.finalize() as usize % workers.max(1)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Process { host, process } => write!(f, "({}, {})", host, process),
            EntityKey::User { host, user } => write!(f, "({}, user:{})", host, user),
        }
    }
}

// ============================================================================
// WINDOW
// ============================================================================

static NEXT_WINDOW_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(pub u64);

impl WindowId {
    /// Process-wide unique
    pub fn next() -> Self {
        WindowId(NEXT_WINDOW_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Why the window left the builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmitReason {
    /// Buffer reached L
    Full,
    /// Idle timeout T, padded
    Idle,
    /// Final flush on shutdown, padded
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub id: WindowId,
    pub entity_key: EntityKey,
    /// Exactly L ids; short windows are padded with PAD at the tail
    pub sequence: Vec<u32>,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    /// Offsets of the records inside (no padding)
    pub record_refs: Vec<u64>,
    pub padded: usize,
    pub reason: EmitReason,
}

impl Window {
    /// Ids of real records (padding stripped)
    pub fn real_ids(&self) -> &[u32] {
        &self.sequence[..self.sequence.len() - self.padded]
    }
}
