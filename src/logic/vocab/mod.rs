//! Vocabulary - token <-> id mapping
//!
//! Shared by every entity worker. Lookups take the read lock only;
//! assigning a new id is the single write-locked critical section.
//! Ids are never reassigned or reused.
//!
//! - id 0: `<PAD>` (short windows)
//! - id 1: `<OOV>` (unseen token in frozen mode or at capacity)

pub mod snapshot;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::logic::config::GrowthMode;
use crate::logic::error::VocabError;
use snapshot::{append_oov, append_snapshot, read_snapshot, OovEntry, SnapshotHeader};

pub const PAD_ID: u32 = 0;
pub const OOV_ID: u32 = 1;
pub const PAD_TOKEN: &str = "<PAD>";
pub const OOV_TOKEN: &str = "<OOV>";
pub const FIRST_TOKEN_ID: u32 = 2;

/// Distinct unseen tokens remembered between checkpoints
const MAX_PENDING_OOV: usize = 10_000;

/// Most frequent tokens reported in stats
const TOP_TOKENS: usize = 5;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug)]
pub struct VocabEntry {
    pub token: String,
    pub id: u32,
    pub first_seen: DateTime<Utc>,
    pub frequency: AtomicU64,
}

impl VocabEntry {
    fn new(token: String, id: u32) -> Self {
        Self {
            token,
            id,
            first_seen: Utc::now(),
            frequency: AtomicU64::new(0),
        }
    }
}

struct Table {
    ids: HashMap<String, u32>,
    /// Indexed by id
    entries: Vec<VocabEntry>,
}

#[derive(Default)]
struct OovLog {
    seen: HashSet<String>,
    pending: Vec<OovEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCount {
    pub token: String,
    pub id: u32,
    pub frequency: u64,
    pub first_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabStats {
    pub size: usize,
    pub lookups: u64,
    pub oov_hits: u64,
    pub oov_rate: f64,
    pub persisted: usize,
    pub growth: GrowthMode,
    #[serde(default)]
    pub top_tokens: Vec<TokenCount>,
}

// ============================================================================
// VOCABULARY
// ============================================================================

pub struct Vocabulary {
    table: RwLock<Table>,
    growth: GrowthMode,
    capacity: AtomicUsize,
    /// Ids below this are already in the snapshot file
    persisted: AtomicUsize,
    /// Size the snapshot had at load time (None = fresh)
    loaded_size: Option<usize>,
    loaded_header: Option<SnapshotHeader>,
    lookups: AtomicU64,
    oov_hits: AtomicU64,
    oov: Mutex<OovLog>,
    /// Last header written; also serializes checkpoints
    last_header: Mutex<Option<SnapshotHeader>>,
}

impl Vocabulary {
    pub fn new(growth: GrowthMode, capacity: usize) -> Self {
        let entries = vec![
            VocabEntry::new(PAD_TOKEN.to_string(), PAD_ID),
            VocabEntry::new(OOV_TOKEN.to_string(), OOV_ID),
        ];
        let ids = entries.iter().map(|e| (e.token.clone(), e.id)).collect();

        Self {
            table: RwLock::new(Table { ids, entries }),
            growth,
            capacity: AtomicUsize::new(capacity),
            persisted: AtomicUsize::new(FIRST_TOKEN_ID as usize),
            loaded_size: None,
            loaded_header: None,
            lookups: AtomicU64::new(0),
            oov_hits: AtomicU64::new(0),
            oov: Mutex::new(OovLog::default()),
            last_header: Mutex::new(None),
        }
    }

    /// Restore from a snapshot file. Missing file = fresh vocabulary.
    pub fn load(path: &Path, growth: GrowthMode, capacity: usize) -> Result<Self, VocabError> {
        let mut vocab = Self::new(growth, capacity);

        let Some(loaded) = read_snapshot(path)? else {
            log::info!("No vocabulary snapshot at {:?}, starting fresh", path);
            return Ok(vocab);
        };

        {
            let table = vocab.table.get_mut();
            for token in loaded.tokens {
                let id = table.entries.len() as u32;
                table.ids.insert(token.clone(), id);
                table.entries.push(VocabEntry::new(token, id));
            }
        }
        let size = vocab.len();
        vocab.persisted.store(size, Ordering::SeqCst);
        vocab.loaded_size = Some(size);
        *vocab.last_header.get_mut() = loaded.header.clone();
        vocab.loaded_header = loaded.header;

        log::info!("Loaded vocabulary snapshot: {} ids from {:?}", size, path);
        Ok(vocab)
    }

    /// Startup check against the model's expected input vocabulary.
    ///
    /// Rejects a snapshot holding ids the model cannot accept, or one written for a
    /// different model whose size disagrees. Caps further growth at the model's size.
    pub fn reconcile(&self, expected: Option<usize>, model_version: &str) -> Result<(), VocabError> {
        let Some(expected) = expected else {
            return Ok(());
        };

        if let Some(snapshot) = self.loaded_size {
            let other_model = self
                .loaded_header
                .as_ref()
                .map(|h| h.model_version_compat != model_version)
                .unwrap_or(true);

            if snapshot > expected || (other_model && snapshot != expected) {
                return Err(VocabError::SizeMismatch {
                    snapshot,
                    expected,
                    model_version: model_version.to_string(),
                });
            }
        }

        let size = self.len();
        if !self.cap_to(expected) {
            return Err(VocabError::SizeMismatch {
                snapshot: size,
                expected,
                model_version: model_version.to_string(),
            });
        }
        Ok(())
    }

    /// Stop growth at `size` ids. False (and nothing changed) if the table is already larger.
    ///
    /// Runs under the write lock, so no id past the cap is assigned once it returns true.
    pub fn cap_to(&self, size: usize) -> bool {
        let table = self.table.write();
        if table.entries.len() > size {
            return false;
        }
        let capacity = self.capacity.load(Ordering::SeqCst).min(size);
        self.capacity.store(capacity, Ordering::SeqCst);
        log::debug!("Vocabulary: growth capped at {} ids", capacity);
        true
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    /// Never fails. Unseen tokens grow the vocabulary (open mode) or map to OOV.
    pub fn intern(&self, token: &str) -> u32 {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        {
            let table = self.table.read();
            if let Some(&id) = table.ids.get(token) {
                table.entries[id as usize].frequency.fetch_add(1, Ordering::Relaxed);
                return id;
            }
            if !self.can_grow(table.entries.len()) {
                drop(table);
                return self.record_oov(token);
            }
        }

        let mut table = self.table.write();
        // Worker khác có thể đã gán id trong lúc chờ write lock
        if let Some(&id) = table.ids.get(token) {
            table.entries[id as usize].frequency.fetch_add(1, Ordering::Relaxed);
            return id;
        }
        if !self.can_grow(table.entries.len()) {
            drop(table);
            return self.record_oov(token);
        }

        let id = table.entries.len() as u32;
        let entry = VocabEntry::new(token.to_string(), id);
        entry.frequency.store(1, Ordering::Relaxed);
        table.entries.push(entry);
        table.ids.insert(token.to_string(), id);
        log::debug!("Vocabulary: new token {:?} -> {}", token, id);
        id
    }

    /// Read-only lookup; never grows
    pub fn lookup(&self, token: &str) -> Option<u32> {
        self.table.read().ids.get(token).copied()
    }

    pub fn resolve(&self, id: u32) -> Option<String> {
        self.table
            .read()
            .entries
            .get(id as usize)
            .map(|e| e.token.clone())
    }

    /// Most frequent assigned tokens, reserved ids excluded
    pub fn top_tokens(&self, n: usize) -> Vec<TokenCount> {
        let table = self.table.read();
        let mut counts: Vec<TokenCount> = table.entries[FIRST_TOKEN_ID as usize..]
            .iter()
            .map(|e| TokenCount {
                token: e.token.clone(),
                id: e.id,
                frequency: e.frequency.load(Ordering::Relaxed),
                first_seen: e.first_seen,
            })
            .collect();
        counts.sort_by(|a, b| b.frequency.cmp(&a.frequency).then(a.id.cmp(&b.id)));
        counts.truncate(n);
        counts
    }

    /// Total ids including reserved ones
    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= FIRST_TOKEN_ID as usize
    }

    pub fn oov_rate(&self) -> f64 {
        let lookups = self.lookups.load(Ordering::Relaxed);
        if lookups == 0 {
            return 0.0;
        }
        self.oov_hits.load(Ordering::Relaxed) as f64 / lookups as f64
    }

    pub fn stats(&self) -> VocabStats {
        VocabStats {
            size: self.len(),
            lookups: self.lookups.load(Ordering::Relaxed),
            oov_hits: self.oov_hits.load(Ordering::Relaxed),
            oov_rate: self.oov_rate(),
            persisted: self.persisted.load(Ordering::Relaxed),
            growth: self.growth,
            top_tokens: self.top_tokens(TOP_TOKENS),
        }
    }

    fn can_grow(&self, current: usize) -> bool {
        self.growth == GrowthMode::Open && current < self.capacity.load(Ordering::Relaxed)
    }

    fn record_oov(&self, token: &str) -> u32 {
        self.oov_hits.fetch_add(1, Ordering::Relaxed);

        let mut oov = self.oov.lock();
        if oov.seen.len() < MAX_PENDING_OOV && oov.seen.insert(token.to_string()) {
            oov.pending.push(OovEntry {
                token: token.to_string(),
                first_seen: Utc::now(),
            });
        }
        OOV_ID
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    /// Append ids assigned since the last checkpoint, then a fresh header.
    /// Nothing is written when neither the ids nor the model changed.
    /// Returns how many entries were written.
    pub fn checkpoint(&self, path: &Path, model_version: &str) -> Result<usize, VocabError> {
        let mut last_header = self.last_header.lock();

        let from = self.persisted.load(Ordering::SeqCst);
        let (entries, size) = {
            let table = self.table.read();
            let entries: Vec<(String, u32)> = table.entries[from..]
                .iter()
                .map(|e| (e.token.clone(), e.id))
                .collect();
            (entries, table.entries.len())
        };

        let header = SnapshotHeader {
            vocab_size: size,
            model_version_compat: model_version.to_string(),
        };
        // Header unchanged + no new ids: file already current
        if !entries.is_empty() || last_header.as_ref() != Some(&header) {
            append_snapshot(path, &entries, &header)?;
            self.persisted.store(size, Ordering::SeqCst);
            *last_header = Some(header);
        }

        let pending = {
            let mut oov = self.oov.lock();
            oov.seen.clear();
            std::mem::take(&mut oov.pending)
        };
        append_oov(&oov_log_path(path), &pending)?;

        if !entries.is_empty() {
            log::debug!("Vocabulary checkpoint: {} new ids, size {}", entries.len(), size);
        }
        Ok(entries.len())
    }
}

/// `oov.jsonl` next to the snapshot
pub fn oov_log_path(snapshot: &Path) -> PathBuf {
    snapshot
        .parent()
        .map(|p| p.join("oov.jsonl"))
        .unwrap_or_else(|| PathBuf::from("oov.jsonl"))
}
