//! Window Builder
//!
//! Per EntityKey: ACCUMULATING -> READY (L records) -> emitted -> ACCUMULATING.
//! Owned by exactly one worker, so no locking.
//!
//! - Full emit keeps the last `overlap` records (0 = tumbling)
//! - Idle flush (T) pads a short window with PAD and clears the buffer
//! - Keys idle longer than the eviction TTL are forgotten entirely

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{EmitReason, EntityKey, Window, WindowId};
use crate::logic::config::WindowConfig;
use crate::logic::vocab::PAD_ID;

#[derive(Debug, Clone)]
struct BufferedRecord {
    id: u32,
    timestamp: DateTime<Utc>,
    raw_ref: u64,
}

#[derive(Debug)]
struct KeyState {
    buffer: VecDeque<BufferedRecord>,
    /// Records never part of an emitted window
    fresh: usize,
    last_activity: Instant,
    last_ts: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowStats {
    pub emitted_full: u64,
    pub emitted_idle: u64,
    pub emitted_shutdown: u64,
    /// Record có timestamp cũ hơn record trước (đã clamp)
    pub late_records: u64,
    pub evicted_keys: u64,
}

impl WindowStats {
    pub fn emitted(&self) -> u64 {
        self.emitted_full + self.emitted_idle + self.emitted_shutdown
    }
}

pub struct WindowBuilder {
    length: usize,
    overlap: usize,
    idle_timeout: Duration,
    eviction_ttl: Duration,
    states: HashMap<EntityKey, KeyState>,
    stats: WindowStats,
}

impl WindowBuilder {
    pub fn new(config: &WindowConfig) -> Self {
        Self {
            length: config.length.max(1),
            overlap: config.overlap.min(config.length.saturating_sub(1)),
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
            eviction_ttl: Duration::from_secs(config.eviction_ttl_secs),
            states: HashMap::new(),
            stats: WindowStats::default(),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Append one record. Returns the window if the buffer reached L.
    pub fn push(
        &mut self,
        key: &EntityKey,
        token_id: u32,
        timestamp: DateTime<Utc>,
        raw_ref: u64,
        now: Instant,
    ) -> Option<Window> {
        let state = self.states.entry(key.clone()).or_insert_with(|| {
            log::debug!("Window builder: new key {}", key);
            KeyState {
                buffer: VecDeque::with_capacity(self.length),
                fresh: 0,
                last_activity: now,
                last_ts: None,
            }
        });

        let timestamp = match state.last_ts {
            Some(prev) if timestamp < prev => {
                self.stats.late_records += 1;
                prev
            }
            _ => timestamp,
        };

        state.last_ts = Some(timestamp);
        state.last_activity = now;
        state.fresh += 1;
        state.buffer.push_back(BufferedRecord {
            id: token_id,
            timestamp,
            raw_ref,
        });

        if state.buffer.len() < self.length {
            return None;
        }

        // READY
        let window = build_window(key, &state.buffer, self.length, EmitReason::Full);
        while state.buffer.len() > self.overlap {
            state.buffer.pop_front();
        }
        state.fresh = 0;
        self.stats.emitted_full += 1;
        Some(window)
    }

    /// Flush keys idle for at least T that hold fresh records
    pub fn poll_idle(&mut self, now: Instant) -> Vec<Window> {
        let mut windows = Vec::new();
        for (key, state) in self.states.iter_mut() {
            if state.fresh > 0 && now.saturating_duration_since(state.last_activity) >= self.idle_timeout {
                windows.push(build_window(key, &state.buffer, self.length, EmitReason::Idle));
                state.buffer.clear();
                state.fresh = 0;
            }
        }
        self.stats.emitted_idle += windows.len() as u64;
        sort_by_start(&mut windows);
        windows
    }

    /// Drop keys idle longer than the TTL; returns them so other per-key state can go too
    pub fn evict_idle(&mut self, now: Instant) -> Vec<EntityKey> {
        let ttl = self.eviction_ttl;
        let expired: Vec<EntityKey> = self
            .states
            .iter()
            .filter(|(_, s)| s.fresh == 0 && now.saturating_duration_since(s.last_activity) >= ttl)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            self.states.remove(key);
            log::debug!("Window builder: evicted idle key {}", key);
        }
        self.stats.evicted_keys += expired.len() as u64;
        expired
    }

    /// Shutdown: every key with fresh records emits a final (possibly short) window
    pub fn flush_all(&mut self) -> Vec<Window> {
        let mut windows = Vec::new();
        for (key, state) in self.states.iter_mut() {
            if state.fresh > 0 {
                windows.push(build_window(key, &state.buffer, self.length, EmitReason::Shutdown));
                state.buffer.clear();
                state.fresh = 0;
            }
        }
        self.stats.emitted_shutdown += windows.len() as u64;
        sort_by_start(&mut windows);
        windows
    }

    pub fn active_keys(&self) -> usize {
        self.states.len()
    }

    pub fn buffered(&self, key: &EntityKey) -> usize {
        self.states.get(key).map(|s| s.buffer.len()).unwrap_or(0)
    }

    /// Last time the key saw a record (used to pick the most-idle key when shedding)
    pub fn last_activity(&self, key: &EntityKey) -> Option<Instant> {
        self.states.get(key).map(|s| s.last_activity)
    }

    pub fn stats(&self) -> &WindowStats {
        &self.stats
    }
}

fn build_window(
    key: &EntityKey,
    buffer: &VecDeque<BufferedRecord>,
    length: usize,
    reason: EmitReason,
) -> Window {
    let mut sequence: Vec<u32> = buffer.iter().map(|r| r.id).collect();
    let padded = length.saturating_sub(sequence.len());
    sequence.resize(length, PAD_ID);

    // Buffer không bao giờ rỗng ở đây: caller đã kiểm tra fresh > 0 hoặc len == L
    let start_ts = buffer.front().map(|r| r.timestamp).unwrap_or_else(Utc::now);
    let end_ts = buffer.back().map(|r| r.timestamp).unwrap_or(start_ts);

    Window {
        id: WindowId::next(),
        entity_key: key.clone(),
        sequence,
        start_ts,
        end_ts,
        record_refs: buffer.iter().map(|r| r.raw_ref).collect(),
        padded,
        reason,
    }
}

fn sort_by_start(windows: &mut [Window]) {
    windows.sort_by(|a, b| a.start_ts.cmp(&b.start_ts).then(a.id.cmp(&b.id)));
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(length: usize, overlap: usize) -> WindowConfig {
        WindowConfig {
            length,
            overlap,
            idle_timeout_ms: 1_000,
            eviction_ttl_secs: 10,
        }
    }

    fn ts(sec: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + sec, 0).unwrap()
    }

    #[test]
    fn test_tumbling_windows_do_not_overlap() {
        let mut builder = WindowBuilder::new(&config(3, 0));
        let key = EntityKey::process("h1", "sshd");
        let now = Instant::now();

        let windows: Vec<Window> = (0..9)
            .filter_map(|i| builder.push(&key, 10 + i as u32, ts(i), i as u64, now))
            .collect();

        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].record_refs, vec![0, 1, 2]);
        assert_eq!(windows[1].record_refs, vec![3, 4, 5]);
        assert_eq!(windows[2].record_refs, vec![6, 7, 8]);
        for pair in windows.windows(2) {
            assert!(pair[0].end_ts < pair[1].start_ts);
        }
        assert_eq!(builder.buffered(&key), 0);
    }

    #[test]
    fn test_overlap_is_exact() {
        let mut builder = WindowBuilder::new(&config(4, 2));
        let key = EntityKey::process("h1", "sshd");
        let now = Instant::now();

        let windows: Vec<Window> = (0..10)
            .filter_map(|i| builder.push(&key, 10 + i as u32, ts(i), i as u64, now))
            .collect();

        assert_eq!(windows.len(), 4);
        for pair in windows.windows(2) {
            let tail = &pair[0].record_refs[2..];
            let head = &pair[1].record_refs[..2];
            assert_eq!(tail, head);
            assert!(pair[0].start_ts < pair[1].start_ts);
        }
    }

    #[test]
    fn test_idle_flush_pads_short_window() {
        let mut builder = WindowBuilder::new(&config(5, 0));
        let key = EntityKey::user("h1", "bob");
        let t0 = Instant::now();

        builder.push(&key, 7, ts(0), 0, t0);
        builder.push(&key, 8, ts(1), 1, t0);

        assert!(builder.poll_idle(t0 + Duration::from_millis(500)).is_empty());

        let windows = builder.poll_idle(t0 + Duration::from_millis(1_000));
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].sequence, vec![7, 8, PAD_ID, PAD_ID, PAD_ID]);
        assert_eq!(windows[0].padded, 3);
        assert_eq!(windows[0].real_ids(), &[7, 8]);
        assert_eq!(windows[0].reason, EmitReason::Idle);

        // Nothing fresh, nothing more to flush
        assert!(builder.poll_idle(t0 + Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn test_retained_overlap_alone_does_not_idle_flush() {
        let mut builder = WindowBuilder::new(&config(3, 1));
        let key = EntityKey::process("h1", "cron");
        let t0 = Instant::now();
        for i in 0..3 {
            builder.push(&key, 3, ts(i), i as u64, t0);
        }
        assert_eq!(builder.buffered(&key), 1);
        assert!(builder.poll_idle(t0 + Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn test_eviction_starts_fresh() {
        let mut builder = WindowBuilder::new(&config(3, 0));
        let key = EntityKey::process("h1", "sshd");
        let t0 = Instant::now();

        builder.push(&key, 5, ts(0), 0, t0);
        let flushed = builder.poll_idle(t0 + Duration::from_secs(2));
        assert_eq!(flushed.len(), 1);

        let evicted = builder.evict_idle(t0 + Duration::from_secs(10));
        assert_eq!(evicted, vec![key.clone()]);
        assert_eq!(builder.active_keys(), 0);

        // Earlier timestamp is accepted as-is: no history carried over
        let t1 = t0 + Duration::from_secs(11);
        builder.push(&key, 6, ts(-100), 1, t1);
        assert_eq!(builder.stats().late_records, 0);
        assert_eq!(builder.buffered(&key), 1);
    }

    #[test]
    fn test_late_record_is_clamped() {
        let mut builder = WindowBuilder::new(&config(2, 0));
        let key = EntityKey::process("h1", "sshd");
        let now = Instant::now();

        builder.push(&key, 5, ts(10), 0, now);
        let w = builder.push(&key, 5, ts(5), 1, now).unwrap();
        assert_eq!(w.start_ts, ts(10));
        assert_eq!(w.end_ts, ts(10));
        assert_eq!(builder.stats().late_records, 1);
    }

    #[test]
    fn test_flush_all_on_shutdown() {
        let mut builder = WindowBuilder::new(&config(4, 0));
        let now = Instant::now();
        builder.push(&EntityKey::process("a", "x"), 2, ts(0), 0, now);
        builder.push(&EntityKey::process("b", "y"), 3, ts(1), 1, now);

        let windows = builder.flush_all();
        assert_eq!(windows.len(), 2);
        assert!(windows.iter().all(|w| w.reason == EmitReason::Shutdown && w.padded == 3));
        assert_eq!(builder.stats().emitted(), 2);
    }

    #[test]
    fn test_partition_is_stable() {
        let key = EntityKey::process("h1", "sshd");
        let first = key.partition(8);
        for _ in 0..5 {
            assert_eq!(key.partition(8), first);
        }
        assert!(first < 8);
        assert_eq!(key.partition(1), 0);
    }

    #[test]
    fn test_entity_key_json_shape() {
        let json = serde_json::to_value(EntityKey::process("h1", "sshd")).unwrap();
        assert_eq!(json, serde_json::json!({"host": "h1", "process": "sshd"}));

        let back: EntityKey = serde_json::from_value(serde_json::json!({"host": "h1", "user": "bob"})).unwrap();
        assert_eq!(back, EntityKey::user("h1", "bob"));
    }
}
