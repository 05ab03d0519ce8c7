//! Telemetry Module - Pipeline metrics
//!
//! Counters are plain atomics shared through `Arc<Metrics>`.
//! Queue depth gauges live in the FlowController; `MetricsSnapshot` joins both.
//!
//! - `reporter`: periodic JSON snapshot to the log

pub mod reporter;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logic::flow::BoundaryGauge;
use crate::logic::vocab::{TokenCount, VocabStats};

pub use reporter::spawn_reporter;

// ============================================================================
// COUNTERS
// ============================================================================

#[derive(Debug, Default)]
pub struct Metrics {
    pub lines_read: AtomicU64,
    pub source_errors: AtomicU64,
    pub parse_failures: AtomicU64,
    pub records_parsed: AtomicU64,
    /// Parse được nhưng không detector nào có key cho record này
    pub records_unkeyed: AtomicU64,
    pub windows_emitted: AtomicU64,
    pub windows_scored: AtomicU64,
    pub score_failures: AtomicU64,
    pub score_cache_hits: AtomicU64,
    pub scorer_latency_us_total: AtomicU64,
    pub scorer_latency_us_max: AtomicU64,
    pub verdicts_alerting: AtomicU64,
    pub alerts_created: AtomicU64,
    pub alerts_updated: AtomicU64,
    pub sink_delivered: AtomicU64,
    pub sink_failures: AtomicU64,
    pub keys_evicted: AtomicU64,
    pub model_swaps: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_scorer_latency(&self, elapsed: Duration) {
        let us = elapsed.as_micros() as u64;
        self.scorer_latency_us_total.fetch_add(us, Ordering::Relaxed);
        self.scorer_latency_us_max.fetch_max(us, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub lines_read: u64,
    pub source_errors: u64,
    pub parse_failures: u64,
    pub records_parsed: u64,
    pub records_unkeyed: u64,
    /// Matches per dialect
    pub dialect_matches: BTreeMap<String, u64>,
    pub oov_rate: f64,
    pub vocab_size: usize,
    pub windows_emitted: u64,
    pub windows_scored: u64,
    pub score_failures: u64,
    pub score_cache_hits: u64,
    pub scorer_latency_avg_ms: f64,
    pub scorer_latency_max_ms: f64,
    pub verdicts_alerting: u64,
    pub alerts_created: u64,
    pub alerts_updated: u64,
    pub sink_delivered: u64,
    pub sink_failures: u64,
    pub keys_evicted: u64,
    pub model_swaps: u64,
    pub model_version: String,
    /// Most frequent event tokens
    pub top_tokens: Vec<TokenCount>,
    /// Per boundary: depth, max depth, drops, blocked
    pub boundaries: BTreeMap<String, BoundaryGauge>,
}

impl MetricsSnapshot {
    pub fn collect(
        metrics: &Metrics,
        dialect_matches: BTreeMap<String, u64>,
        vocab: VocabStats,
        boundaries: BTreeMap<String, BoundaryGauge>,
        model_version: String,
    ) -> Self {
        let scored = Metrics::get(&metrics.windows_scored);
        let total_us = Metrics::get(&metrics.scorer_latency_us_total);
        let avg_ms = if scored > 0 {
            total_us as f64 / scored as f64 / 1000.0
        } else {
            0.0
        };

        Self {
            taken_at: Utc::now(),
            lines_read: Metrics::get(&metrics.lines_read),
            source_errors: Metrics::get(&metrics.source_errors),
            parse_failures: Metrics::get(&metrics.parse_failures),
            records_parsed: Metrics::get(&metrics.records_parsed),
            records_unkeyed: Metrics::get(&metrics.records_unkeyed),
            dialect_matches,
            oov_rate: vocab.oov_rate,
            vocab_size: vocab.size,
            windows_emitted: Metrics::get(&metrics.windows_emitted),
            windows_scored: scored,
            score_failures: Metrics::get(&metrics.score_failures),
            score_cache_hits: Metrics::get(&metrics.score_cache_hits),
            scorer_latency_avg_ms: avg_ms,
            scorer_latency_max_ms: Metrics::get(&metrics.scorer_latency_us_max) as f64 / 1000.0,
            verdicts_alerting: Metrics::get(&metrics.verdicts_alerting),
            alerts_created: Metrics::get(&metrics.alerts_created),
            alerts_updated: Metrics::get(&metrics.alerts_updated),
            sink_delivered: Metrics::get(&metrics.sink_delivered),
            sink_failures: Metrics::get(&metrics.sink_failures),
            keys_evicted: Metrics::get(&metrics.keys_evicted),
            model_swaps: Metrics::get(&metrics.model_swaps),
            model_version,
            top_tokens: vocab.top_tokens,
            boundaries,
        }
    }

    /// Total drops across boundaries
    pub fn total_drops(&self) -> u64 {
        self.boundaries.values().map(|g| g.drops).sum()
    }

    pub fn drops(&self, boundary: &str) -> u64 {
        self.boundaries.get(boundary).map(|g| g.drops).unwrap_or(0)
    }

    pub fn blocked(&self, boundary: &str) -> u64 {
        self.boundaries.get(boundary).map(|g| g.blocked).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::config::GrowthMode;

    #[test]
    fn test_latency_average_and_max() {
        let metrics = Metrics::new();
        Metrics::add(&metrics.windows_scored, 2);
        metrics.record_scorer_latency(Duration::from_millis(2));
        metrics.record_scorer_latency(Duration::from_millis(6));

        let vocab = VocabStats {
            size: 2,
            lookups: 0,
            oov_hits: 0,
            oov_rate: 0.0,
            persisted: 2,
            growth: GrowthMode::Open,
            top_tokens: Vec::new(),
        };
        let snap = MetricsSnapshot::collect(&metrics, BTreeMap::new(), vocab, BTreeMap::new(), "m".into());
        assert!((snap.scorer_latency_avg_ms - 4.0).abs() < 1e-9);
        assert!((snap.scorer_latency_max_ms - 6.0).abs() < 1e-9);
        assert_eq!(snap.total_drops(), 0);
    }
}
