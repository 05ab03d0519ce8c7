//! Scorer Adapter
//!
//! `score(Window) -> Score`. The model call runs on the blocking pool under a
//! timeout; timeouts and model failures are retried with jittered backoff,
//! then surface as `ScoreError`. The model handle is captured once per call,
//! so a hot-swap mid-call does not change which version scores the window.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::registry::ModelRegistry;
use super::ScoringModel;
use crate::logic::config::ScorerConfig;
use crate::logic::error::ScoreError;
use crate::logic::telemetry::Metrics;
use crate::logic::window::{EntityKey, Window, WindowId};

/// One Score per (window, model_version). Never recomputed in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub window_ref: WindowId,
    pub entity_key: EntityKey,
    pub value: f64,
    pub model_version: String,
    /// Calibrated cutoff of the model that produced this score
    #[serde(default)]
    pub model_cutoff: Option<f64>,
    pub computed_at: DateTime<Utc>,
}

// ============================================================================
// SCORE CACHE
// ============================================================================

type CacheKey = (WindowId, String);

/// Giới hạn kích thước, xóa theo thứ tự insert
struct ScoreCache {
    capacity: usize,
    scores: HashMap<CacheKey, Score>,
    order: VecDeque<CacheKey>,
}

impl ScoreCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            scores: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, key: &CacheKey) -> Option<Score> {
        self.scores.get(key).cloned()
    }

    fn insert(&mut self, key: CacheKey, score: Score) {
        if self.scores.insert(key.clone(), score).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.scores.remove(&old);
            }
        }
    }
}

// ============================================================================
// ADAPTER
// ============================================================================

pub struct ScorerAdapter {
    registry: Arc<ModelRegistry>,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
    cache: Mutex<ScoreCache>,
    metrics: Arc<Metrics>,
}

impl ScorerAdapter {
    pub fn new(registry: Arc<ModelRegistry>, config: &ScorerConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            registry,
            timeout: Duration::from_millis(config.timeout_ms),
            retries: config.retries,
            backoff: Duration::from_millis(config.backoff_ms),
            cache: Mutex::new(ScoreCache::new(config.cache_size)),
            metrics,
        }
    }

    /// Calibrated cutoff shipped with the current model
    pub fn cutoff(&self) -> Option<f64> {
        self.registry.current().cutoff()
    }

    pub async fn score(&self, window: &Window) -> Result<Score, ScoreError> {
        let model = self.registry.current();
        let cache_key = (window.id, model.version().to_string());

        let cached = self.cache.lock().get(&cache_key);
        if let Some(score) = cached {
            Metrics::incr(&self.metrics.score_cache_hits);
            return Ok(score);
        }

        let mut attempt = 0;
        let value = loop {
            match self.call_once(&model, window).await {
                Ok(value) => break value,
                Err(reason) if attempt < self.retries => {
                    attempt += 1;
                    let delay = self.backoff_delay(attempt);
                    log::debug!(
                        "Scorer: window {} attempt {} failed ({}), retry in {:?}",
                        window.id,
                        attempt,
                        reason,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(reason) => {
                    Metrics::incr(&self.metrics.score_failures);
                    return Err(ScoreError {
                        window_ref: window.id,
                        reason,
                    });
                }
            }
        };

        let score = Score {
            window_ref: window.id,
            entity_key: window.entity_key.clone(),
            value,
            model_version: cache_key.1.clone(),
            model_cutoff: model.cutoff(),
            computed_at: Utc::now(),
        };
        self.cache.lock().insert(cache_key, score.clone());
        Metrics::incr(&self.metrics.windows_scored);
        Ok(score)
    }

    async fn call_once(&self, model: &Arc<dyn ScoringModel>, window: &Window) -> Result<f64, String> {
        let model = model.clone();
        let sequence = window.sequence.clone();
        let started = Instant::now();

        let task = tokio::task::spawn_blocking(move || model.score(&sequence));
        let result = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => return Err(format!("timeout after {:?}", self.timeout)),
            Ok(Err(join)) => return Err(format!("scoring task failed: {}", join)),
            Ok(Ok(result)) => result,
        };
        self.metrics.record_scorer_latency(started.elapsed());

        match result {
            Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
            Ok(v) => Err(format!("model returned out-of-range score {}", v)),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Exponential with +-50% jitter
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff.as_millis() as u64 * (1u64 << attempt.saturating_sub(1).min(6));
        if base == 0 {
            return Duration::ZERO;
        }
        let jitter = rand::thread_rng().gen_range(base / 2..=base + base / 2);
        Duration::from_millis(jitter)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::error::ModelError;
    use crate::logic::window::EmitReason;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeModel {
        version: String,
        calls: AtomicU32,
        fail_first: u32,
        delay: Duration,
    }

    impl FakeModel {
        fn new(version: &str) -> Self {
            Self {
                version: version.into(),
                calls: AtomicU32::new(0),
                fail_first: 0,
                delay: Duration::ZERO,
            }
        }
    }

    impl ScoringModel for FakeModel {
        fn score(&self, sequence: &[u32]) -> Result<f64, ModelError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if n < self.fail_first {
                return Err(ModelError::Internal("boom".into()));
            }
            Ok(sequence.iter().sum::<u32>() as f64 / 10.0)
        }
        fn version(&self) -> &str {
            &self.version
        }
        fn sequence_length(&self) -> usize {
            3
        }
    }

    fn window() -> Window {
        Window {
            id: WindowId::next(),
            entity_key: EntityKey::process("h1", "sshd"),
            sequence: vec![2, 3, 5],
            start_ts: Utc::now(),
            end_ts: Utc::now(),
            record_refs: vec![1, 2, 3],
            padded: 0,
            reason: EmitReason::Full,
        }
    }

    fn config(timeout_ms: u64, retries: u32) -> ScorerConfig {
        ScorerConfig {
            timeout_ms,
            retries,
            backoff_ms: 1,
            cache_size: 16,
        }
    }

    #[tokio::test]
    async fn test_score_is_cached_per_model_version() {
        let model = Arc::new(FakeModel::new("m1"));
        let registry = Arc::new(ModelRegistry::new(model.clone()));
        let metrics = Arc::new(Metrics::new());
        let adapter = ScorerAdapter::new(registry, &config(500, 0), metrics.clone());

        let w = window();
        let a = adapter.score(&w).await.unwrap();
        let b = adapter.score(&w).await.unwrap();

        assert_eq!(a, b);
        assert!((a.value - 1.0).abs() < 1e-9);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(Metrics::get(&metrics.score_cache_hits), 1);
    }

    #[tokio::test]
    async fn test_new_model_version_scores_again() {
        let registry = Arc::new(ModelRegistry::new(Arc::new(FakeModel::new("m1"))));
        let adapter = ScorerAdapter::new(registry.clone(), &config(500, 0), Arc::new(Metrics::new()));

        let w = window();
        let first = adapter.score(&w).await.unwrap();
        registry.swap(Arc::new(FakeModel::new("m2"))).unwrap();
        let second = adapter.score(&w).await.unwrap();

        assert_eq!(first.model_version, "m1");
        assert_eq!(second.model_version, "m2");
        assert_eq!(first.value, second.value);
    }

    #[tokio::test]
    async fn test_timeout_yields_score_error() {
        let mut slow = FakeModel::new("slow");
        slow.delay = Duration::from_millis(200);
        let registry = Arc::new(ModelRegistry::new(Arc::new(slow)));
        let metrics = Arc::new(Metrics::new());
        let adapter = ScorerAdapter::new(registry, &config(20, 0), metrics.clone());

        let w = window();
        let err = adapter.score(&w).await.unwrap_err();
        assert_eq!(err.window_ref, w.id);
        assert!(err.reason.contains("timeout"));
        assert_eq!(Metrics::get(&metrics.score_failures), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let mut flaky = FakeModel::new("flaky");
        flaky.fail_first = 1;
        let flaky = Arc::new(flaky);
        let registry = Arc::new(ModelRegistry::new(flaky.clone()));
        let adapter = ScorerAdapter::new(registry, &config(500, 2), Arc::new(Metrics::new()));

        assert!(adapter.score(&window()).await.is_ok());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_after_retries() {
        let mut broken = FakeModel::new("broken");
        broken.fail_first = u32::MAX;
        let registry = Arc::new(ModelRegistry::new(Arc::new(broken)));
        let adapter = ScorerAdapter::new(registry, &config(500, 1), Arc::new(Metrics::new()));

        let err = adapter.score(&window()).await.unwrap_err();
        assert!(err.reason.contains("boom"));
    }
}
