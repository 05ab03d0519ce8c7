//! Pipeline Configuration Types
//!
//! Externally supplied. Every field has a default so a partial JSON file works.

use std::path::PathBuf;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::logic::flow::{Boundary, OverflowPolicy};
use crate::logic::threshold::SeverityBands;
use crate::logic::window::DetectorFamily;

// ============================================================================
// ROOT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Size of the entity worker pool
    pub workers: usize,
    /// Active detector families with their calibrated cutoffs
    pub detectors: Vec<DetectorConfig>,
    pub window: WindowConfig,
    pub alert: AlertConfig,
    /// Ratio breakpoints for severity banding
    pub severity_bands: SeverityBands,
    pub boundaries: BoundaryConfigs,
    pub scorer: ScorerConfig,
    pub model: ModelConfig,
    pub vocabulary: VocabConfig,
    pub sink: SinkConfig,
    /// Where vocabulary and hysteresis state live
    pub state_dir: Option<PathBuf>,
    pub shutdown_grace_ms: u64,
    pub metrics_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            detectors: vec![DetectorConfig::default()],
            window: WindowConfig::default(),
            alert: AlertConfig::default(),
            severity_bands: SeverityBands::default(),
            boundaries: BoundaryConfigs::default(),
            scorer: ScorerConfig::default(),
            model: ModelConfig::default(),
            vocabulary: VocabConfig::default(),
            sink: SinkConfig::default(),
            state_dir: None,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            metrics_interval_secs: DEFAULT_METRICS_INTERVAL_SECS,
        }
    }
}

impl PipelineConfig {
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(get_state_dir)
    }

    pub fn vocabulary_snapshot_path(&self) -> PathBuf {
        self.vocabulary
            .snapshot_path
            .clone()
            .unwrap_or_else(|| self.state_dir().join("vocabulary.jsonl"))
    }

    pub fn hysteresis_path(&self) -> PathBuf {
        self.state_dir().join("hysteresis.json")
    }

    /// Dedup window defaults to the eviction TTL
    pub fn dedup_window_secs(&self) -> u64 {
        self.alert
            .dedup_window_secs
            .unwrap_or(self.window.eviction_ttl_secs)
    }
}

// ============================================================================
// DETECTORS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub family: DetectorFamily,
    /// Calibrated offline. None = use the cutoff shipped with the model artifact.
    #[serde(default)]
    pub cutoff: Option<f64>,
    /// Hysteresis margin below cutoff before an alerting key returns to none
    #[serde(default)]
    pub margin: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            family: DetectorFamily::Process,
            cutoff: None,
            margin: 0.0,
        }
    }
}

// ============================================================================
// WINDOWING
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window length L
    pub length: usize,
    /// Records retained after a full emit (0 = tumbling)
    pub overlap: usize,
    /// Idle timeout T for short-window flush
    pub idle_timeout_ms: u64,
    /// Idle keys older than this are evicted
    pub eviction_ttl_secs: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            length: DEFAULT_WINDOW_LENGTH,
            overlap: 0,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            eviction_ttl_secs: DEFAULT_EVICTION_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub dedup_window_secs: Option<u64>,
}

// ============================================================================
// FLOW CONTROL
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundaryConfig {
    pub max_depth: usize,
    pub policy: OverflowPolicy,
}

/// A missing entry is a startup error, not a silent unbounded queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryConfigs {
    #[serde(default)]
    pub source: Option<BoundaryConfig>,
    #[serde(default)]
    pub scorer: Option<BoundaryConfig>,
    #[serde(default)]
    pub sink: Option<BoundaryConfig>,
}

impl Default for BoundaryConfigs {
    fn default() -> Self {
        Self {
            source: Some(BoundaryConfig {
                max_depth: DEFAULT_QUEUE_DEPTH,
                policy: OverflowPolicy::Block,
            }),
            scorer: Some(BoundaryConfig {
                max_depth: DEFAULT_QUEUE_DEPTH,
                policy: OverflowPolicy::Shed,
            }),
            sink: Some(BoundaryConfig {
                max_depth: DEFAULT_QUEUE_DEPTH,
                policy: OverflowPolicy::Shed,
            }),
        }
    }
}

impl BoundaryConfigs {
    pub fn get(&self, boundary: Boundary) -> Option<BoundaryConfig> {
        match boundary {
            Boundary::Source => self.source,
            Boundary::Scorer => self.scorer,
            Boundary::Sink => self.sink,
        }
    }
}

// ============================================================================
// SCORER / MODEL
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub timeout_ms: u64,
    /// Extra attempts after a timeout or model failure
    pub retries: u32,
    pub backoff_ms: u64,
    /// Recent (window, model_version) scores kept to avoid double scoring
    pub cache_size: usize,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_SCORER_TIMEOUT_MS,
            retries: 1,
            backoff_ms: 25,
            cache_size: 4_096,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Rules,
    Frequency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub kind: ModelKind,
    /// None = built-in rule table
    pub artifact: Option<PathBuf>,
    /// Reload the artifact when it changes on disk
    pub watch: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            kind: ModelKind::Rules,
            artifact: None,
            watch: false,
        }
    }
}

// ============================================================================
// VOCABULARY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrowthMode {
    /// Unseen tokens get fresh ids
    Open,
    /// Unseen tokens map to OOV
    Frozen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabConfig {
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_interval_secs: u64,
    pub growth: GrowthMode,
    pub max_size: usize,
    /// Persist at all (tests turn this off)
    pub persist: bool,
}

impl Default for VocabConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            snapshot_interval_secs: DEFAULT_SNAPSHOT_INTERVAL_SECS,
            growth: GrowthMode::Open,
            max_size: 100_000,
            persist: true,
        }
    }
}

// ============================================================================
// SINK
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Log,
    Jsonl,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    /// Directory for the JSONL sink
    pub path: Option<PathBuf>,
    /// Endpoint for the webhook sink
    pub url: Option<String>,
    /// One bounded hand-off attempt
    pub timeout_ms: u64,
    /// Webhook-internal retries
    pub retries: u32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::Log,
            path: None,
            url: None,
            timeout_ms: DEFAULT_SINK_TIMEOUT_MS,
            retries: 2,
        }
    }
}
