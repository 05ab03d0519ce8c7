//! Threshold Engine - Score -> Verdict
//!
//! Cutoff per detector family comes from configuration (calibrated offline),
//! or else from the model that produced the score. Never computed online. Hysteresis: a key in `alerting` stays there until
//! the score drops below `cutoff - margin`.
//!
//! - `store`: hysteresis state persisted across restarts

pub mod store;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::logic::config::DetectorConfig;
use crate::logic::error::ConfigError;
use crate::logic::model::Score;
use crate::logic::window::{DetectorFamily, EntityKey, WindowId};

pub use store::{load_hysteresis, save_hysteresis};

// ============================================================================
// SEVERITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::None,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Breakpoints on `score / cutoff`. Step function, monotonic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityBands {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for SeverityBands {
    fn default() -> Self {
        Self {
            low: 1.0,
            medium: 1.5,
            high: 2.0,
            critical: 3.0,
        }
    }
}

impl SeverityBands {
    pub fn validate(&self) -> Result<(), String> {
        let points = [self.low, self.medium, self.high, self.critical];
        if points.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err("severity band breakpoints must be positive".into());
        }
        if points.windows(2).any(|w| w[0] >= w[1]) {
            return Err("severity band breakpoints must be strictly increasing".into());
        }
        Ok(())
    }

    pub fn band(&self, ratio: f64) -> Severity {
        if ratio >= self.critical {
            Severity::Critical
        } else if ratio >= self.high {
            Severity::High
        } else if ratio >= self.medium {
            Severity::Medium
        } else if ratio >= self.low {
            Severity::Low
        } else {
            Severity::None
        }
    }
}

// ============================================================================
// VERDICT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub score_ref: WindowId,
    pub entity_key: EntityKey,
    pub severity: Severity,
    pub is_alert: bool,
    pub score: f64,
    pub cutoff: f64,
    pub model_version: String,
}

#[derive(Debug, Clone, Copy)]
struct FamilyThreshold {
    /// None: use the cutoff shipped with the scoring model
    cutoff: Option<f64>,
    margin: f64,
}

// ============================================================================
// ENGINE
// ============================================================================

/// One per worker; owns hysteresis state for the worker's keys
pub struct ThresholdEngine {
    families: HashMap<DetectorFamily, FamilyThreshold>,
    bands: SeverityBands,
    alerting: HashSet<EntityKey>,
}

impl ThresholdEngine {
    /// `model_cutoff` is the startup model's calibrated cutoff. It only validates
    /// detectors without their own cutoff; at evaluation time the cutoff carried
    /// on each `Score` is used, so a swapped model brings its own.
    pub fn new(
        detectors: &[DetectorConfig],
        model_cutoff: Option<f64>,
        bands: SeverityBands,
    ) -> Result<Self, ConfigError> {
        let mut families = HashMap::new();
        for d in detectors {
            let cutoff = d.cutoff.or(model_cutoff).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "detector {} has no cutoff and the model ships none",
                    d.family
                ))
            })?;
            if d.margin >= cutoff {
                return Err(ConfigError::Invalid(format!(
                    "detector {} margin must be below cutoff {}",
                    d.family, cutoff
                )));
            }
            families.insert(
                d.family,
                FamilyThreshold {
                    cutoff: d.cutoff,
                    margin: d.margin,
                },
            );
        }

        Ok(Self {
            families,
            bands,
            alerting: HashSet::new(),
        })
    }

    /// Configured cutoff first, then the cutoff of the model that scored
    pub fn cutoff_for(&self, score: &Score) -> Option<f64> {
        let th = self.families.get(&score.entity_key.family())?;
        th.cutoff.or(score.model_cutoff)
    }

    pub fn evaluate(&mut self, score: &Score) -> Verdict {
        let key = &score.entity_key;
        let verdict = |severity: Severity, is_alert: bool, cutoff: f64| Verdict {
            score_ref: score.window_ref,
            entity_key: key.clone(),
            severity,
            is_alert,
            score: score.value,
            cutoff,
            model_version: score.model_version.clone(),
        };

        let Some(th) = self.families.get(&key.family()).copied() else {
            // Family not active: never alert
            return verdict(Severity::None, false, f64::INFINITY);
        };
        let Some(cutoff) = self.cutoff_for(score) else {
            log::warn!(
                "Threshold: model {} ships no cutoff for {}, window {} not judged",
                score.model_version,
                key.family(),
                score.window_ref
            );
            return verdict(Severity::None, false, f64::INFINITY);
        };

        let ratio = score.value / cutoff;
        let was_alerting = self.alerting.contains(key);

        if score.value >= cutoff {
            if !was_alerting {
                log::debug!("Threshold: {} enters alerting ({:.3} >= {:.3})", key, score.value, cutoff);
                self.alerting.insert(key.clone());
            }
            let severity = self.bands.band(ratio).max(Severity::Low);
            return verdict(severity, true, cutoff);
        }

        if was_alerting {
            if score.value >= cutoff - th.margin {
                // Vùng trễ
                return verdict(Severity::Low, true, cutoff);
            }
            log::debug!("Threshold: {} leaves alerting ({:.3})", key, score.value);
            self.alerting.remove(key);
        }

        verdict(Severity::None, false, cutoff)
    }

    pub fn is_alerting(&self, key: &EntityKey) -> bool {
        self.alerting.contains(key)
    }

    /// Evicted key: no history carried over
    pub fn forget(&mut self, key: &EntityKey) {
        self.alerting.remove(key);
    }

    pub fn alerting_keys(&self) -> Vec<EntityKey> {
        self.alerting.iter().cloned().collect()
    }

    pub fn restore(&mut self, keys: impl IntoIterator<Item = EntityKey>) {
        self.alerting.extend(keys);
    }
}

// ============================================================================
// TESTS
// ============================================================================
