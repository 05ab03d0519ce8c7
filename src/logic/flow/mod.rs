//! Flow Controller - bounded hand-offs with an explicit overflow policy
//!
//! Three boundaries: source -> parser, window builder -> scorer, alert manager -> sink.
//! Each has a max depth and a policy. No policy = config error at startup.
//!
//! - `pending`: per-worker queue of unscored windows (shed target)

pub mod pending;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::logic::config::BoundaryConfigs;
use crate::logic::error::ConfigError;

pub use pending::PendingQueue;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Boundary {
    Source,
    Scorer,
    Sink,
}

impl Boundary {
    pub const ALL: [Boundary; 3] = [Boundary::Source, Boundary::Scorer, Boundary::Sink];

    pub fn as_str(&self) -> &'static str {
        match self {
            Boundary::Source => "source",
            Boundary::Scorer => "scorer",
            Boundary::Sink => "sink",
        }
    }

    fn index(&self) -> usize {
        match self {
            Boundary::Source => 0,
            Boundary::Scorer => 1,
            Boundary::Sink => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Backpressure: tạm dừng nhận input
    Block,
    /// Drop work and count it
    Shed,
}

/// What to do with one more unit of work at a boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    Block,
    Shed,
}

/// Exported per boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryGauge {
    pub depth: usize,
    pub max_depth: usize,
    pub policy: OverflowPolicy,
    pub drops: u64,
    pub blocked: u64,
}

struct BoundaryState {
    max_depth: usize,
    policy: OverflowPolicy,
    depth: AtomicUsize,
    drops: AtomicU64,
    blocked: AtomicU64,
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct FlowController {
    boundaries: [BoundaryState; 3],
}

impl FlowController {
    pub fn new(config: &BoundaryConfigs) -> Result<Self, ConfigError> {
        let state = |boundary: Boundary| -> Result<BoundaryState, ConfigError> {
            let cfg = config.get(boundary).ok_or_else(|| {
                ConfigError::Invalid(format!("no overflow policy for boundary {}", boundary.as_str()))
            })?;
            Ok(BoundaryState {
                max_depth: cfg.max_depth.max(1),
                policy: cfg.policy,
                depth: AtomicUsize::new(0),
                drops: AtomicU64::new(0),
                blocked: AtomicU64::new(0),
            })
        };

        Ok(Self {
            boundaries: [
                state(Boundary::Source)?,
                state(Boundary::Scorer)?,
                state(Boundary::Sink)?,
            ],
        })
    }

    fn get(&self, boundary: Boundary) -> &BoundaryState {
        &self.boundaries[boundary.index()]
    }

    pub fn policy(&self, boundary: Boundary) -> OverflowPolicy {
        self.get(boundary).policy
    }

    pub fn max_depth(&self, boundary: Boundary) -> usize {
        self.get(boundary).max_depth
    }

    pub fn depth(&self, boundary: Boundary) -> usize {
        self.get(boundary).depth.load(Ordering::Relaxed)
    }

    pub fn is_full(&self, boundary: Boundary) -> bool {
        self.depth(boundary) >= self.max_depth(boundary)
    }

    /// Accept while under max depth, else the boundary's policy
    pub fn admit(&self, boundary: Boundary) -> Admission {
        if !self.is_full(boundary) {
            return Admission::Accept;
        }
        match self.policy(boundary) {
            OverflowPolicy::Block => Admission::Block,
            OverflowPolicy::Shed => Admission::Shed,
        }
    }

    pub fn enter(&self, boundary: Boundary) {
        self.get(boundary).depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn leave(&self, boundary: Boundary) {
        let depth = &self.get(boundary).depth;
        let _ = depth.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)));
    }

    pub fn record_drop(&self, boundary: Boundary) {
        self.get(boundary).drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self, boundary: Boundary) {
        self.get(boundary).blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn drops(&self, boundary: Boundary) -> u64 {
        self.get(boundary).drops.load(Ordering::Relaxed)
    }

    pub fn blocked(&self, boundary: Boundary) -> u64 {
        self.get(boundary).blocked.load(Ordering::Relaxed)
    }

    pub fn gauges(&self) -> BTreeMap<String, BoundaryGauge> {
        Boundary::ALL
            .iter()
            .map(|b| {
                let s = self.get(*b);
                (
                    b.as_str().to_string(),
                    BoundaryGauge {
                        depth: s.depth.load(Ordering::Relaxed),
                        max_depth: s.max_depth,
                        policy: s.policy,
                        drops: s.drops.load(Ordering::Relaxed),
                        blocked: s.blocked.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::config::BoundaryConfig;

    fn configs(policy: OverflowPolicy) -> BoundaryConfigs {
        let b = Some(BoundaryConfig { max_depth: 2, policy });
        BoundaryConfigs { source: b, scorer: b, sink: b }
    }

    #[test]
    fn test_admit_follows_policy_when_full() {
        let flow = FlowController::new(&configs(OverflowPolicy::Shed)).unwrap();
        assert_eq!(flow.admit(Boundary::Scorer), Admission::Accept);
        flow.enter(Boundary::Scorer);
        flow.enter(Boundary::Scorer);
        assert_eq!(flow.admit(Boundary::Scorer), Admission::Shed);
        flow.leave(Boundary::Scorer);
        assert_eq!(flow.admit(Boundary::Scorer), Admission::Accept);

        let flow = FlowController::new(&configs(OverflowPolicy::Block)).unwrap();
        flow.enter(Boundary::Source);
        flow.enter(Boundary::Source);
        assert_eq!(flow.admit(Boundary::Source), Admission::Block);
    }

    #[test]
    fn test_leave_never_underflows() {
        let flow = FlowController::new(&configs(OverflowPolicy::Block)).unwrap();
        flow.leave(Boundary::Sink);
        assert_eq!(flow.depth(Boundary::Sink), 0);
    }

    #[test]
    fn test_missing_policy_is_error() {
        let mut cfg = configs(OverflowPolicy::Shed);
        cfg.scorer = None;
        assert!(FlowController::new(&cfg).is_err());
    }

    #[test]
    fn test_gauges_report_counters() {
        let flow = FlowController::new(&configs(OverflowPolicy::Shed)).unwrap();
        flow.record_drop(Boundary::Scorer);
        flow.record_blocked(Boundary::Source);
        let gauges = flow.gauges();
        assert_eq!(gauges["scorer"].drops, 1);
        assert_eq!(gauges["source"].blocked, 1);
        assert_eq!(gauges["sink"].max_depth, 2);
    }
}
