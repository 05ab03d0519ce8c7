//! Alert Manager
//!
//! One per worker. Dedup key = EntityKey: an open alert whose last_seen is within
//! the dedup window absorbs the verdict (occurrence_count += 1, severity = max).
//! Every creation and every update is handed to the sink exactly once.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use super::sink::SinkHandle;
use super::types::{Alert, AlertChange, AlertRecord, AlertStats, AlertStatus, AlertWindow};
use crate::logic::telemetry::Metrics;
use crate::logic::threshold::{Severity, Verdict};
use crate::logic::vocab::Vocabulary;
use crate::logic::window::{EntityKey, Window};

/// Alerts kept per worker for lifecycle queries
const MAX_HISTORY: usize = 1_000;

pub struct AlertManager {
    dedup_window: Duration,
    open_by_key: HashMap<EntityKey, Uuid>,
    alerts: HashMap<Uuid, Alert>,
    order: VecDeque<Uuid>,
    created: u64,
    updated: u64,
    reporter: String,
    vocab: Arc<Vocabulary>,
    sink: SinkHandle,
    metrics: Arc<Metrics>,
}

impl AlertManager {
    pub fn new(
        dedup_window_secs: u64,
        vocab: Arc<Vocabulary>,
        sink: SinkHandle,
        metrics: Arc<Metrics>,
        reporter: String,
    ) -> Self {
        Self {
            dedup_window: Duration::seconds(dedup_window_secs as i64),
            open_by_key: HashMap::new(),
            alerts: HashMap::new(),
            order: VecDeque::new(),
            created: 0,
            updated: 0,
            reporter,
            vocab,
            sink,
            metrics,
        }
    }

    /// Only `is_alert` verdicts create or update an alert
    pub async fn ingest(&mut self, verdict: &Verdict, window: &Window) -> Option<Alert> {
        if !verdict.is_alert {
            return None;
        }

        let (alert, change) = match self.mergeable(&verdict.entity_key, window) {
            Some(id) => (self.merge(id, verdict, window)?, AlertChange::Updated),
            None => (self.create(verdict, window), AlertChange::Created),
        };

        let record = AlertRecord::from_alert(&alert, &self.reporter, change);
        if let Err(e) = self.sink.hand_off(record).await {
            // Retry là việc của sink; tiếp tục xử lý
            log::warn!("Alert {} hand-off failed: {}", alert.alert_id, e);
        }
        Some(alert)
    }

    fn mergeable(&self, key: &EntityKey, window: &Window) -> Option<Uuid> {
        let id = *self.open_by_key.get(key)?;
        let alert = self.alerts.get(&id)?;
        let within = window.end_ts - alert.last_seen <= self.dedup_window;
        (alert.status == AlertStatus::Open && within).then_some(id)
    }

    fn merge(&mut self, id: Uuid, verdict: &Verdict, window: &Window) -> Option<Alert> {
        let tokens = self.resolve_tokens(window);
        let alert = self.alerts.get_mut(&id)?;

        alert.occurrence_count += 1;
        alert.last_seen = alert.last_seen.max(window.end_ts);
        alert.severity = alert.severity.max(verdict.severity);
        alert.score = alert.score.max(verdict.score);
        alert.window_ref = window.id;
        alert.model_version = verdict.model_version.clone();
        alert.window = AlertWindow {
            start_ts: window.start_ts,
            end_ts: window.end_ts,
            tokens,
        };

        self.updated += 1;
        Metrics::incr(&self.metrics.alerts_updated);
        log::debug!(
            "Alert {} updated: {} x{} ({})",
            alert.alert_id,
            alert.entity_key,
            alert.occurrence_count,
            alert.severity.as_str()
        );
        Some(alert.clone())
    }

    fn create(&mut self, verdict: &Verdict, window: &Window) -> Alert {
        let alert = Alert {
            alert_id: Uuid::new_v4(),
            entity_key: verdict.entity_key.clone(),
            window_ref: window.id,
            severity: verdict.severity.max(Severity::Low),
            first_seen: window.start_ts,
            last_seen: window.end_ts,
            occurrence_count: 1,
            status: AlertStatus::Open,
            window: AlertWindow {
                start_ts: window.start_ts,
                end_ts: window.end_ts,
                tokens: self.resolve_tokens(window),
            },
            model_version: verdict.model_version.clone(),
            score: verdict.score,
        };

        log::info!(
            "Alert {} created: {} severity={} score={:.3}",
            alert.alert_id,
            alert.entity_key,
            alert.severity.as_str(),
            alert.score
        );

        self.open_by_key.insert(alert.entity_key.clone(), alert.alert_id);
        self.alerts.insert(alert.alert_id, alert.clone());
        self.order.push_back(alert.alert_id);
        self.created += 1;
        Metrics::incr(&self.metrics.alerts_created);
        self.prune();
        alert
    }

    fn resolve_tokens(&self, window: &Window) -> Vec<String> {
        window
            .real_ids()
            .iter()
            .map(|id| self.vocab.resolve(*id).unwrap_or_else(|| format!("<id:{}>", id)))
            .collect()
    }

    /// Xóa alert không còn open, cũ nhất trước
    fn prune(&mut self) {
        while self.order.len() > MAX_HISTORY {
            let victim = self
                .order
                .iter()
                .position(|id| self.alerts.get(id).map(|a| a.status != AlertStatus::Open).unwrap_or(true))
                .unwrap_or(0);
            let Some(id) = self.order.remove(victim) else {
                break;
            };
            if let Some(alert) = self.alerts.remove(&id) {
                if self.open_by_key.get(&alert.entity_key) == Some(&id) {
                    self.open_by_key.remove(&alert.entity_key);
                }
            }
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Open -> acknowledged. An acknowledged alert no longer absorbs verdicts.
    pub fn acknowledge(&mut self, alert_id: Uuid) -> bool {
        self.transition(alert_id, AlertStatus::Acknowledged)
    }

    pub fn close(&mut self, alert_id: Uuid) -> bool {
        self.transition(alert_id, AlertStatus::Closed)
    }

    fn transition(&mut self, alert_id: Uuid, to: AlertStatus) -> bool {
        let Some(alert) = self.alerts.get_mut(&alert_id) else {
            return false;
        };
        if alert.status == AlertStatus::Closed || alert.status == to {
            return false;
        }
        alert.status = to;
        if self.open_by_key.get(&alert.entity_key) == Some(&alert_id) {
            self.open_by_key.remove(&alert.entity_key);
        }
        log::info!("Alert {} -> {}", alert_id, to.as_str());
        true
    }

    /// Evicted key: the next alert for it starts a new dedup run
    pub fn forget(&mut self, key: &EntityKey) {
        self.open_by_key.remove(key);
    }

    pub fn get(&self, alert_id: Uuid) -> Option<&Alert> {
        self.alerts.get(&alert_id)
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.order
            .iter()
            .filter_map(|id| self.alerts.get(id))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> AlertStats {
        let mut stats = AlertStats {
            total: self.alerts.len(),
            created: self.created,
            updated: self.updated,
            ..Default::default()
        };
        for alert in self.alerts.values() {
            *stats.by_severity.entry(alert.severity.as_str().to_string()).or_default() += 1;
            *stats.by_status.entry(alert.status.as_str().to_string()).or_default() += 1;
        }
        stats
    }
}

// ============================================================================
// TESTS
// ============================================================================
