//! Alert Types
//!
//! `Alert` is the manager's working state; `AlertRecord` is what sinks receive.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logic::threshold::Severity;
use crate::logic::window::{DetectorFamily, EntityKey, WindowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Closed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Closed => "closed",
        }
    }
}

/// Window summary carried on the alert (latest contributing window)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertWindow {
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    /// Resolved tokens, padding stripped
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub entity_key: EntityKey,
    pub window_ref: WindowId,
    pub severity: Severity,
    /// Event time. `first_seen <= last_seen` always.
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: u64,
    pub status: AlertStatus,
    pub window: AlertWindow,
    pub model_version: String,
    /// Highest score seen
    pub score: f64,
}

impl Alert {
    pub fn detector(&self) -> DetectorFamily {
        self.entity_key.family()
    }
}

/// What happened to the alert in this hand-off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChange {
    Created,
    Updated,
}

/// Wire format handed to the sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub alert_id: String,
    pub entity_key: EntityKey,
    pub severity: Severity,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: u64,
    pub window: AlertWindow,
    pub model_version: String,
    pub status: AlertStatus,
    // Enrichment
    pub score: f64,
    pub detector: DetectorFamily,
    pub reporter: String,
    pub change: AlertChange,
}

impl AlertRecord {
    pub fn from_alert(alert: &Alert, reporter: &str, change: AlertChange) -> Self {
        Self {
            alert_id: alert.alert_id.to_string(),
            entity_key: alert.entity_key.clone(),
            severity: alert.severity,
            first_seen: alert.first_seen,
            last_seen: alert.last_seen,
            occurrence_count: alert.occurrence_count,
            window: alert.window.clone(),
            model_version: alert.model_version.clone(),
            status: alert.status,
            score: alert.score,
            detector: alert.detector(),
            reporter: reporter.to_string(),
            change,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertStats {
    pub total: usize,
    pub created: u64,
    pub updated: u64,
    pub by_severity: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
}

impl AlertStats {
    pub fn merge(&mut self, other: &AlertStats) {
        self.total += other.total;
        self.created += other.created;
        self.updated += other.updated;
        for (k, v) in &other.by_severity {
            *self.by_severity.entry(k.clone()).or_default() += v;
        }
        for (k, v) in &other.by_status {
            *self.by_status.entry(k.clone()).or_default() += v;
        }
    }
}
