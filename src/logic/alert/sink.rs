//! Alert Sinks
//!
//! Alert managers hand records to one bounded channel (the sink boundary);
//! a single sink task drains it, one delivery at a time on the blocking pool,
//! so records reach the sink in hand-off order. Retrying is the sink's own
//! business (webhook does).

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Timelike, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::types::AlertRecord;
use crate::logic::config::{SinkConfig, SinkKind};
use crate::logic::error::SinkError;
use crate::logic::flow::{Admission, Boundary, FlowController};
use crate::logic::telemetry::Metrics;

// ============================================================================
// TRAIT
// ============================================================================

pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn deliver(&self, record: &AlertRecord) -> Result<(), SinkError>;

    /// Expected upper bound for one `deliver`, retries included
    fn delivery_budget(&self, timeout: Duration) -> Duration {
        timeout
    }

    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

// ============================================================================
// LOG / MEMORY
// ============================================================================

/// Writes alerts to the application log
pub struct LogSink;

impl AlertSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn deliver(&self, record: &AlertRecord) -> Result<(), SinkError> {
        let json = serde_json::to_string(record)?;
        log::warn!("ALERT {}", json);
        Ok(())
    }
}

/// Keeps every record in memory
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<AlertRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AlertRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn deliver(&self, record: &AlertRecord) -> Result<(), SinkError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

// ============================================================================
// JSONL FILE
// ============================================================================

/// Xoay file khi file hiện tại vượt quá ngưỡng này (50 MB)
const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

struct JsonlState {
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_size: u64,
}

/// Append-only `alerts_YYYY_MM_DD_HHMMSS.jsonl` with size rotation
pub struct JsonlSink {
    base_dir: PathBuf,
    max_file_size: u64,
    state: Mutex<JsonlState>,
}

impl JsonlSink {
    pub fn new(base_dir: PathBuf) -> Result<Self, SinkError> {
        Self::with_max_size(base_dir, MAX_FILE_SIZE)
    }

    pub fn with_max_size(base_dir: PathBuf, max_file_size: u64) -> Result<Self, SinkError> {
        std::fs::create_dir_all(&base_dir)?;
        let (current_file, file) = open_new_file(&base_dir)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            base_dir,
            max_file_size,
            state: Mutex::new(JsonlState {
                writer: BufWriter::new(file),
                current_file,
                current_size,
            }),
        })
    }

    pub fn current_file(&self) -> PathBuf {
        self.state.lock().current_file.clone()
    }
}

fn open_new_file(base_dir: &Path) -> std::io::Result<(PathBuf, File)> {
    let now = Utc::now();
    let stem = format!(
        "alerts_{}_{:02}_{:02}_{:02}{:02}{:02}",
        now.year(),
        now.month(),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    );

    // Nhiều lần xoay trong cùng 1 giây: thêm hậu tố số
    let mut path = base_dir.join(format!("{}.jsonl", stem));
    let mut n = 1;
    while path.exists() {
        path = base_dir.join(format!("{}_{}.jsonl", stem, n));
        n += 1;
    }

    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    log::info!("Opened alert log: {:?}", path);
    Ok((path, file))
}

impl AlertSink for JsonlSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn deliver(&self, record: &AlertRecord) -> Result<(), SinkError> {
        let line = serde_json::to_string(record)?;
        let bytes = line.len() as u64 + 1;

        let mut state = self.state.lock();
        if state.current_size > 0 && state.current_size + bytes > self.max_file_size {
            state.writer.flush()?;
            let (path, file) = open_new_file(&self.base_dir)?;
            log::info!("Rotated alert log from {:?} to {:?}", state.current_file, path);
            state.writer = BufWriter::new(file);
            state.current_file = path;
            state.current_size = 0;
        }

        state.writer.write_all(line.as_bytes())?;
        state.writer.write_all(b"\n")?;
        state.writer.flush()?;
        state.current_size += bytes;
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.state.lock().writer.flush()?;
        Ok(())
    }
}

// ============================================================================
// WEBHOOK
// ============================================================================

/// HTTP POST of the JSON record, bounded retries with backoff
pub struct WebhookSink {
    url: String,
    agent: ureq::Agent,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
}

impl WebhookSink {
    pub fn new(url: &str, timeout: Duration, retries: u32) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            url: url.to_string(),
            agent,
            timeout,
            retries,
            backoff: Duration::from_millis(100),
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff * (1 << (attempt - 1).min(4))
    }
}

impl AlertSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn deliver(&self, record: &AlertRecord) -> Result<(), SinkError> {
        let body = serde_json::to_string(record)?;
        let mut last_error = String::new();

        for attempt in 0..=self.retries {
            if attempt > 0 {
                std::thread::sleep(self.backoff_for(attempt));
            }
            match self
                .agent
                .post(&self.url)
                .set("Content-Type", "application/json")
                .send_string(&body)
            {
                Ok(resp) => {
                    log::debug!("Alert {} posted ({})", record.alert_id, resp.status());
                    return Ok(());
                }
                // 4xx will not get better by retrying
                Err(ureq::Error::Status(code, _)) if (400..500).contains(&code) => {
                    return Err(SinkError::Delivery(format!("webhook rejected alert: HTTP {}", code)));
                }
                Err(e) => {
                    log::debug!("Webhook attempt {} failed: {}", attempt + 1, e);
                    last_error = e.to_string();
                }
            }
        }
        Err(SinkError::Delivery(last_error))
    }

    /// Every attempt plus the sleeps between them
    fn delivery_budget(&self, _timeout: Duration) -> Duration {
        let sleeps: Duration = (1..=self.retries).map(|a| self.backoff_for(a)).sum();
        self.timeout * (self.retries + 1) + sleeps
    }
}

/// Sink named by configuration
pub fn build_sink(config: &SinkConfig, state_dir: &Path) -> Result<Arc<dyn AlertSink>, SinkError> {
    let sink: Arc<dyn AlertSink> = match config.kind {
        SinkKind::Log => Arc::new(LogSink),
        SinkKind::Jsonl => {
            let dir = config.path.clone().unwrap_or_else(|| state_dir.join("alerts"));
            Arc::new(JsonlSink::new(dir)?)
        }
        SinkKind::Webhook => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| SinkError::Delivery("webhook sink needs a url".into()))?;
            Arc::new(WebhookSink::new(
                url,
                Duration::from_millis(config.timeout_ms),
                config.retries,
            ))
        }
    };
    Ok(sink)
}

// ============================================================================
// HAND-OFF
// ============================================================================

/// Producer side of the sink boundary (one clone per alert manager)
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<AlertRecord>,
    flow: Arc<FlowController>,
    timeout: Duration,
}

impl SinkHandle {
    pub fn new(tx: mpsc::Sender<AlertRecord>, flow: Arc<FlowController>, timeout: Duration) -> Self {
        Self { tx, flow, timeout }
    }

    /// One bounded attempt. Never waits longer than the sink timeout.
    pub async fn hand_off(&self, record: AlertRecord) -> Result<(), SinkError> {
        let admission = self.flow.admit(Boundary::Sink);
        if admission == Admission::Shed {
            self.flow.record_drop(Boundary::Sink);
            return Err(SinkError::Delivery(format!(
                "sink queue full, alert {} shed",
                record.alert_id
            )));
        }
        if admission == Admission::Block {
            self.flow.record_blocked(Boundary::Sink);
        }

        self.flow.enter(Boundary::Sink);
        let sent = match self.tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(record)) => {
                match tokio::time::timeout(self.timeout, self.tx.send(record)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(SinkError::Delivery("sink closed".into())),
                    Err(_) => {
                        self.flow.record_drop(Boundary::Sink);
                        Err(SinkError::Timeout)
                    }
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkError::Delivery("sink closed".into())),
        };

        if sent.is_err() {
            self.flow.leave(Boundary::Sink);
        }
        sent
    }
}

/// Drain the sink boundary until every handle is dropped
pub fn spawn_sink_task(
    mut rx: mpsc::Receiver<AlertRecord>,
    sink: Arc<dyn AlertSink>,
    flow: Arc<FlowController>,
    metrics: Arc<Metrics>,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let budget = sink.delivery_budget(timeout);

        while let Some(record) = rx.recv().await {
            flow.leave(Boundary::Sink);

            let s = sink.clone();
            let alert_id = record.alert_id.clone();
            let mut task = tokio::task::spawn_blocking(move || s.deliver(&record));

            // A blocking call cannot be cancelled: over budget, keep waiting so the
            // next record never overtakes this one. The queue applies backpressure.
            let outcome = match tokio::time::timeout(budget, &mut task).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    log::warn!(
                        "Sink {} slow for alert {} (over {:?}), waiting",
                        sink.name(),
                        alert_id,
                        budget
                    );
                    task.await
                }
            };

            match outcome {
                Ok(Ok(())) => Metrics::incr(&metrics.sink_delivered),
                Ok(Err(e)) => {
                    Metrics::incr(&metrics.sink_failures);
                    log::warn!("Sink {} failed for alert {}: {}", sink.name(), alert_id, e);
                }
                Err(join) => {
                    Metrics::incr(&metrics.sink_failures);
                    log::error!("Sink {} task failed: {}", sink.name(), join);
                }
            }
        }

        let s = sink.clone();
        if let Ok(Err(e)) = tokio::task::spawn_blocking(move || s.flush()).await {
            log::warn!("Sink {} flush failed: {}", sink.name(), e);
        }
        log::debug!("Sink task stopped");
    })
}
