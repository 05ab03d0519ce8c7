//! Log Sources
//!
//! Stream record: `{"host": "h1", "raw": "<log line>", "timestamp": "<RFC3339>"}`.
//! The pump runs on its own thread and feeds the bounded source boundary.

use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use crate::logic::error::SourceError;
use crate::logic::flow::{Boundary, FlowController, OverflowPolicy};
use crate::logic::parser::RawLine;
use crate::logic::telemetry::Metrics;

/// Consecutive IO failures tolerated before the pump gives up
const MAX_READ_RETRIES: u32 = 5;
const READ_BACKOFF_MS: u64 = 200;

pub trait LogSource: Send {
    /// `Ok(None)` = end of stream
    fn next_line(&mut self) -> Result<Option<RawLine>, SourceError>;
}

// ============================================================================
// JSON LINES
// ============================================================================

#[derive(Debug, Deserialize)]
struct SourceRecord {
    host: String,
    raw: String,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Source records, one per line, from any reader (file, stdin)
pub struct JsonLinesSource<R: BufRead + Send> {
    reader: R,
    offset: u64,
    buf: String,
}

impl<R: BufRead + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            offset: 0,
            buf: String::new(),
        }
    }
}

impl<R: BufRead + Send> LogSource for JsonLinesSource<R> {
    fn next_line(&mut self) -> Result<Option<RawLine>, SourceError> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            let offset = self.offset;
            self.offset += 1;

            let text = self.buf.trim();
            if text.is_empty() {
                continue;
            }

            let record: SourceRecord = serde_json::from_str(text).map_err(|e| SourceError::Malformed {
                offset,
                reason: e.to_string(),
            })?;

            // Thiếu timestamp hoặc sai format: dùng thời điểm ingest
            let ingest_time = record
                .timestamp
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);

            return Ok(Some(RawLine {
                source_offset: offset,
                host: record.host,
                raw_text: record.raw,
                ingest_time,
            }));
        }
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

#[derive(Debug, Default)]
pub struct MemorySource {
    lines: VecDeque<RawLine>,
}

impl MemorySource {
    pub fn new(lines: Vec<RawLine>) -> Self {
        Self { lines: lines.into() }
    }
}

impl LogSource for MemorySource {
    fn next_line(&mut self) -> Result<Option<RawLine>, SourceError> {
        Ok(self.lines.pop_front())
    }
}

// ============================================================================
// PUMP
// ============================================================================

/// Read until end of stream or shutdown. Full boundary: block (backpressure) or shed the line.
pub fn spawn_source_pump(
    mut source: Box<dyn LogSource>,
    tx: mpsc::Sender<RawLine>,
    flow: Arc<FlowController>,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("logsight-source".into())
        .spawn(move || {
            let mut failures = 0;

            while !*shutdown.borrow() {
                let line = match source.next_line() {
                    Ok(Some(line)) => {
                        failures = 0;
                        line
                    }
                    Ok(None) => {
                        log::info!("Source: end of stream");
                        break;
                    }
                    Err(SourceError::Malformed { offset, reason }) => {
                        Metrics::incr(&metrics.source_errors);
                        log::debug!("Source: skipping malformed record {}: {}", offset, reason);
                        continue;
                    }
                    Err(e) => {
                        Metrics::incr(&metrics.source_errors);
                        failures += 1;
                        if failures > MAX_READ_RETRIES {
                            log::error!("Source: giving up after {} failures: {}", failures, e);
                            break;
                        }
                        log::warn!("Source read failed ({}), retry {}/{}", e, failures, MAX_READ_RETRIES);
                        std::thread::sleep(Duration::from_millis(READ_BACKOFF_MS * failures as u64));
                        continue;
                    }
                };

                Metrics::incr(&metrics.lines_read);
                flow.enter(Boundary::Source);

                match tx.try_send(line) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(line)) => match flow.policy(Boundary::Source) {
                        OverflowPolicy::Block => {
                            flow.record_blocked(Boundary::Source);
                            if tx.blocking_send(line).is_err() {
                                flow.leave(Boundary::Source);
                                break;
                            }
                        }
                        OverflowPolicy::Shed => {
                            flow.leave(Boundary::Source);
                            flow.record_drop(Boundary::Source);
                        }
                    },
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        flow.leave(Boundary::Source);
                        break;
                    }
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_json_lines_source() {
        let input = concat!(
            r#"{"host":"h1","raw":"line one","timestamp":"2024-03-01T10:00:00Z"}"#,
            "\n\n",
            r#"{"host":"h2","raw":"line two"}"#,
            "\n",
            "not json\n",
        );
        let mut source = JsonLinesSource::new(Cursor::new(input));

        let first = source.next_line().unwrap().unwrap();
        assert_eq!(first.host, "h1");
        assert_eq!(first.raw_text, "line one");
        assert_eq!(first.ingest_time.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        assert_eq!(first.source_offset, 0);

        let second = source.next_line().unwrap().unwrap();
        assert_eq!(second.host, "h2");
        assert_eq!(second.source_offset, 2);

        assert!(matches!(source.next_line(), Err(SourceError::Malformed { offset: 3, .. })));
        assert!(source.next_line().unwrap().is_none());
    }
}
