//! Parser Module - RawLine -> NormalizedRecord
//!
//! Field extractors are tried in priority order; first match wins.
//! - `types`: RawLine, NormalizedRecord, Dialect
//! - `syslog`: Unix auth/syslog dialect
//! - `windows`: Windows-event key=value dialect

pub mod types;
pub mod syslog;
pub mod windows;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::logic::error::ParseError;

pub use types::{Dialect, NormalizedRecord, RawLine};
pub use syslog::SyslogExtractor;
pub use windows::WindowsEventExtractor;

// ============================================================================
// EXTRACTOR TRAIT
// ============================================================================

/// One log dialect. Must be deterministic: same line -> same record.
pub trait FieldExtractor: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Lower runs first
    fn priority(&self) -> u8;

    fn extract(&self, line: &RawLine) -> Option<NormalizedRecord>;
}

// ============================================================================
// PARSER
// ============================================================================

pub struct Parser {
    extractors: Vec<Arc<dyn FieldExtractor>>,
    matches: HashMap<Dialect, AtomicU64>,
}

impl Default for Parser {
    fn default() -> Self {
        let mut parser = Self::empty();
        parser.register(Arc::new(SyslogExtractor));
        parser.register(Arc::new(WindowsEventExtractor));
        parser
    }
}

impl Parser {
    /// Parser with no dialects registered
    pub fn empty() -> Self {
        Self {
            extractors: Vec::new(),
            matches: HashMap::new(),
        }
    }

    /// Add an extractor, keeping the list sorted by priority (stable for ties)
    pub fn register(&mut self, extractor: Arc<dyn FieldExtractor>) {
        self.matches
            .entry(extractor.dialect())
            .or_insert_with(|| AtomicU64::new(0));
        self.extractors.push(extractor);
        self.extractors.sort_by_key(|e| e.priority());
    }

    pub fn parse(&self, line: &RawLine) -> Result<NormalizedRecord, ParseError> {
        for extractor in &self.extractors {
            if let Some(record) = extractor.extract(line) {
                if let Some(counter) = self.matches.get(&record.dialect) {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                return Ok(record);
            }
        }

        Err(ParseError::unrecognized(line.source_offset))
    }

    pub fn dialect_counts(&self) -> HashMap<Dialect, u64> {
        self.matches
            .iter()
            .map(|(d, c)| (*d, c.load(Ordering::Relaxed)))
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn raw(offset: u64, text: &str) -> RawLine {
        RawLine::new(offset, "", text, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_both_dialects_recognized() {
        let parser = Parser::default();

        let a = parser
            .parse(&raw(1, "Mar  1 11:59:00 h1 sshd[10]: Accepted password for bob from 10.1.1.1 port 5 ssh2"))
            .unwrap();
        assert_eq!(a.dialect, Dialect::Syslog);
        assert_eq!(a.host, "h1");

        let b = parser.parse(&raw(2, "EventID=4624 Computer=WS01 TargetUserName=bob")).unwrap();
        assert_eq!(b.dialect, Dialect::WindowsEvent);

        let counts = parser.dialect_counts();
        assert_eq!(counts[&Dialect::Syslog], 1);
        assert_eq!(counts[&Dialect::WindowsEvent], 1);
    }

    #[test]
    fn test_unrecognized_line() {
        let parser = Parser::default();
        let err = parser.parse(&raw(42, "garbage ### ~~~")).unwrap_err();
        assert_eq!(err.reason, "unrecognized_format");
        assert_eq!(err.raw_ref, 42);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let parser = Parser::default();
        let line = raw(9, "Mar  1 11:59:00 h1 sshd[10]: Failed password for root from 10.0.0.1 port 22 ssh2");
        let first = parser.parse(&line).unwrap();
        for _ in 0..10 {
            assert_eq!(parser.parse(&line).unwrap(), first);
        }
    }

    struct Catchall;

    impl FieldExtractor for Catchall {
        fn dialect(&self) -> Dialect {
            Dialect::Syslog
        }
        fn priority(&self) -> u8 {
            0
        }
        fn extract(&self, line: &RawLine) -> Option<NormalizedRecord> {
            Some(NormalizedRecord {
                timestamp: line.ingest_time,
                host: "any".into(),
                process: None,
                user: None,
                event_type: "catchall".into(),
                tokens: vec!["catchall".into()],
                raw_ref: line.source_offset,
                dialect: Dialect::Syslog,
            })
        }
    }

    #[test]
    fn test_priority_order() {
        let mut parser = Parser::default();
        parser.register(Arc::new(Catchall));
        let rec = parser.parse(&raw(1, "EventID=4624 Computer=WS01")).unwrap();
        assert_eq!(rec.event_type, "catchall");
    }
}
