//! Unix auth/syslog Dialect
//!
//! `Jan 12 14:30:15 web01 sshd[1234]: Failed password for root from 10.0.0.5 port 22 ssh2`
//! `2024-01-12T14:30:15Z web01 sudo: alice : TTY=pts/0 ; PWD=/home/alice ; USER=root ; COMMAND=/bin/bash`

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::types::{Dialect, NormalizedRecord, RawLine};
use super::FieldExtractor;

// ============================================================================
// PATTERNS
// ============================================================================

static BSD_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<ts>[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})\s+(?P<host>\S+)\s+(?P<proc>[\w./()-]+?)(?:\[(?P<pid>\d+)\])?:\s*(?P<msg>.*)$",
    )
    .expect("valid regex")
});

static ISO_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<ts>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2}))\s+(?P<host>\S+)\s+(?P<proc>[\w./()-]+?)(?:\[(?P<pid>\d+)\])?:\s*(?P<msg>.*)$",
    )
    .expect("valid regex")
});

static IP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").expect("valid regex"));
static HEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b0x[0-9a-fA-F]+\b").expect("valid regex"));
static NUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+\b").expect("valid regex"));

/// Message template -> event type
struct MessageRule {
    pattern: Regex,
    event_type: &'static str,
}

static MESSAGE_RULES: Lazy<Vec<MessageRule>> = Lazy::new(|| {
    let rule = |pattern: &str, event_type: &'static str| MessageRule {
        pattern: Regex::new(pattern).expect("valid regex"),
        event_type,
    };
    vec![
        rule(r"^Failed password for (?:invalid user )?(?P<user>\S+) from (?P<ip>\S+)", "failed password"),
        rule(r"^Failed publickey for (?:invalid user )?(?P<user>\S+) from (?P<ip>\S+)", "failed publickey"),
        rule(r"^Accepted password for (?P<user>\S+) from (?P<ip>\S+)", "accepted password"),
        rule(r"^Accepted publickey for (?P<user>\S+) from (?P<ip>\S+)", "accepted publickey"),
        rule(r"^Invalid user (?P<user>\S+) from (?P<ip>\S+)", "invalid user"),
        rule(r"authentication failure;.*?(?:\buser=(?P<user>\S+))?\s*$", "authentication failure"),
        rule(r"session opened for user (?P<user>[^\s(]+)", "session opened"),
        rule(r"session closed for user (?P<user>[^\s(]+)", "session closed"),
        rule(r"^\s*(?P<user>\S+) : .*?USER=(?P<target>\S+) ; COMMAND=(?P<cmd>.*)$", "sudo command"),
        rule(r"^\s*(?P<user>\S+) : .*incorrect password attempts", "sudo failure"),
        rule(r"^new user: name=(?P<user>[^,\s]+)", "user created"),
        rule(r"^(?:password changed|changed password) for (?P<user>\S+)", "password changed"),
        rule(
            r"(?i)\b(?:modif|chang|writ|renam|delet)\w*\b.*?(?P<path>/etc/(?:passwd|shadow|sudoers|group|crontab)\S*)",
            "sensitive file modified",
        ),
        rule(r"^(?:Disconnected from|Connection closed by|Received disconnect from) ", "connection closed"),
        rule(r"(?i)segfault|core dumped", "process crash"),
    ]
});

// ============================================================================
// EXTRACTOR
// ============================================================================

pub struct SyslogExtractor;

impl FieldExtractor for SyslogExtractor {
    fn dialect(&self) -> Dialect {
        Dialect::Syslog
    }

    fn priority(&self) -> u8 {
        10
    }

    fn extract(&self, line: &RawLine) -> Option<NormalizedRecord> {
        let text = line.raw_text.trim();

        let (caps, timestamp) = if let Some(caps) = ISO_LINE.captures(text) {
            let ts = DateTime::parse_from_rfc3339(&caps["ts"]).ok()?.with_timezone(&Utc);
            (caps, ts)
        } else if let Some(caps) = BSD_LINE.captures(text) {
            let ts = parse_bsd_timestamp(&caps["ts"], line.ingest_time)?;
            (caps, ts)
        } else {
            return None;
        };

        let process = caps["proc"].to_lowercase();
        let host = if line.host.is_empty() {
            caps["host"].to_string()
        } else {
            line.host.clone()
        };
        let message = caps.name("msg").map(|m| m.as_str()).unwrap_or("");

        let classified = classify_message(message);
        let mut tokens = vec![classified.event_type.clone(), format!("proc:{}", process)];
        if let Some(user) = &classified.user {
            tokens.push(format!("user:{}", user));
        }
        tokens.extend(classified.args);

        Some(NormalizedRecord {
            timestamp,
            host,
            process: Some(process),
            user: classified.user,
            event_type: classified.event_type,
            tokens,
            raw_ref: line.source_offset,
            dialect: Dialect::Syslog,
        })
    }
}

/// BSD syslog has no year. Borrow it from ingest time, stepping back across New Year.
fn parse_bsd_timestamp(ts: &str, ingest_time: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let compact = ts.split_whitespace().collect::<Vec<_>>().join(" ");
    let year = ingest_time.year();

    let parse = |y: i32| {
        NaiveDateTime::parse_from_str(&format!("{} {}", y, compact), "%Y %b %d %H:%M:%S")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    };

    let candidate = parse(year)?;
    if candidate > ingest_time + Duration::days(1) {
        return parse(year - 1);
    }
    Some(candidate)
}

struct ClassifiedMessage {
    event_type: String,
    user: Option<String>,
    args: Vec<String>,
}

fn classify_message(message: &str) -> ClassifiedMessage {
    for rule in MESSAGE_RULES.iter() {
        if let Some(caps) = rule.pattern.captures(message) {
            let user = caps.name("user").map(|m| m.as_str().to_string());
            let mut args = Vec::new();
            if let Some(ip) = caps.name("ip") {
                args.push(format!("src:{}", ip.as_str()));
            }
            if let Some(target) = caps.name("target") {
                args.push(format!("target:{}", target.as_str()));
            }
            if let Some(cmd) = caps.name("cmd") {
                args.push(format!("cmd:{}", cmd.as_str().trim()));
            }
            if let Some(path) = caps.name("path") {
                args.push(format!("path:{}", path.as_str()));
            }
            return ClassifiedMessage {
                event_type: rule.event_type.to_string(),
                user,
                args,
            };
        }
    }

    ClassifiedMessage {
        event_type: template_of(message),
        user: None,
        args: Vec::new(),
    }
}

/// Template chung: che các phần biến đổi, lấy 5 từ đầu
fn template_of(message: &str) -> String {
    let masked = IP.replace_all(message, "<ip>");
    let masked = HEX.replace_all(&masked, "<hex>");
    let masked = NUM.replace_all(&masked, "<num>");
    let words: Vec<&str> = masked.split_whitespace().take(5).collect();
    if words.is_empty() {
        return "empty message".to_string();
    }
    words.join(" ").to_lowercase()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> RawLine {
        let ingest = Utc.with_ymd_and_hms(2024, 1, 12, 15, 0, 0).unwrap();
        RawLine::new(7, "web01", text, ingest)
    }

    #[test]
    fn test_failed_password() {
        let rec = SyslogExtractor
            .extract(&line("Jan 12 14:30:15 web01 sshd[1234]: Failed password for root from 10.0.0.5 port 22 ssh2"))
            .unwrap();

        assert_eq!(rec.event_type, "failed password");
        assert_eq!(rec.process.as_deref(), Some("sshd"));
        assert_eq!(rec.user.as_deref(), Some("root"));
        assert_eq!(rec.tokens[0], "failed password");
        assert!(rec.tokens.contains(&"src:10.0.0.5".to_string()));
        assert_eq!(rec.timestamp, Utc.with_ymd_and_hms(2024, 1, 12, 14, 30, 15).unwrap());
        assert_eq!(rec.raw_ref, 7);
    }

    #[test]
    fn test_invalid_user_variant_of_failed_password() {
        let rec = SyslogExtractor
            .extract(&line("Jan 12 14:30:15 web01 sshd[99]: Failed password for invalid user admin from 1.2.3.4 port 2 ssh2"))
            .unwrap();
        assert_eq!(rec.user.as_deref(), Some("admin"));
    }

    #[test]
    fn test_sudo_command() {
        let rec = SyslogExtractor
            .extract(&line("2024-01-12T14:30:15Z web01 sudo: alice : TTY=pts/0 ; PWD=/home/alice ; USER=root ; COMMAND=/bin/bash"))
            .unwrap();

        assert_eq!(rec.event_type, "sudo command");
        assert_eq!(rec.user.as_deref(), Some("alice"));
        assert!(rec.tokens.contains(&"target:root".to_string()));
        assert!(rec.tokens.contains(&"cmd:/bin/bash".to_string()));
    }

    #[test]
    fn test_year_rollover() {
        let ingest = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        let raw = RawLine::new(1, "h", "Dec 31 23:59:58 h cron[1]: job started", ingest);
        let rec = SyslogExtractor.extract(&raw).unwrap();
        assert_eq!(rec.timestamp.year(), 2023);
    }

    #[test]
    fn test_generic_template_masks_numbers() {
        let rec = SyslogExtractor
            .extract(&line("Jan 12 14:30:15 web01 kernel: eth0 link up at 1000 Mbps"))
            .unwrap();
        assert_eq!(rec.event_type, "eth0 link up at <num>");
    }

    #[test]
    fn test_sensitive_file_modification() {
        let rec = SyslogExtractor
            .extract(&line("Jan 12 14:30:15 web01 auditd[5]: file modified /etc/shadow by uid 0"))
            .unwrap();
        assert_eq!(rec.event_type, "sensitive file modified");
        assert!(rec.tokens.contains(&"path:/etc/shadow".to_string()));
    }

    #[test]
    fn test_rejects_non_syslog() {
        assert!(SyslogExtractor.extract(&line("this is not a log line")).is_none());
        assert!(SyslogExtractor.extract(&line("")).is_none());
    }
}
