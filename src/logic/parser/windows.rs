//! Windows-event Key/Value Dialect
//!
//! `EventID=4625 TimeCreated=2024-01-12T14:30:15Z Computer=WS01 TargetUserName=bob ProcessName=C:\Windows\System32\lsass.exe`
//! Values may be quoted. `Key: Value` separators are accepted too. An unquoted
//! value runs to the next key, so paths with spaces survive
//! (`ParentProcessName: C:\Program Files\Office\winword.exe`).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::types::{Dialect, NormalizedRecord, RawLine};
use super::FieldExtractor;

/// Key at line start or after a separator. A `:` followed by a path
/// (`C:\`, `http://`) belongs to a value.
static KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[\s,;])(?P<k>[A-Za-z][\w.]*)\s*(?:(?P<eq>=)|(?P<colon>:)(?:[^\\/]|$))")
        .expect("valid regex")
});

const PROCESS_KEYS: &[&str] = &["newprocessname", "processname", "image", "process"];
const PARENT_KEYS: &[&str] = &["parentprocessname", "parentimage", "creatorprocessname"];
const USER_KEYS: &[&str] = &["targetusername", "subjectusername", "accountname", "account", "user", "username"];
const HOST_KEYS: &[&str] = &["computer", "hostname", "workstationname"];
const TIME_KEYS: &[&str] = &["timecreated", "timegenerated", "time"];
const SOURCE_KEYS: &[&str] = &["source", "provider", "providername"];

// ============================================================================
// EVENT ID TABLE
// ============================================================================

fn event_type_for(event_id: u32) -> String {
    let name = match event_id {
        4624 => "logon success",
        4625 => "logon failure",
        4634 => "logoff",
        4648 => "explicit credential logon",
        4656 => "object handle requested",
        4657 => "registry value modified",
        4663 => "object access",
        4670 => "permissions changed",
        4672 => "special privileges assigned",
        4688 => "process created",
        4689 => "process exited",
        4720 => "user account created",
        4722 => "user account enabled",
        4724 => "password reset attempt",
        4728 | 4732 | 4756 => "member added to group",
        4740 => "account locked out",
        4768 => "kerberos ticket requested",
        4771 => "kerberos preauth failed",
        4776 => "credential validation",
        1102 => "audit log cleared",
        7045 => "service installed",
        other => return format!("event {}", other),
    };
    name.to_string()
}

// ============================================================================
// EXTRACTOR
// ============================================================================

pub struct WindowsEventExtractor;

impl FieldExtractor for WindowsEventExtractor {
    fn dialect(&self) -> Dialect {
        Dialect::WindowsEvent
    }

    fn priority(&self) -> u8 {
        20
    }

    fn extract(&self, line: &RawLine) -> Option<NormalizedRecord> {
        let fields = parse_pairs(&line.raw_text);

        let event_id: u32 = fields
            .get("eventid")
            .or_else(|| fields.get("eventcode"))?
            .parse()
            .ok()?;

        let timestamp = first_of(&fields, TIME_KEYS)
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(line.ingest_time);

        let host = if !line.host.is_empty() {
            line.host.clone()
        } else {
            first_of(&fields, HOST_KEYS)?.to_string()
        };

        let process = first_of(&fields, PROCESS_KEYS)
            .map(basename)
            .or_else(|| first_of(&fields, SOURCE_KEYS).map(|s| s.to_lowercase()))
            .unwrap_or_else(|| "system".to_string());

        let user = first_of(&fields, USER_KEYS)
            .filter(|u| !u.is_empty() && *u != "-")
            .map(|u| u.to_string());

        let event_type = event_type_for(event_id);
        let mut tokens = vec![
            event_type.clone(),
            format!("eid:{}", event_id),
            format!("proc:{}", process),
        ];
        if let Some(u) = &user {
            tokens.push(format!("user:{}", u));
        }
        if let Some(parent) = first_of(&fields, PARENT_KEYS) {
            tokens.push(format!("parent:{}", basename(parent)));
        }
        if let Some(obj) = fields.get("objectname") {
            tokens.push(format!("obj:{}", obj));
        }

        Some(NormalizedRecord {
            timestamp,
            host,
            process: Some(process),
            user,
            event_type,
            tokens,
            raw_ref: line.source_offset,
            dialect: Dialect::WindowsEvent,
        })
    }
}

/// Keys are lowercased; first occurrence wins
fn parse_pairs(text: &str) -> HashMap<String, String> {
    // (key, key start, value start)
    let keys: Vec<(String, usize, usize)> = KEY
        .captures_iter(text)
        .filter_map(|caps| {
            let k = caps.name("k")?;
            let sep = caps.name("eq").or_else(|| caps.name("colon"))?;
            Some((k.as_str().to_lowercase(), k.start(), sep.end()))
        })
        .collect();

    let mut fields = HashMap::new();
    for (i, (key, _, value_start)) in keys.iter().enumerate() {
        let value_end = keys.get(i + 1).map(|next| next.1).unwrap_or(text.len());
        let value = clean_value(&text[*value_start..value_end]);
        fields.entry(key.clone()).or_insert(value);
    }
    fields
}

/// Quoted: up to the closing quote. Unquoted: trailing separators dropped.
fn clean_value(raw: &str) -> String {
    let v = raw.trim_start();
    if let Some(quote) = v.chars().next().filter(|c| *c == '"' || *c == '\'') {
        if let Some(end) = v[1..].find(quote) {
            return v[1..1 + end].to_string();
        }
    }
    v.trim_end_matches(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string()
}

fn first_of<'a>(fields: &'a HashMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| fields.get(*k).map(|v| v.as_str()))
}

/// `C:\Windows\System32\cmd.exe` -> `cmd.exe`
fn basename(path: &str) -> String {
    path.rsplit(|c| c == '\\' || c == '/')
        .next()
        .unwrap_or(path)
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn line(text: &str) -> RawLine {
        RawLine::new(3, "", text, Utc.with_ymd_and_hms(2024, 1, 12, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_logon_failure() {
        let rec = WindowsEventExtractor
            .extract(&line(r#"EventID=4625 TimeCreated=2024-01-12T14:30:15Z Computer=WS01 TargetUserName=bob ProcessName="C:\Windows\System32\lsass.exe""#))
            .unwrap();

        assert_eq!(rec.event_type, "logon failure");
        assert_eq!(rec.host, "WS01");
        assert_eq!(rec.user.as_deref(), Some("bob"));
        assert_eq!(rec.process.as_deref(), Some("lsass.exe"));
        assert_eq!(rec.timestamp, Utc.with_ymd_and_hms(2024, 1, 12, 14, 30, 15).unwrap());
    }

    #[test]
    fn test_process_lineage_tokens() {
        let rec = WindowsEventExtractor
            .extract(&line(r"EventID: 4688, Computer: WS02, SubjectUserName: alice, NewProcessName: C:\Windows\System32\cmd.exe, ParentProcessName: C:\Program Files\Office\winword.exe"))
            .unwrap();

        assert_eq!(rec.event_type, "process created");
        assert_eq!(rec.process.as_deref(), Some("cmd.exe"));
        assert!(rec.tokens.contains(&"parent:winword.exe".to_string()));
    }

    #[test]
    fn test_unquoted_values_keep_spaces() {
        let fields = parse_pairs(
            r"EventID=4688; Image=C:\Program Files\App\app.exe; TimeCreated: 2024-01-12T14:30:15Z, Msg='a=b c'",
        );
        assert_eq!(fields["eventid"], "4688");
        assert_eq!(fields["image"], r"C:\Program Files\App\app.exe");
        assert_eq!(fields["timecreated"], "2024-01-12T14:30:15Z");
        assert_eq!(fields["msg"], "a=b c");
        assert!(!fields.contains_key("c"));

        let fields = parse_pairs(r"EventID=4688 NewProcessName=\Device\HarddiskVolume2\x.exe Url: http://h/a");
        assert_eq!(fields["newprocessname"], r"\Device\HarddiskVolume2\x.exe");
        assert_eq!(fields["url"], "http://h/a");
        assert!(!fields.contains_key("http"));
    }

    #[test]
    fn test_unknown_event_id() {
        let rec = WindowsEventExtractor
            .extract(&line("EventID=9999 Computer=WS03 Source=CustomApp"))
            .unwrap();
        assert_eq!(rec.event_type, "event 9999");
        assert_eq!(rec.process.as_deref(), Some("customapp"));
        assert_eq!(rec.timestamp, line("").ingest_time);
    }

    #[test]
    fn test_requires_event_id() {
        assert!(WindowsEventExtractor.extract(&line("Computer=WS01 User=bob")).is_none());
        assert!(WindowsEventExtractor.extract(&line("EventID=abc Computer=WS01")).is_none());
    }
}
