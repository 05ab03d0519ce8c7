//! Vocabulary Snapshot File
//!
//! Append-only JSON lines:
//! - `{"header":{"vocab_size":N,"model_version_compat":"..."}}` appended at each checkpoint
//! - `{"token":"failed password","id":2}` appended for ids not yet persisted
//!
//! Last header wins. Ids must be contiguous from `FIRST_TOKEN_ID`.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FIRST_TOKEN_ID;
use crate::logic::error::VocabError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Total ids including reserved ones
    pub vocab_size: usize,
    pub model_version_compat: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum SnapshotLine {
    Header { header: SnapshotHeader },
    Entry { token: String, id: u32 },
}

/// Content of a snapshot file after replay
#[derive(Debug, Default)]
pub struct LoadedSnapshot {
    pub header: Option<SnapshotHeader>,
    /// `tokens[i]` has id `FIRST_TOKEN_ID + i`
    pub tokens: Vec<String>,
}

/// Replay a snapshot. Missing file = Ok(None). Anything unparsable is corrupt.
pub fn read_snapshot(path: &Path) -> Result<Option<LoadedSnapshot>, VocabError> {
    if !path.exists() {
        return Ok(None);
    }

    let reader = BufReader::new(fs::File::open(path)?);
    let mut loaded = LoadedSnapshot::default();
    let mut seen = HashSet::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }

        let parsed: SnapshotLine = serde_json::from_str(&line).map_err(|e| VocabError::Corrupt {
            line: line_no,
            reason: e.to_string(),
        })?;

        match parsed {
            SnapshotLine::Header { header } => loaded.header = Some(header),
            SnapshotLine::Entry { token, id } => {
                let expected = FIRST_TOKEN_ID + loaded.tokens.len() as u32;
                if id != expected {
                    return Err(VocabError::Corrupt {
                        line: line_no,
                        reason: format!("expected id {}, found {}", expected, id),
                    });
                }
                if !seen.insert(token.clone()) {
                    return Err(VocabError::Corrupt {
                        line: line_no,
                        reason: format!("token {:?} assigned twice", token),
                    });
                }
                loaded.tokens.push(token);
            }
        }
    }

    if let Some(header) = &loaded.header {
        let total = FIRST_TOKEN_ID as usize + loaded.tokens.len();
        if header.vocab_size > total {
            return Err(VocabError::Corrupt {
                line: 0,
                reason: format!(
                    "header declares {} ids but only {} are present",
                    header.vocab_size, total
                ),
            });
        }
    }

    Ok(Some(loaded))
}

/// Append new entries then a header describing the resulting size
pub fn append_snapshot(
    path: &Path,
    entries: &[(String, u32)],
    header: &SnapshotHeader,
) -> Result<(), VocabError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut buf = Vec::new();
    for (token, id) in entries {
        let line = SnapshotLine::Entry {
            token: token.clone(),
            id: *id,
        };
        serde_json::to_writer(&mut buf, &line).map_err(std::io::Error::from)?;
        buf.push(b'\n');
    }
    let line = SnapshotLine::Header {
        header: header.clone(),
    };
    serde_json::to_writer(&mut buf, &line).map_err(std::io::Error::from)?;
    buf.push(b'\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&buf)?;
    file.sync_data()?;
    Ok(())
}

// ============================================================================
// OOV LOG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OovEntry {
    pub token: String,
    pub first_seen: DateTime<Utc>,
}

/// Unseen tokens, appended for offline vocabulary growth
pub fn append_oov(path: &Path, entries: &[OovEntry]) -> Result<(), VocabError> {
    if entries.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut buf = Vec::new();
    for entry in entries {
        serde_json::to_writer(&mut buf, entry).map_err(std::io::Error::from)?;
        buf.push(b'\n');
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&buf)?;
    Ok(())
}
