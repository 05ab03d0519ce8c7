//! Hysteresis Store
//!
//! Keys in `alerting` state, written on shutdown and read at startup.
//! A broken file is not fatal: workers start with no alerting keys.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logic::window::EntityKey;

#[derive(Debug, Serialize, Deserialize)]
struct HysteresisFile {
    saved_at: DateTime<Utc>,
    alerting: Vec<EntityKey>,
}

pub fn save_hysteresis(path: &Path, mut keys: Vec<EntityKey>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    keys.sort();

    let file = HysteresisFile {
        saved_at: Utc::now(),
        alerting: keys,
    };
    let json = serde_json::to_vec_pretty(&file)?;

    // Ghi file tạm rồi rename: crash không để lại file dở dang
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn load_hysteresis(path: &Path) -> Vec<EntityKey> {
    if !path.exists() {
        return Vec::new();
    }

    let parsed = fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|data| serde_json::from_slice::<HysteresisFile>(&data).map_err(|e| e.to_string()));

    match parsed {
        Ok(file) => {
            log::info!(
                "Restored {} alerting keys (saved {})",
                file.alerting.len(),
                file.saved_at
            );
            file.alerting
        }
        Err(e) => {
            log::warn!("Ignoring unreadable hysteresis state {:?}: {}", path, e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("hysteresis.json");

        let keys = vec![EntityKey::user("h2", "bob"), EntityKey::process("h1", "sshd")];
        save_hysteresis(&path, keys).unwrap();

        let loaded = load_hysteresis(&path);
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains(&EntityKey::process("h1", "sshd")));
        assert!(loaded.contains(&EntityKey::user("h2", "bob")));
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hysteresis.json");
        fs::write(&path, "{ nope").unwrap();
        assert!(load_hysteresis(&path).is_empty());
        assert!(load_hysteresis(&dir.path().join("missing.json")).is_empty());
    }
}
