//! Config Loader
//!
//! JSON file + env overrides + validation. Invalid config never starts the pipeline.
//! Thứ tự ưu tiên: env > file > default.

use std::fs;
use std::path::Path;

use super::types::PipelineConfig;
use crate::constants;
use crate::logic::error::ConfigError;
use crate::logic::flow::Boundary;

/// Load config from an optional file, then apply env overrides and validate
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let data = fs::read(p)?;
            let config: PipelineConfig = serde_json::from_slice(&data)?;
            log::info!("Loaded pipeline config from {:?}", p);
            config
        }
        None => {
            log::info!("No config file given, using defaults");
            PipelineConfig::default()
        }
    };

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut PipelineConfig) {
    if let Some(workers) = constants::get_workers() {
        config.workers = workers;
    }
    if let Some(length) = constants::get_window_length() {
        config.window.length = length;
    }
    if let Some(timeout) = constants::get_scorer_timeout_ms() {
        config.scorer.timeout_ms = timeout;
    }
    if config.state_dir.is_none() && std::env::var("LOGSIGHT_STATE_DIR").is_ok() {
        config.state_dir = Some(constants::get_state_dir());
    }
}

/// Reject anything the pipeline cannot honor
pub fn validate(config: &PipelineConfig) -> Result<(), ConfigError> {
    let invalid = |msg: String| Err(ConfigError::Invalid(msg));

    if config.workers == 0 {
        return invalid("workers must be at least 1".into());
    }

    let w = &config.window;
    if w.length == 0 {
        return invalid("window.length must be at least 1".into());
    }
    if w.overlap >= w.length {
        return invalid(format!(
            "window.overlap ({}) must be smaller than window.length ({})",
            w.overlap, w.length
        ));
    }
    if w.idle_timeout_ms == 0 {
        return invalid("window.idle_timeout_ms must be positive".into());
    }
    if w.eviction_ttl_secs * 1000 < w.idle_timeout_ms {
        return invalid("window.eviction_ttl_secs must not be shorter than the idle timeout".into());
    }

    if config.detectors.is_empty() {
        return invalid("at least one detector must be configured".into());
    }
    for (i, d) in config.detectors.iter().enumerate() {
        if config.detectors[..i].iter().any(|o| o.family == d.family) {
            return invalid(format!("detector {:?} configured twice", d.family));
        }
        if let Some(cutoff) = d.cutoff {
            if !(cutoff > 0.0) {
                return invalid(format!("detector {:?} cutoff must be positive", d.family));
            }
            if d.margin >= cutoff {
                return invalid(format!("detector {:?} margin must be below cutoff", d.family));
            }
        }
        if d.margin < 0.0 {
            return invalid(format!("detector {:?} margin must not be negative", d.family));
        }
    }

    if let Err(e) = config.severity_bands.validate() {
        return invalid(e);
    }

    for boundary in Boundary::ALL {
        match config.boundaries.get(boundary) {
            None => {
                return invalid(format!("no overflow policy for boundary {}", boundary.as_str()));
            }
            Some(b) if b.max_depth == 0 => {
                return invalid(format!("boundary {} max_depth must be positive", boundary.as_str()));
            }
            Some(_) => {}
        }
    }

    if config.scorer.timeout_ms == 0 {
        return invalid("scorer.timeout_ms must be positive".into());
    }
    if config.sink.timeout_ms == 0 {
        return invalid("sink.timeout_ms must be positive".into());
    }
    if config.vocabulary.max_size < 3 {
        return invalid("vocabulary.max_size must leave room beyond the reserved ids".into());
    }

    Ok(())
}
