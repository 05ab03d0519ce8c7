use super::*;
use crate::logic::error::ConfigError;
use crate::logic::flow::OverflowPolicy;
use crate::logic::window::DetectorFamily;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_default_config_is_valid() {
    let config = PipelineConfig::default();
    assert!(validate(&config).is_ok());
    assert_eq!(config.window.length, 10);
    assert_eq!(config.boundaries.source.unwrap().policy, OverflowPolicy::Block);
    assert_eq!(config.boundaries.scorer.unwrap().policy, OverflowPolicy::Shed);
}

#[test]
fn test_dedup_window_defaults_to_ttl() {
    let mut config = PipelineConfig::default();
    config.window.eviction_ttl_secs = 120;
    assert_eq!(config.dedup_window_secs(), 120);

    config.alert.dedup_window_secs = Some(30);
    assert_eq!(config.dedup_window_secs(), 30);
}

#[test]
fn test_overlap_must_be_smaller_than_length() {
    let mut config = PipelineConfig::default();
    config.window.overlap = config.window.length;
    assert!(matches!(validate(&config), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_missing_boundary_policy_rejected() {
    let json = r#"{
        "boundaries": {
            "source": { "max_depth": 10, "policy": "block" },
            "scorer": { "max_depth": 10, "policy": "shed" }
        }
    }"#;
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let err = load_config(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("sink"));
}

#[test]
fn test_margin_must_be_below_cutoff() {
    let mut config = PipelineConfig::default();
    config.detectors = vec![DetectorConfig {
        family: DetectorFamily::Process,
        cutoff: Some(0.5),
        margin: 0.5,
    }];
    assert!(validate(&config).is_err());
}

#[test]
fn test_partial_file_uses_defaults() {
    let json = r#"{
        "workers": 2,
        "window": { "length": 20, "overlap": 5 },
        "detectors": [
            { "family": "process", "cutoff": 0.4, "margin": 0.1 },
            { "family": "user", "cutoff": 0.6 }
        ]
    }"#;
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let config = load_config(Some(file.path())).unwrap();
    assert_eq!(config.workers, 2);
    assert_eq!(config.window.length, 20);
    assert_eq!(config.window.overlap, 5);
    assert_eq!(config.detectors.len(), 2);
    let user = config.detectors.iter().find(|d| d.family == DetectorFamily::User).unwrap();
    assert_eq!(user.margin, 0.0);
    assert!(config.boundaries.sink.is_some());
}

#[test]
fn test_duplicate_detector_rejected() {
    let mut config = PipelineConfig::default();
    config.detectors.push(DetectorConfig::default());
    assert!(validate(&config).is_err());
}
