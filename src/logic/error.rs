//! Error Taxonomy
//!
//! - Transient: source/sink/scorer failures, retried at their boundary
//! - Data-quality: parse failures, counted and dropped
//! - Fatal: config, model artifact, vocabulary snapshot (startup only)

use std::path::PathBuf;
use thiserror::Error;

use crate::logic::window::WindowId;

// ============================================================================
// DATA-QUALITY
// ============================================================================

/// Line could not be normalized by any registered dialect
#[derive(Debug, Clone, Error, PartialEq)]
#[error("parse error ({reason}) at offset {raw_ref}")]
pub struct ParseError {
    pub reason: String,
    pub raw_ref: u64,
}

impl ParseError {
    pub fn unrecognized(raw_ref: u64) -> Self {
        Self {
            reason: "unrecognized_format".to_string(),
            raw_ref,
        }
    }
}

// ============================================================================
// TRANSIENT
// ============================================================================

/// Scoring failed or timed out for one window
#[derive(Debug, Clone, Error, PartialEq)]
#[error("score error for window {window_ref}: {reason}")]
pub struct ScoreError {
    pub window_ref: WindowId,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sink delivery failed: {0}")]
    Delivery(String),

    #[error("sink hand-off timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed source record at offset {offset}: {reason}")]
    Malformed { offset: u64, reason: String },
}

// ============================================================================
// MODEL
// ============================================================================

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model artifact not found: {0}")]
    NotFound(PathBuf),

    #[error("model artifact io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("model artifact is invalid: {0}")]
    Invalid(String),

    #[error("model artifact could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("sequence length mismatch: expected {expected}, got {actual}")]
    SequenceLength { expected: usize, actual: usize },

    #[error("model internal failure: {0}")]
    Internal(String),
}

// ============================================================================
// FATAL / STARTUP
// ============================================================================

#[derive(Debug, Error)]
pub enum VocabError {
    #[error("vocabulary snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vocabulary snapshot corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("vocabulary snapshot has {snapshot} tokens but model {model_version} expects {expected}")]
    SizeMismatch {
        snapshot: usize,
        expected: usize,
        model_version: String,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Anything that prevents the pipeline from starting
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Vocabulary(#[from] VocabError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("state io error: {0}")]
    State(#[from] std::io::Error),
}
