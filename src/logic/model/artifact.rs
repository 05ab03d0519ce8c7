//! Model Artifact Loading
//!
//! One JSON file: shared metadata plus the body for the configured kind.
//! ```json
//! {"version": "auth-2024.03", "sequence_length": 10, "cutoff": 0.45,
//!  "weights": {"failed password": 0.9}}
//! ```
//! Published version = `"<version>+<sha256 prefix of the file>"`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::frequency::{FrequencyModel, FrequencyParams};
use super::rules::{RulesModel, RulesParams};
use super::ScoringModel;
use crate::logic::config::{ModelConfig, ModelKind};
use crate::logic::error::ModelError;
use crate::logic::vocab::Vocabulary;

/// Hex chars of the artifact digest kept in the version
const FINGERPRINT_LEN: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub version: String,
    pub sequence_length: usize,
    #[serde(default)]
    pub vocab_size: Option<usize>,
    #[serde(default)]
    pub cutoff: Option<f64>,
}

pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// Builds models for startup and for every hot-swap
#[derive(Clone)]
pub struct ModelLoader {
    kind: ModelKind,
    artifact: Option<PathBuf>,
    window_length: usize,
    vocab: Arc<Vocabulary>,
}

impl ModelLoader {
    pub fn new(config: &ModelConfig, window_length: usize, vocab: Arc<Vocabulary>) -> Self {
        Self {
            kind: config.kind,
            artifact: config.artifact.clone(),
            window_length,
            vocab,
        }
    }

    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    pub fn load(&self) -> Result<Arc<dyn ScoringModel>, ModelError> {
        let Some(path) = &self.artifact else {
            return match self.kind {
                ModelKind::Rules => {
                    log::info!("No model artifact configured, using built-in rules");
                    Ok(Arc::new(RulesModel::builtin(self.vocab.clone(), self.window_length)))
                }
                ModelKind::Frequency => Err(ModelError::Invalid(
                    "frequency model requires an artifact".into(),
                )),
            };
        };

        if !path.exists() {
            return Err(ModelError::NotFound(path.clone()));
        }
        let bytes = fs::read(path)?;
        let model = self.build(&bytes)?;
        log::info!("Loaded model {} from {:?}", model.version(), path);
        Ok(model)
    }

    /// Parse and validate artifact bytes
    pub fn build(&self, bytes: &[u8]) -> Result<Arc<dyn ScoringModel>, ModelError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let meta: ArtifactMeta = serde_json::from_value(value.clone())?;

        if meta.sequence_length != self.window_length {
            return Err(ModelError::SequenceLength {
                expected: self.window_length,
                actual: meta.sequence_length,
            });
        }
        if let Some(cutoff) = meta.cutoff {
            if !(cutoff.is_finite() && cutoff > 0.0) {
                return Err(ModelError::Invalid(format!("cutoff must be positive, got {}", cutoff)));
            }
        }

        let version = format!("{}+{}", meta.version, fingerprint(bytes));

        let model: Arc<dyn ScoringModel> = match self.kind {
            ModelKind::Rules => {
                let params: RulesParams = serde_json::from_value(value)?;
                Arc::new(RulesModel::from_params(
                    self.vocab.clone(),
                    version,
                    meta.sequence_length,
                    meta.cutoff,
                    meta.vocab_size,
                    params,
                ))
            }
            ModelKind::Frequency => {
                let params: FrequencyParams = serde_json::from_value(value)?;
                Arc::new(FrequencyModel::from_params(
                    self.vocab.clone(),
                    version,
                    meta.sequence_length,
                    meta.cutoff,
                    meta.vocab_size,
                    params,
                )?)
            }
        };
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::config::GrowthMode;

    fn loader(kind: ModelKind, artifact: Option<PathBuf>, length: usize) -> ModelLoader {
        let config = ModelConfig {
            kind,
            artifact,
            watch: false,
        };
        ModelLoader::new(&config, length, Arc::new(Vocabulary::new(GrowthMode::Open, 100)))
    }

    #[test]
    fn test_builtin_without_artifact() {
        let model = loader(ModelKind::Rules, None, 10).load().unwrap();
        assert_eq!(model.sequence_length(), 10);
        assert!(model.cutoff().is_some());
        assert!(loader(ModelKind::Frequency, None, 10).load().is_err());
    }

    #[test]
    fn test_version_carries_fingerprint() {
        let bytes = br#"{"version":"auth-1","sequence_length":4,"cutoff":0.4,"weights":{"x":0.3}}"#;
        let model = loader(ModelKind::Rules, None, 4).build(bytes).unwrap();
        assert_eq!(model.version(), format!("auth-1+{}", fingerprint(bytes)));
        assert_eq!(model.cutoff(), Some(0.4));

        // Different bytes, same declared version: different model_version
        let other = br#"{"version":"auth-1","sequence_length":4,"cutoff":0.4,"weights":{"x":0.31}}"#;
        let model2 = loader(ModelKind::Rules, None, 4).build(other).unwrap();
        assert_ne!(model.version(), model2.version());
    }

    #[test]
    fn test_missing_artifact_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let l = loader(ModelKind::Rules, Some(dir.path().join("nope.json")), 4);
        assert!(matches!(l.load(), Err(ModelError::NotFound(_))));
    }

    #[test]
    fn test_incompatible_length_is_fatal() {
        let bytes = br#"{"version":"v","sequence_length":20}"#;
        assert!(matches!(
            loader(ModelKind::Rules, None, 10).build(bytes),
            Err(ModelError::SequenceLength { expected: 10, actual: 20 })
        ));
    }

    #[test]
    fn test_frequency_artifact_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(
            &path,
            r#"{"version":"freq-7","sequence_length":3,"vocab_size":50,"probabilities":{"session opened":0.4}}"#,
        )
        .unwrap();

        let model = loader(ModelKind::Frequency, Some(path), 3).load().unwrap();
        assert!(model.version().starts_with("freq-7+"));
        assert_eq!(model.vocab_size(), Some(50));
    }
}
