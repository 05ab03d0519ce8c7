//! Model Registry - atomic hot-swap
//!
//! Publishes an immutable `Arc<dyn ScoringModel>`. Callers clone the handle at
//! scoring start and keep it; a swap never affects a call already running.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;

use super::artifact::ModelLoader;
use super::ScoringModel;
use crate::logic::error::ModelError;
use crate::logic::vocab::Vocabulary;

pub struct ModelRegistry {
    current: RwLock<Arc<dyn ScoringModel>>,
    swaps: AtomicU64,
}

impl ModelRegistry {
    pub fn new(model: Arc<dyn ScoringModel>) -> Self {
        Self {
            current: RwLock::new(model),
            swaps: AtomicU64::new(0),
        }
    }

    /// Handle captured for one scoring call
    pub fn current(&self) -> Arc<dyn ScoringModel> {
        self.current.read().clone()
    }

    pub fn version(&self) -> String {
        self.current.read().version().to_string()
    }

    fn check_length(current: &dyn ScoringModel, next: &dyn ScoringModel) -> Result<(), ModelError> {
        if next.sequence_length() != current.sequence_length() {
            return Err(ModelError::SequenceLength {
                expected: current.sequence_length(),
                actual: next.sequence_length(),
            });
        }
        Ok(())
    }

    pub fn swap_count(&self) -> u64 {
        self.swaps.load(Ordering::Relaxed)
    }

    /// Publish a new model. Input length must not change under running windows.
    pub fn swap(&self, model: Arc<dyn ScoringModel>) -> Result<(), ModelError> {
        let mut current = self.current.write();
        Self::check_length(current.as_ref(), model.as_ref())?;
        log::info!("Model swap: {} -> {}", current.version(), model.version());
        *current = model;
        self.swaps.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Load the artifact again and swap if it changed. Failure keeps the old model.
    ///
    /// Vocabulary growth is capped at the new model's size before it is published.
    pub fn reload(&self, loader: &ModelLoader, vocab: &Vocabulary) -> Result<bool, ModelError> {
        let model = loader.load()?;
        if model.version() == self.version() {
            return Ok(false);
        }
        Self::check_length(self.current().as_ref(), model.as_ref())?;
        if let Some(size) = model.vocab_size() {
            if !vocab.cap_to(size) {
                return Err(ModelError::Invalid(format!(
                    "model {} expects {} ids but the vocabulary already holds {}",
                    model.version(),
                    size,
                    vocab.len()
                )));
            }
        }
        self.swap(model)?;
        Ok(true)
    }
}

// ============================================================================
// WATCHER
// ============================================================================

/// Reloads the artifact when it changes on disk. Dropping it stops watching.
pub struct ArtifactWatcher {
    _watcher: RecommendedWatcher,
}

impl ArtifactWatcher {
    pub fn start(
        registry: Arc<ModelRegistry>,
        loader: ModelLoader,
        vocab: Arc<Vocabulary>,
    ) -> Result<Self, ModelError> {
        let path = loader
            .artifact_path()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| ModelError::Invalid("no artifact to watch".into()))?;
        let file_name = path.file_name().map(|n| n.to_os_string());
        // Watch the directory: editors and deploy tools replace files instead of writing in place
        let dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("Model watcher error: {}", e);
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            if !event.paths.iter().any(|p| p.file_name().map(|n| n.to_os_string()) == file_name) {
                return;
            }

            match registry.reload(&loader, &vocab) {
                Ok(true) => log::info!("Model reloaded: {}", registry.version()),
                Ok(false) => {}
                Err(e) => log::error!("Model reload failed, keeping {}: {}", registry.version(), e),
            }
        })
        .map_err(|e| ModelError::Internal(e.to_string()))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| ModelError::Internal(e.to_string()))?;

        log::info!("Watching model artifact {:?}", path);
        Ok(Self { _watcher: watcher })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::config::{GrowthMode, ModelConfig, ModelKind};
    use crate::logic::model::RulesModel;
    use crate::logic::vocab::OOV_ID;
    use std::fs;

    #[test]
    fn test_in_flight_handle_survives_swap() {
        let vocab = Arc::new(Vocabulary::new(GrowthMode::Open, 100));
        let registry = ModelRegistry::new(Arc::new(RulesModel::builtin(vocab.clone(), 4)));

        let captured = registry.current();
        let old_version = captured.version().to_string();

        let loader = ModelLoader::new(&ModelConfig::default(), 4, vocab.clone());
        let next = loader
            .build(br#"{"version":"v2","sequence_length":4,"cutoff":0.3}"#)
            .unwrap();
        registry.swap(next).unwrap();

        assert_eq!(captured.version(), old_version);
        assert!(registry.version().starts_with("v2+"));
        assert_eq!(registry.swap_count(), 1);
    }

    #[test]
    fn test_swap_rejects_other_length() {
        let vocab = Arc::new(Vocabulary::new(GrowthMode::Open, 100));
        let registry = ModelRegistry::new(Arc::new(RulesModel::builtin(vocab.clone(), 4)));
        assert!(registry.swap(Arc::new(RulesModel::builtin(vocab, 5))).is_err());
        assert_eq!(registry.swap_count(), 0);
    }

    #[test]
    fn test_failed_reload_keeps_old_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, r#"{"version":"v1","sequence_length":4}"#).unwrap();

        let vocab = Arc::new(Vocabulary::new(GrowthMode::Open, 100));
        let config = ModelConfig {
            kind: ModelKind::Rules,
            artifact: Some(path.clone()),
            watch: true,
        };
        let loader = ModelLoader::new(&config, 4, vocab.clone());
        let registry = ModelRegistry::new(loader.load().unwrap());
        let v1 = registry.version();

        // Unchanged file: no swap
        assert!(!registry.reload(&loader, &vocab).unwrap());

        fs::write(&path, "{ broken").unwrap();
        assert!(registry.reload(&loader, &vocab).is_err());
        assert_eq!(registry.version(), v1);

        fs::write(&path, r#"{"version":"v2","sequence_length":4}"#).unwrap();
        assert!(registry.reload(&loader, &vocab).unwrap());
        assert!(registry.version().starts_with("v2+"));
    }

    #[test]
    fn test_reload_caps_vocabulary_at_model_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, r#"{"version":"v1","sequence_length":4}"#).unwrap();

        let vocab = Arc::new(Vocabulary::new(GrowthMode::Open, 100));
        let config = ModelConfig {
            kind: ModelKind::Rules,
            artifact: Some(path.clone()),
            watch: true,
        };
        let loader = ModelLoader::new(&config, 4, vocab.clone());
        let registry = ModelRegistry::new(loader.load().unwrap());

        fs::write(&path, r#"{"version":"v2","sequence_length":4,"vocab_size":4}"#).unwrap();
        assert!(registry.reload(&loader, &vocab).unwrap());

        let ids: Vec<u32> = ["a", "b", "c", "d", "e"].iter().map(|t| vocab.intern(t)).collect();
        assert_eq!(ids, vec![2, 3, OOV_ID, OOV_ID, OOV_ID]);
        assert_eq!(vocab.len(), 4);

        // Smaller than what is already assigned: rejected, v2 stays
        fs::write(&path, r#"{"version":"v3","sequence_length":4,"vocab_size":3}"#).unwrap();
        assert!(registry.reload(&loader, &vocab).is_err());
        assert!(registry.version().starts_with("v2+"));
    }

    #[test]
    fn test_reload_with_other_length_leaves_vocabulary_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, r#"{"version":"v1","sequence_length":4}"#).unwrap();

        let vocab = Arc::new(Vocabulary::new(GrowthMode::Open, 100));
        let config = ModelConfig {
            kind: ModelKind::Rules,
            artifact: Some(path.clone()),
            watch: true,
        };
        let registry = ModelRegistry::new(ModelLoader::new(&config, 4, vocab.clone()).load().unwrap());

        // Loader built for length 5 so the artifact parses; the registry refuses it
        fs::write(&path, r#"{"version":"v2","sequence_length":5,"vocab_size":3}"#).unwrap();
        let loader5 = ModelLoader::new(&config, 5, vocab.clone());
        assert!(matches!(
            registry.reload(&loader5, &vocab),
            Err(ModelError::SequenceLength { expected: 4, actual: 5 })
        ));
        assert_eq!(vocab.capacity(), 100);
    }
}
