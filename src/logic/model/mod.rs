//! Model Module - Pluggable scoring behind one capability trait
//!
//! - `rules`: keyword/event-type weights
//! - `frequency`: statistical baseline (mean surprisal)
//! - `artifact`: JSON artifact loading + version fingerprint
//! - `registry`: atomic hot-swap + file watcher
//! - `scorer`: ScorerAdapter (timeout, retries, double-scoring guard)

pub mod rules;
pub mod frequency;
pub mod artifact;
pub mod registry;
pub mod scorer;

use crate::logic::error::ModelError;

pub use artifact::{ModelLoader, ArtifactMeta};
pub use frequency::FrequencyModel;
pub use registry::{ModelRegistry, ArtifactWatcher};
pub use rules::RulesModel;
pub use scorer::{Score, ScorerAdapter};

// ============================================================================
// CAPABILITY TRAIT
// ============================================================================

/// Frozen scoring model. Pure function of a fixed-length id sequence.
pub trait ScoringModel: Send + Sync {
    /// Anomaly score in `[0, +inf)`
    fn score(&self, sequence: &[u32]) -> Result<f64, ModelError>;

    fn version(&self) -> &str;

    /// Input length L the model was trained on
    fn sequence_length(&self) -> usize;

    /// Cutoff calibrated offline, if the artifact ships one
    fn cutoff(&self) -> Option<f64> {
        None
    }

    /// Size of the input vocabulary the model was trained on
    fn vocab_size(&self) -> Option<usize> {
        None
    }
}

/// Shared length check for implementations
pub(crate) fn check_length(expected: usize, sequence: &[u32]) -> Result<(), ModelError> {
    if sequence.len() != expected {
        return Err(ModelError::SequenceLength {
            expected,
            actual: sequence.len(),
        });
    }
    Ok(())
}
