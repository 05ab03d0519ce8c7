//! Statistical Baseline Model
//!
//! Expected probability per token, learned offline from benign traffic.
//! Score = mean surprisal `-ln p` over non-PAD positions; unseen tokens use the floor.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{check_length, ScoringModel};
use crate::logic::error::ModelError;
use crate::logic::vocab::{Vocabulary, OOV_ID, PAD_ID};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequencyParams {
    pub probabilities: HashMap<String, f64>,
    #[serde(default = "default_floor")]
    pub floor_probability: f64,
}

fn default_floor() -> f64 {
    1e-4
}

pub struct FrequencyModel {
    version: String,
    sequence_length: usize,
    cutoff: Option<f64>,
    vocab_size: Option<usize>,
    probabilities: HashMap<String, f64>,
    floor: f64,
    vocab: Arc<Vocabulary>,
}

impl FrequencyModel {
    pub fn from_params(
        vocab: Arc<Vocabulary>,
        version: String,
        sequence_length: usize,
        cutoff: Option<f64>,
        vocab_size: Option<usize>,
        params: FrequencyParams,
    ) -> Result<Self, ModelError> {
        let floor = params.floor_probability;
        if !(floor > 0.0 && floor <= 1.0) {
            return Err(ModelError::Invalid(format!(
                "floor_probability must be in (0, 1], got {}",
                floor
            )));
        }
        if let Some((token, p)) = params
            .probabilities
            .iter()
            .find(|(_, p)| !(p.is_finite() && **p > 0.0 && **p <= 1.0))
        {
            return Err(ModelError::Invalid(format!(
                "probability for {:?} out of range: {}",
                token, p
            )));
        }

        Ok(Self {
            version,
            sequence_length,
            cutoff,
            vocab_size,
            probabilities: params.probabilities,
            floor,
            vocab,
        })
    }

    fn surprisal(&self, id: u32) -> f64 {
        let p = if id == OOV_ID {
            self.floor
        } else {
            self.vocab
                .resolve(id)
                .and_then(|token| self.probabilities.get(&token).copied())
                .unwrap_or(self.floor)
        };
        -p.max(self.floor).ln()
    }
}

impl ScoringModel for FrequencyModel {
    fn score(&self, sequence: &[u32]) -> Result<f64, ModelError> {
        check_length(self.sequence_length, sequence)?;

        let (sum, n) = sequence
            .iter()
            .filter(|&&id| id != PAD_ID)
            .fold((0.0, 0usize), |(sum, n), &id| (sum + self.surprisal(id), n + 1));

        if n == 0 {
            return Ok(0.0);
        }
        Ok((sum / n as f64).max(0.0))
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    fn cutoff(&self) -> Option<f64> {
        self.cutoff
    }

    fn vocab_size(&self) -> Option<usize> {
        self.vocab_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::config::GrowthMode;

    fn model(vocab: Arc<Vocabulary>) -> FrequencyModel {
        let mut probabilities = HashMap::new();
        probabilities.insert("session opened".to_string(), 0.5);
        probabilities.insert("failed password".to_string(), 0.01);
        FrequencyModel::from_params(
            vocab,
            "freq-1".into(),
            2,
            Some(3.0),
            None,
            FrequencyParams {
                probabilities,
                floor_probability: 1e-4,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_rare_tokens_score_higher() {
        let vocab = Arc::new(Vocabulary::new(GrowthMode::Open, 100));
        let common = vocab.intern("session opened");
        let rare = vocab.intern("failed password");
        let unseen = vocab.intern("something new");
        let model = model(vocab);

        let a = model.score(&[common, common]).unwrap();
        let b = model.score(&[rare, rare]).unwrap();
        let c = model.score(&[unseen, PAD_ID]).unwrap();

        assert!((a - 0.5f64.ln().abs()).abs() < 1e-9);
        assert!(b > a);
        assert!((c - (1e-4f64).ln().abs()).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_probabilities() {
        let vocab = Arc::new(Vocabulary::new(GrowthMode::Open, 100));
        let mut probabilities = HashMap::new();
        probabilities.insert("x".to_string(), 1.5);
        let result = FrequencyModel::from_params(
            vocab,
            "bad".into(),
            2,
            None,
            None,
            FrequencyParams {
                probabilities,
                floor_probability: 1e-4,
            },
        );
        assert!(matches!(result, Err(ModelError::Invalid(_))));
    }
}
