//! Rule-based Scoring Model
//!
//! Mỗi event type có một trọng số. Score = trung bình trọng số trên các vị trí không phải PAD.
//! Tokens without an explicit weight fall back to keyword levels.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::{check_length, ScoringModel};
use crate::logic::error::ModelError;
use crate::logic::vocab::{Vocabulary, OOV_ID, PAD_ID};

pub const BUILTIN_VERSION: &str = "rules-builtin-1";
pub const BUILTIN_CUTOFF: f64 = 0.5;

// ============================================================================
// TABLES
// ============================================================================

/// Event types emitted by the built-in dialects
static BUILTIN_WEIGHTS: Lazy<HashMap<String, f64>> = Lazy::new(|| {
    let table: &[(&str, f64)] = &[
        // Tampering / persistence
        ("audit log cleared", 0.9),
        ("sensitive file modified", 0.9),
        ("service installed", 0.9),
        // Credential attacks
        ("failed password", 0.8),
        ("failed publickey", 0.8),
        ("invalid user", 0.8),
        ("authentication failure", 0.8),
        ("sudo failure", 0.8),
        ("logon failure", 0.8),
        ("account locked out", 0.8),
        ("kerberos preauth failed", 0.8),
        // Privilege / account changes
        ("special privileges assigned", 0.6),
        ("member added to group", 0.6),
        ("user account created", 0.6),
        ("user created", 0.6),
        ("password changed", 0.6),
        ("password reset attempt", 0.6),
        ("explicit credential logon", 0.6),
        ("permissions changed", 0.6),
        ("registry value modified", 0.6),
        // Lineage
        ("sudo command", 0.4),
        ("process crash", 0.4),
        ("process created", 0.2),
        ("object access", 0.2),
        // Routine
        ("accepted password", 0.05),
        ("accepted publickey", 0.05),
        ("session opened", 0.05),
        ("session closed", 0.05),
        ("connection closed", 0.05),
        ("logon success", 0.05),
        ("logoff", 0.05),
        ("process exited", 0.05),
        ("credential validation", 0.05),
        ("kerberos ticket requested", 0.05),
        ("object handle requested", 0.05),
        ("user account enabled", 0.1),
    ];
    table.iter().map(|(t, w)| (t.to_string(), *w)).collect()
});

/// Keyword levels for tokens with no explicit weight
const KEYWORD_LEVELS: &[(f64, &[&str])] = &[
    (0.8, &["malware", "ransomware", "rootkit", "backdoor", "exfiltrat"]),
    (0.6, &["injection", "bypass", "admin", "root", "ddos", "dump"]),
    (0.4, &["script", "alert", "cookie", "traversal", "scan"]),
    (0.2, &["error", "failed", "timeout", "warning"]),
];

fn keyword_weight(token: &str) -> Option<f64> {
    let lower = token.to_lowercase();
    KEYWORD_LEVELS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(weight, _)| *weight)
}

// ============================================================================
// ARTIFACT BODY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesParams {
    /// Token -> weight. Merged over the built-in table.
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    #[serde(default = "default_weight")]
    pub default_weight: f64,
    #[serde(default = "default_oov_weight")]
    pub oov_weight: f64,
}

fn default_weight() -> f64 {
    0.05
}

fn default_oov_weight() -> f64 {
    0.2
}

impl Default for RulesParams {
    fn default() -> Self {
        Self {
            weights: HashMap::new(),
            default_weight: default_weight(),
            oov_weight: default_oov_weight(),
        }
    }
}

// ============================================================================
// MODEL
// ============================================================================

pub struct RulesModel {
    version: String,
    sequence_length: usize,
    cutoff: Option<f64>,
    vocab_size: Option<usize>,
    weights: HashMap<String, f64>,
    default_weight: f64,
    oov_weight: f64,
    /// Ids are stable for the process lifetime, so id -> token is fixed
    vocab: Arc<Vocabulary>,
}

impl RulesModel {
    /// Built-in table, accepts any window length
    pub fn builtin(vocab: Arc<Vocabulary>, sequence_length: usize) -> Self {
        Self::from_params(
            vocab,
            BUILTIN_VERSION.to_string(),
            sequence_length,
            Some(BUILTIN_CUTOFF),
            None,
            RulesParams::default(),
        )
    }

    pub fn from_params(
        vocab: Arc<Vocabulary>,
        version: String,
        sequence_length: usize,
        cutoff: Option<f64>,
        vocab_size: Option<usize>,
        params: RulesParams,
    ) -> Self {
        let mut weights = BUILTIN_WEIGHTS.clone();
        weights.extend(params.weights);

        Self {
            version,
            sequence_length,
            cutoff,
            vocab_size,
            weights,
            default_weight: params.default_weight,
            oov_weight: params.oov_weight,
            vocab,
        }
    }

    fn weight_of(&self, id: u32) -> f64 {
        if id == OOV_ID {
            return self.oov_weight;
        }
        match self.vocab.resolve(id) {
            Some(token) => self
                .weights
                .get(&token)
                .copied()
                .or_else(|| keyword_weight(&token))
                .unwrap_or(self.default_weight),
            None => self.oov_weight,
        }
    }
}

impl ScoringModel for RulesModel {
    fn score(&self, sequence: &[u32]) -> Result<f64, ModelError> {
        check_length(self.sequence_length, sequence)?;

        let (sum, n) = sequence
            .iter()
            .filter(|&&id| id != PAD_ID)
            .fold((0.0, 0usize), |(sum, n), &id| (sum + self.weight_of(id), n + 1));

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

    #[test]
    fn test_mean_weight_ignores_padding() {
        let vocab = Arc::new(Vocabulary::new(GrowthMode::Open, 100));
        let failed = vocab.intern("failed password");
        let accepted = vocab.intern("accepted password");
        let model = RulesModel::builtin(vocab, 4);

        let all_failed = model.score(&[failed, failed, PAD_ID, PAD_ID]).unwrap();
        assert!((all_failed - 0.8).abs() < 1e-9);

        let mixed = model.score(&[failed, accepted, PAD_ID, PAD_ID]).unwrap();
        assert!((mixed - 0.425).abs() < 1e-9);

        assert_eq!(model.score(&[PAD_ID; 4]).unwrap(), 0.0);
    }

    #[test]
    fn test_keyword_fallback_and_oov() {
        let vocab = Arc::new(Vocabulary::new(GrowthMode::Open, 100));
        let rootkit = vocab.intern("rootkit loaded into kernel");
        let boring = vocab.intern("cron job started");
        let model = RulesModel::builtin(vocab, 1);

        assert!((model.score(&[rootkit]).unwrap() - 0.8).abs() < 1e-9);
        assert!((model.score(&[boring]).unwrap() - 0.05).abs() < 1e-9);
        assert!((model.score(&[OOV_ID]).unwrap() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let vocab = Arc::new(Vocabulary::new(GrowthMode::Open, 100));
        let model = RulesModel::builtin(vocab, 3);
        assert!(matches!(
            model.score(&[2, 2]),
            Err(ModelError::SequenceLength { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_artifact_weights_override() {
        let vocab = Arc::new(Vocabulary::new(GrowthMode::Open, 100));
        let id = vocab.intern("session opened");
        let mut params = RulesParams::default();
        params.weights.insert("session opened".into(), 0.7);
        let model = RulesModel::from_params(vocab, "custom".into(), 1, Some(0.3), None, params);
        assert!((model.score(&[id]).unwrap() - 0.7).abs() < 1e-9);
    }
}
