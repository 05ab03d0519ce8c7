use super::snapshot::read_snapshot;
use super::*;
use std::fs;
use std::sync::Arc;

#[test]
fn test_reserved_ids() {
    let vocab = Vocabulary::new(GrowthMode::Open, 100);
    assert_eq!(vocab.resolve(PAD_ID).as_deref(), Some(PAD_TOKEN));
    assert_eq!(vocab.resolve(OOV_ID).as_deref(), Some(OOV_TOKEN));
    assert_eq!(vocab.intern("failed password"), FIRST_TOKEN_ID);
    assert_eq!(vocab.intern("failed password"), FIRST_TOKEN_ID);
    assert_eq!(vocab.intern("accepted password"), FIRST_TOKEN_ID + 1);

    let top = vocab.top_tokens(1);
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].token, "failed password");
    assert_eq!(top[0].frequency, 2);
    assert_eq!(vocab.stats().top_tokens.len(), 2);
}

#[test]
fn test_frozen_maps_unseen_to_oov() {
    let vocab = Vocabulary::new(GrowthMode::Frozen, 100);
    assert_eq!(vocab.intern("anything"), OOV_ID);
    assert_eq!(vocab.len(), 2);
    assert!((vocab.oov_rate() - 1.0).abs() < f64::EPSILON);
}

#[test]
fn test_capacity_reached_maps_to_oov() {
    let vocab = Vocabulary::new(GrowthMode::Open, 3);
    assert_eq!(vocab.intern("a"), 2);
    assert_eq!(vocab.intern("b"), OOV_ID);
    assert_eq!(vocab.intern("a"), 2);
}

#[test]
fn test_concurrent_intern_no_lost_or_duplicate_ids() {
    let vocab = Arc::new(Vocabulary::new(GrowthMode::Open, 10_000));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let vocab = vocab.clone();
            std::thread::spawn(move || {
                (0..200)
                    .map(|i| {
                        // Half the tokens shared across threads
                        let token = if i % 2 == 0 { format!("shared-{}", i) } else { format!("t{}-{}", t, i) };
                        (token.clone(), vocab.intern(&token))
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = std::collections::HashMap::new();
    for h in handles {
        for (token, id) in h.join().unwrap() {
            let prev = seen.insert(token.clone(), id);
            if let Some(prev) = prev {
                assert_eq!(prev, id, "token {} got two ids", token);
            }
        }
    }

    // 100 shared + 8 * 100 private
    assert_eq!(vocab.len(), 2 + 100 + 800);
    let mut ids: Vec<u32> = seen.values().copied().collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 900);
}

#[test]
fn test_checkpoint_and_reload_keeps_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vocabulary.jsonl");

    let vocab = Vocabulary::new(GrowthMode::Open, 100);
    vocab.intern("failed password");
    vocab.intern("session opened");
    assert_eq!(vocab.checkpoint(&path, "rules-1").unwrap(), 2);
    vocab.intern("sudo command");
    assert_eq!(vocab.checkpoint(&path, "rules-1").unwrap(), 1);
    assert_eq!(vocab.checkpoint(&path, "rules-1").unwrap(), 0);

    let restored = Vocabulary::load(&path, GrowthMode::Open, 100).unwrap();
    assert_eq!(restored.len(), 5);
    assert_eq!(restored.lookup("failed password"), Some(2));
    assert_eq!(restored.lookup("session opened"), Some(3));
    assert_eq!(restored.lookup("sudo command"), Some(4));
    assert_eq!(restored.intern("new token"), 5);

    let snapshot = read_snapshot(&path).unwrap().unwrap();
    assert_eq!(snapshot.header.unwrap().vocab_size, 5);
}

#[test]
fn test_corrupt_snapshot_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vocabulary.jsonl");

    fs::write(&path, "{\"token\":\"a\",\"id\":2}\nnot json\n").unwrap();
    assert!(matches!(
        Vocabulary::load(&path, GrowthMode::Open, 100),
        Err(VocabError::Corrupt { line: 2, .. })
    ));

    fs::write(&path, "{\"token\":\"a\",\"id\":2}\n{\"token\":\"b\",\"id\":7}\n").unwrap();
    assert!(matches!(
        Vocabulary::load(&path, GrowthMode::Open, 100),
        Err(VocabError::Corrupt { .. })
    ));
}

#[test]
fn test_reconcile_rejects_other_models_size() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vocabulary.jsonl");

    let vocab = Vocabulary::new(GrowthMode::Open, 100);
    vocab.intern("a");
    vocab.intern("b");
    vocab.checkpoint(&path, "model-a").unwrap();

    let restored = Vocabulary::load(&path, GrowthMode::Open, 100).unwrap();
    assert!(restored.reconcile(None, "model-b").is_ok());
    assert!(restored.reconcile(Some(4), "model-b").is_ok());
    assert!(matches!(
        restored.reconcile(Some(50), "model-b"),
        Err(VocabError::SizeMismatch { snapshot: 4, expected: 50, .. })
    ));
    // Same model, still growing toward its size
    assert!(restored.reconcile(Some(50), "model-a").is_ok());
    // Never more ids than the model accepts
    assert!(restored.reconcile(Some(3), "model-a").is_err());
}

#[test]
fn test_reconcile_caps_growth() {
    let vocab = Vocabulary::new(GrowthMode::Open, 100);
    vocab.reconcile(Some(3), "m").unwrap();
    assert_eq!(vocab.intern("a"), 2);
    assert_eq!(vocab.intern("b"), OOV_ID);
}

#[test]
fn test_oov_log_written_on_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vocabulary.jsonl");

    let vocab = Vocabulary::new(GrowthMode::Frozen, 100);
    vocab.intern("rootkit detected");
    vocab.intern("rootkit detected");
    vocab.checkpoint(&path, "m").unwrap();

    let oov = fs::read_to_string(oov_log_path(&path)).unwrap();
    assert_eq!(oov.lines().count(), 1);
    assert!(oov.contains("rootkit detected"));
}

#[test]
fn test_cap_to_stops_growth_at_model_size() {
    let vocab = Vocabulary::new(GrowthMode::Open, 100);
    vocab.intern("a");
    assert!(vocab.cap_to(4));
    assert_eq!(vocab.capacity(), 4);

    let ids: Vec<u32> = ["b", "c", "d", "e", "f"].iter().map(|t| vocab.intern(t)).collect();
    assert_eq!(ids, vec![3, OOV_ID, OOV_ID, OOV_ID, OOV_ID]);
    assert_eq!(vocab.len(), 4);

    // Already larger than 3: refused, cap unchanged
    assert!(!vocab.cap_to(3));
    assert_eq!(vocab.capacity(), 4);
}

#[test]
fn test_idle_checkpoint_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vocabulary.jsonl");

    let vocab = Vocabulary::new(GrowthMode::Open, 100);
    vocab.intern("failed password");
    vocab.checkpoint(&path, "m1").unwrap();
    let after_first = fs::read_to_string(&path).unwrap().lines().count();

    for _ in 0..3 {
        assert_eq!(vocab.checkpoint(&path, "m1").unwrap(), 0);
    }
    assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), after_first);

    // New model version: header only
    vocab.checkpoint(&path, "m2").unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), after_first + 1);

    // Reloaded vocabulary knows the last header
    let restored = Vocabulary::load(&path, GrowthMode::Open, 100).unwrap();
    restored.checkpoint(&path, "m2").unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), after_first + 1);
}

#[test]
fn test_oov_tokens_logged_again_after_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vocabulary.jsonl");

    let vocab = Vocabulary::new(GrowthMode::Frozen, 100);
    vocab.intern("rootkit detected");
    vocab.checkpoint(&path, "m").unwrap();
    vocab.intern("rootkit detected");
    vocab.checkpoint(&path, "m").unwrap();

    let oov = fs::read_to_string(oov_log_path(&path)).unwrap();
    assert_eq!(oov.lines().count(), 2);
}

#[test]
fn test_duplicate_token_in_snapshot_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vocabulary.jsonl");

    fs::write(&path, "{\"token\":\"a\",\"id\":2}\n{\"token\":\"a\",\"id\":3}\n").unwrap();
    assert!(matches!(
        Vocabulary::load(&path, GrowthMode::Open, 100),
        Err(VocabError::Corrupt { line: 2, .. })
    ));
}
