//! End-to-end tests of the mnemos engine in memory-only mode.

use std::sync::Arc;

use mnemos::cleanup::CleanupBackend;
use mnemos::concept::Metadata;
use mnemos::config::EngineConfig;
use mnemos::engine::Engine;
use mnemos::error::{MnemosError, QueryError, StoreError, VsaError};
use mnemos::query::NoResolver;
use mnemos::vsa::{Dimension, HyperVec};
use mnemos::wal::Operation;

fn test_engine() -> Engine {
    Engine::open(EngineConfig::in_memory(Dimension::TEST)).unwrap()
}

fn engine_with_dim(dim: usize) -> Engine {
    Engine::open(EngineConfig::in_memory(Dimension(dim))).unwrap()
}

#[test]
fn similarity_is_reflexive_and_symmetric() {
    let engine = test_engine();
    for seed in 0..20u64 {
        let a = engine.random_vector(seed);
        let b = engine.random_vector(seed + 1_000);
        assert!((engine.similarity(&a, &a).unwrap() - 1.0).abs() < 1e-5);
        let ab = engine.similarity(&a, &b).unwrap();
        let ba = engine.similarity(&b, &a).unwrap();
        assert!((ab - ba).abs() < 1e-6, "seed {seed}: {ab} vs {ba}");
    }
}

#[test]
fn unbind_recovers_bound_operand() {
    let engine = test_engine();
    for seed in 0..20u64 {
        let a = engine.random_vector(seed);
        let b = engine.random_vector(seed + 500);
        let bound = engine.bind(&a, &b).unwrap();
        let recovered = engine.unbind(&bound, &b).unwrap();
        let sim = engine.similarity(&recovered, &a).unwrap();
        assert!(sim > 0.9, "seed {seed}: {sim}");
    }
}

#[test]
fn random_vectors_are_quasi_orthogonal() {
    let engine = test_engine();
    let vectors: Vec<HyperVec> = (0..10).map(|s| engine.random_vector(s)).collect();
    for (i, a) in vectors.iter().enumerate() {
        for b in &vectors[i + 1..] {
            assert!(engine.similarity(a, b).unwrap().abs() < 0.2);
        }
    }
    assert_eq!(engine.random_vector(3), engine.random_vector(3));
}

#[test]
fn bundle_of_up_to_five_cleans_up_to_all_members() {
    let engine = test_engine();
    for i in 0..20u64 {
        engine
            .store(&format!("c{i}"), engine.random_vector(i), Metadata::new())
            .unwrap();
    }
    for n in 1..=5usize {
        let members: Vec<HyperVec> = (0..n as u64).map(|i| engine.random_vector(i * 3)).collect();
        let refs: Vec<&HyperVec> = members.iter().collect();
        let bundle = engine.bundle(&refs).unwrap();

        let matches = engine.cleanup(&bundle, n).unwrap();
        assert_eq!(matches.len(), n);
        let mut found: Vec<String> = matches.iter().map(|m| m.concept.id.clone()).collect();
        found.sort();
        let mut expected: Vec<String> = (0..n as u64).map(|i| format!("c{}", i * 3)).collect();
        expected.sort();
        assert_eq!(found, expected, "bundle of {n}");
    }
}

#[test]
fn red_apple_unbind_matches_apple() {
    let engine = engine_with_dim(256);
    let v1 = engine.random_vector(1);
    let v2 = engine.random_vector(2);
    engine.store("red", v1.clone(), Metadata::new()).unwrap();
    engine.store("apple", v2.clone(), Metadata::new()).unwrap();

    let c = engine.bind(&v1, &v2).unwrap();
    let recovered = engine.unbind(&c, &v1).unwrap();
    assert!(engine.similarity(&recovered, &v2).unwrap() >= 0.9);

    let best = engine.cleanup_best(&recovered).unwrap().unwrap();
    assert_eq!(best.concept.id, "apple");
}

#[test]
fn bundle_of_three_ranks_members_descending() {
    let engine = test_engine();
    let red = engine.encode_token("red");
    let apple = engine.encode_token("apple");
    let car = engine.encode_token("car");
    engine.store("red", red.clone(), Metadata::new()).unwrap();
    engine.store("apple", apple.clone(), Metadata::new()).unwrap();
    engine.store("car", car.clone(), Metadata::new()).unwrap();
    engine
        .store("noise", engine.random_vector(99), Metadata::new())
        .unwrap();

    let bundle = engine.bundle(&[&red, &apple, &car]).unwrap();
    let matches = engine.cleanup(&bundle, 3).unwrap();

    assert_eq!(matches.len(), 3);
    for m in &matches {
        assert!(m.similarity > 0.3, "{} at {}", m.concept.id, m.similarity);
        assert_ne!(m.concept.id, "noise");
    }
    for pair in matches.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
}

#[test]
fn cleanup_below_threshold_is_empty_not_error() {
    let engine = test_engine();
    assert!(engine.cleanup(&engine.random_vector(1), 3).unwrap().is_empty());

    engine
        .store("a", engine.random_vector(1), Metadata::new())
        .unwrap();
    let unrelated = engine.random_vector(12_345);
    assert!(engine.cleanup(&unrelated, 3).unwrap().is_empty());
    assert!(engine.cleanup_best(&unrelated).unwrap().is_none());
    assert!(engine.cleanup(&engine.random_vector(1), 0).unwrap().is_empty());
}

#[test]
fn dimension_mismatch_is_rejected() {
    let engine = test_engine();
    let short = HyperVec::from_phases(vec![0.0; 16]);
    let err = engine.store("x", short.clone(), Metadata::new()).unwrap_err();
    assert!(matches!(
        err,
        MnemosError::Vsa(VsaError::DimensionMismatch { .. })
    ));
    assert!(engine.bind(&short, &engine.random_vector(1)).is_err());
    assert!(engine.cleanup(&short, 1).is_err());
    assert!(engine.is_empty());
}

#[test]
fn unknown_concepts_are_reported() {
    let engine = test_engine();
    assert!(matches!(
        engine.get("ghost"),
        Err(MnemosError::Store(StoreError::UnknownConcept { .. }))
    ));
    assert!(matches!(
        engine.delete("ghost"),
        Err(MnemosError::Store(StoreError::UnknownConcept { .. }))
    ));
}

#[test]
fn store_update_and_delete() {
    let engine = test_engine();
    let first = engine
        .store(
            "sun",
            engine.random_vector(1),
            [("kind".to_string(), "star".to_string())].into(),
        )
        .unwrap();
    let second = engine
        .store("sun", engine.random_vector(2), Metadata::new())
        .unwrap();

    assert_eq!(second.created_at, first.created_at);
    assert!(second.revision > first.revision);
    assert_eq!(engine.get("sun").unwrap().vector, engine.random_vector(2));
    assert_eq!(engine.len(), 1);

    engine.delete("sun").unwrap();
    assert!(!engine.contains("sun"));
    assert!(engine.all().next().is_none());
}

#[test]
fn all_iterates_in_id_order() {
    let engine = test_engine();
    for id in ["delta", "alpha", "charlie", "bravo"] {
        engine
            .store(id, engine.encode_token(id), Metadata::new())
            .unwrap();
    }
    let ids: Vec<String> = engine.all().map(|c| c.id).collect();
    assert_eq!(ids, vec!["alpha", "bravo", "charlie", "delta"]);
}

#[test]
fn transaction_is_invisible_until_end() {
    let engine = test_engine();
    let tx = engine.wal_begin("tx1").unwrap();
    engine
        .wal_append(&tx, Operation::put("a", engine.random_vector(1), Metadata::new()))
        .unwrap();
    engine
        .wal_append(&tx, Operation::put("b", engine.random_vector(2), Metadata::new()))
        .unwrap();
    assert!(engine.is_empty());

    let commit = engine.wal_end(tx).unwrap();
    assert_eq!(commit.label, "tx1");
    assert_eq!(commit.changes.len(), 2);
    assert_eq!(engine.get("a").unwrap().revision, commit.end_seq);
    assert_eq!(engine.get("b").unwrap().revision, commit.end_seq);
}

#[test]
fn abandoned_transaction_leaves_nothing() {
    let engine = test_engine();
    let tx = engine.wal_begin("tx1").unwrap();
    engine
        .wal_append(&tx, Operation::put("a", engine.random_vector(1), Metadata::new()))
        .unwrap();
    engine.wal_abandon(tx).unwrap();
    assert!(engine.is_empty());

    // The label is free again.
    let tx = engine.wal_begin("tx1").unwrap();
    engine.wal_end(tx).unwrap();
}

#[test]
fn transaction_rejects_bad_operations() {
    let engine = test_engine();
    let tx = engine.wal_begin("tx").unwrap();
    assert!(
        engine
            .wal_append(
                &tx,
                Operation::put("a", HyperVec::from_phases(vec![0.0; 3]), Metadata::new())
            )
            .is_err()
    );
    assert!(engine.wal_append(&tx, Operation::delete("ghost")).is_err());

    // Deleting something put earlier in the same transaction is fine.
    engine
        .wal_append(&tx, Operation::put("a", engine.random_vector(1), Metadata::new()))
        .unwrap();
    engine.wal_append(&tx, Operation::delete("a")).unwrap();
    engine.wal_end(tx).unwrap();
    assert!(engine.is_empty());

    assert!(engine.wal_begin("dup").is_ok());
    assert!(engine.wal_begin("dup").is_err());
}

#[test]
fn query_plan_binds_and_stores_atomically() {
    let engine = test_engine();
    engine
        .store("red", engine.random_vector(1), Metadata::new())
        .unwrap();
    engine
        .store("apple", engine.random_vector(2), Metadata::new())
        .unwrap();

    let outcome = engine
        .planner()
        .run("load red; load apple; bind; store red_apple")
        .unwrap();
    assert_eq!(outcome.stored, vec!["red_apple"]);
    assert!(outcome.commit_seq.is_some());

    let stored = engine.get("red_apple").unwrap();
    assert_eq!(stored.revision, outcome.commit_seq.unwrap());

    let outcome = engine
        .planner()
        .run("load red_apple; load red; unbind; cleanup 1")
        .unwrap();
    assert_eq!(outcome.best().unwrap().concept.id, "apple");
    assert!(outcome.commit_seq.is_none());
}

#[test]
fn failed_plan_leaves_no_partial_state() {
    let engine = test_engine();
    engine
        .store("red", engine.random_vector(1), Metadata::new())
        .unwrap();

    let err = engine
        .planner_with(&NoResolver)
        .run("load red; store copy; resolve missing; bind; store never")
        .unwrap_err();
    assert!(matches!(err, QueryError::Unresolved { .. }));
    assert!(!engine.contains("copy"));
    assert!(!engine.contains("never"));
    assert!(engine.info().unwrap().open_transactions.is_empty());

    let err = engine.planner().run("load red; bind").unwrap_err();
    assert!(matches!(err, QueryError::StackUnderflow { .. }));
}

#[test]
fn record_roles_can_be_recovered() {
    let engine = test_engine();
    for token in ["red", "apple", "round"] {
        engine
            .store(token, engine.encode_token(token), Metadata::new())
            .unwrap();
    }
    let planner = engine.planner();
    planner
        .compose_record(
            "fruit",
            &[("color", "red"), ("kind", "apple"), ("shape", "round")],
            Metadata::new(),
        )
        .unwrap();

    let matches = planner.recover_filler("fruit", "color", 1).unwrap();
    assert_eq!(matches[0].concept.id, "red");
    let matches = planner.recover_filler("fruit", "shape", 1).unwrap();
    assert_eq!(matches[0].concept.id, "round");
}

#[test]
fn label_sequence_and_record_encodings() {
    let engine = test_engine();
    let red = engine.encode_token("red");
    let apple = engine.encode_token("apple");

    let label = engine.encode_label("red apple").unwrap();
    assert!(engine.similarity(&label, &red).unwrap() > 0.5);
    assert!(engine.similarity(&label, &apple).unwrap() > 0.5);
    assert_eq!(engine.encode_label("red").unwrap(), red);
    assert!(matches!(
        engine.encode_label("   "),
        Err(MnemosError::Vsa(VsaError::EmptyBundle))
    ));

    // Only the last item stays unrotated, so order matters.
    let forward = engine.encode_sequence(&[&red, &apple]).unwrap();
    let backward = engine.encode_sequence(&[&apple, &red]).unwrap();
    assert!(engine.similarity(&forward, &apple).unwrap() > 0.5);
    assert!(engine.similarity(&forward, &red).unwrap().abs() < 0.2);
    assert!(engine.similarity(&forward, &backward).unwrap().abs() < 0.2);

    let color = engine.encode_token("color");
    let kind = engine.encode_token("kind");
    let record = engine.encode_record(&[(&color, &red), (&kind, &apple)]).unwrap();
    engine.store("red", red.clone(), Metadata::new()).unwrap();
    engine.store("apple", apple.clone(), Metadata::new()).unwrap();
    let filler = engine.unbind(&record, &color).unwrap();
    assert_eq!(engine.cleanup_best(&filler).unwrap().unwrap().concept.id, "red");

    let short = HyperVec::identity(Dimension(8));
    assert!(matches!(
        engine.encode_record(&[(&color, &short)]),
        Err(MnemosError::Vsa(VsaError::DimensionMismatch { .. }))
    ));
}

#[test]
fn concurrent_disjoint_puts_are_all_kept() {
    let engine = Arc::new(test_engine());
    let threads = 8;
    let per_thread = 25;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                for i in 0..per_thread {
                    let id = format!("t{t}-{i}");
                    let seed = (t * per_thread + i) as u64;
                    engine
                        .store(&id, engine.random_vector(seed), Metadata::new())
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.len(), threads * per_thread);
    for t in 0..threads {
        for i in 0..per_thread {
            let seed = (t * per_thread + i) as u64;
            let concept = engine.get(&format!("t{t}-{i}")).unwrap();
            assert_eq!(concept.vector, engine.random_vector(seed));
        }
    }

    let mut revisions: Vec<u64> = engine.all().map(|c| c.revision).collect();
    revisions.sort_unstable();
    revisions.dedup();
    assert_eq!(revisions.len(), threads * per_thread);
}

#[test]
fn readers_run_alongside_writers() {
    let engine = test_engine();
    engine
        .store("anchor", engine.random_vector(0), Metadata::new())
        .unwrap();
    let anchor = engine.random_vector(0);

    std::thread::scope(|s| {
        s.spawn(|| {
            for i in 1..100u64 {
                engine
                    .store(&format!("w{i}"), engine.random_vector(i), Metadata::new())
                    .unwrap();
            }
        });
        s.spawn(|| {
            for _ in 0..100 {
                let best = engine.cleanup_best(&anchor).unwrap().unwrap();
                assert_eq!(best.concept.id, "anchor");
            }
        });
    });
    assert_eq!(engine.len(), 100);
}

#[test]
fn hnsw_backend_finds_stored_concepts() {
    let engine = Engine::open(EngineConfig {
        cleanup_backend: CleanupBackend::Hnsw,
        ..EngineConfig::in_memory(Dimension::TEST)
    })
    .unwrap();
    for i in 0..100u64 {
        engine
            .store(&format!("c{i}"), engine.random_vector(i), Metadata::new())
            .unwrap();
    }
    let noisy = engine
        .bundle(&[&engine.random_vector(42), &engine.random_vector(5_000)])
        .unwrap();
    let best = engine.cleanup_best(&noisy).unwrap().unwrap();
    assert_eq!(best.concept.id, "c42");

    engine.delete("c42").unwrap();
    let after = engine.cleanup(&noisy, 3).unwrap();
    assert!(after.iter().all(|m| m.concept.id != "c42"));
    assert_eq!(engine.info().unwrap().cleanup_backend, "hnsw");
}
