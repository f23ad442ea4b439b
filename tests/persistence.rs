//! Persistence and recovery tests for the mnemos engine.
//!
//! These tests verify that committed transactions survive a restart, that
//! incomplete or corrupted ones vanish whole, and that snapshots plus WAL
//! compaction preserve state.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use mnemos::concept::Metadata;
use mnemos::config::EngineConfig;
use mnemos::engine::Engine;
use mnemos::error::{MnemosError, SnapshotError};
use mnemos::query::NoResolver;
use mnemos::snapshot::Snapshot;
use mnemos::vsa::Dimension;
use mnemos::wal::{DiscardReason, Operation};

fn persistent_engine(dir: &Path) -> Engine {
    Engine::open(EngineConfig::persistent(Dimension::TEST, dir)).unwrap()
}

fn wal_path(dir: &Path) -> std::path::PathBuf {
    dir.join("wal.log")
}

fn append_raw(dir: &Path, bytes: &[u8]) {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(wal_path(dir))
        .unwrap();
    file.write_all(bytes).unwrap();
}

#[test]
fn concepts_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();

    let before = {
        let engine = persistent_engine(dir.path());
        engine
            .store(
                "sun",
                engine.random_vector(1),
                [("kind".to_string(), "star".to_string())].into(),
            )
            .unwrap();
        engine
            .store("moon", engine.random_vector(2), Metadata::new())
            .unwrap();
        engine
            .store("ghost", engine.random_vector(3), Metadata::new())
            .unwrap();
        engine.delete("ghost").unwrap();
        let dump = engine.dump_bytes().unwrap();
        engine.close().unwrap();
        dump
    };

    let engine = persistent_engine(dir.path());
    assert_eq!(engine.len(), 2);
    assert_eq!(engine.get("sun").unwrap().metadata["kind"], "star");
    assert!(!engine.contains("ghost"));
    assert_eq!(engine.dump_bytes().unwrap(), before);
}

#[test]
fn sequence_numbers_resume_after_restart() {
    let dir = tempfile::TempDir::new().unwrap();

    let first = {
        let engine = persistent_engine(dir.path());
        engine
            .store("a", engine.random_vector(1), Metadata::new())
            .unwrap()
    };

    let engine = persistent_engine(dir.path());
    let second = engine
        .store("b", engine.random_vector(2), Metadata::new())
        .unwrap();
    assert!(second.revision > first.revision);
    assert_eq!(engine.info().unwrap().last_seq, second.revision);
}

#[test]
fn crash_after_begin_restores_pre_transaction_state() {
    let dir = tempfile::TempDir::new().unwrap();

    let before = {
        let engine = persistent_engine(dir.path());
        engine
            .store("red", engine.random_vector(1), Metadata::new())
            .unwrap();
        let dump = engine.dump_bytes().unwrap();

        let tx = engine.wal_begin("tx1").unwrap();
        engine
            .wal_append(&tx, Operation::put("apple", engine.random_vector(2), Metadata::new()))
            .unwrap();
        // Dropped without wal_end: the process "crashes" here.
        dump
    };

    // Truncate the log right after the BEGIN frame.
    let wal = std::fs::read_to_string(wal_path(dir.path())).unwrap();
    let mut kept = String::new();
    for line in wal.lines() {
        kept.push_str(line);
        kept.push('\n');
        if line.contains("\"BEGIN\"") && line.contains("tx1") {
            break;
        }
    }
    std::fs::write(wal_path(dir.path()), kept).unwrap();

    let engine = persistent_engine(dir.path());
    assert!(!engine.contains("apple"));
    assert_eq!(engine.dump_bytes().unwrap(), before);

    let discarded = &engine.recovery_report().discarded;
    assert_eq!(discarded.len(), 1);
    assert_eq!(discarded[0].label, "tx1");
    assert_eq!(discarded[0].reason, DiscardReason::Unterminated);
}

#[test]
fn unterminated_transaction_is_absent_after_replay() {
    let dir = tempfile::TempDir::new().unwrap();

    {
        let engine = persistent_engine(dir.path());
        engine
            .store("red", engine.random_vector(1), Metadata::new())
            .unwrap();
        let tx = engine.wal_begin("tx1").unwrap();
        engine
            .wal_append(&tx, Operation::put("apple", engine.random_vector(2), Metadata::new()))
            .unwrap();
        engine.close().unwrap();
    }

    let engine = persistent_engine(dir.path());
    assert!(engine.contains("red"));
    assert!(!engine.contains("apple"));

    // The label can be reused after recovery.
    let tx = engine.wal_begin("tx1").unwrap();
    engine.wal_end(tx).unwrap();
}

#[test]
fn corrupted_frame_poisons_only_its_transaction() {
    let dir = tempfile::TempDir::new().unwrap();

    {
        let engine = persistent_engine(dir.path());
        engine
            .store("a", engine.random_vector(1), Metadata::new())
            .unwrap();
        let tx = engine.wal_begin("bad").unwrap();
        engine
            .wal_append(&tx, Operation::put("b", engine.random_vector(2), Metadata::new()))
            .unwrap();
        engine.wal_end(tx).unwrap();
        engine
            .store("c", engine.random_vector(3), Metadata::new())
            .unwrap();
    }

    // Chop the OP frame of "bad" in half.
    let wal = std::fs::read_to_string(wal_path(dir.path())).unwrap();
    let damaged: Vec<String> = wal
        .lines()
        .map(|line| {
            if line.contains("\"OP\"") && line.contains("\"b\"") {
                line[..line.len() / 2].to_string()
            } else {
                line.to_string()
            }
        })
        .collect();
    std::fs::write(wal_path(dir.path()), damaged.join("\n") + "\n").unwrap();

    let engine = persistent_engine(dir.path());
    assert!(engine.contains("a"));
    assert!(!engine.contains("b"));
    assert!(engine.contains("c"));

    let report = engine.recovery_report();
    assert!(!report.warnings.is_empty());
    assert!(
        report
            .discarded
            .iter()
            .any(|d| d.label == "bad" && d.reason == DiscardReason::Poisoned)
    );
}

#[test]
fn garbage_between_transactions_is_skipped() {
    let dir = tempfile::TempDir::new().unwrap();

    {
        let engine = persistent_engine(dir.path());
        engine
            .store("a", engine.random_vector(1), Metadata::new())
            .unwrap();
    }
    append_raw(dir.path(), b"{this is not a frame}\n");
    {
        let engine = persistent_engine(dir.path());
        engine
            .store("b", engine.random_vector(2), Metadata::new())
            .unwrap();
    }

    let engine = persistent_engine(dir.path());
    assert!(engine.contains("a"));
    assert!(engine.contains("b"));
    assert_eq!(engine.recovery_report().warnings.len(), 1);
}

#[test]
fn torn_tail_is_dropped_and_log_stays_usable() {
    let dir = tempfile::TempDir::new().unwrap();

    {
        let engine = persistent_engine(dir.path());
        engine
            .store("a", engine.random_vector(1), Metadata::new())
            .unwrap();
    }
    append_raw(dir.path(), br#"{"seq":99,"label":"tx","kin"#);

    {
        let engine = persistent_engine(dir.path());
        assert!(engine.recovery_report().torn_tail);
        engine
            .store("b", engine.random_vector(2), Metadata::new())
            .unwrap();
    }

    let engine = persistent_engine(dir.path());
    assert!(engine.contains("a"));
    assert!(engine.contains("b"));
    assert!(!engine.recovery_report().torn_tail);
}

#[test]
fn replay_is_deterministic() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = persistent_engine(dir.path());
    for i in 0..10u64 {
        engine
            .store(&format!("c{i}"), engine.random_vector(i), Metadata::new())
            .unwrap();
    }
    let snapshot = dir.path().join("mid.json");
    engine.snapshot(&snapshot).unwrap();
    for i in 5..15u64 {
        engine
            .store(&format!("c{i}"), engine.random_vector(i + 100), Metadata::new())
            .unwrap();
    }
    engine.delete("c0").unwrap();

    let wal = wal_path(dir.path());
    let first = engine.replay(Some(snapshot.as_path()), &wal).unwrap();
    let second = engine.replay(Some(snapshot.as_path()), &wal).unwrap();
    let bytes = first.store.dump_bytes().unwrap();
    assert_eq!(bytes, second.store.dump_bytes().unwrap());
    assert_eq!(bytes, engine.dump_bytes().unwrap());

    // Replay without the snapshot reaches the same state from the full log.
    let full = engine.replay(None, &wal).unwrap();
    assert_eq!(full.store.dump_bytes().unwrap(), bytes);
}

#[test]
fn checkpoint_compacts_and_reopens() {
    let dir = tempfile::TempDir::new().unwrap();

    let before = {
        let engine = persistent_engine(dir.path());
        for i in 0..20u64 {
            engine
                .store(&format!("c{i}"), engine.random_vector(i), Metadata::new())
                .unwrap();
        }
        let size_before = std::fs::metadata(wal_path(dir.path())).unwrap().len();
        let (info, stats) = engine.checkpoint().unwrap();
        assert_eq!(info.concepts, 20);
        assert_eq!(stats.kept, 0);
        assert!(std::fs::metadata(wal_path(dir.path())).unwrap().len() < size_before);

        engine
            .store("after", engine.random_vector(500), Metadata::new())
            .unwrap();
        let dump = engine.dump_bytes().unwrap();
        engine.close().unwrap();
        dump
    };

    let engine = persistent_engine(dir.path());
    assert_eq!(engine.len(), 21);
    assert_eq!(engine.dump_bytes().unwrap(), before);
    assert_eq!(engine.recovery_report().applied, 1);
}

#[test]
fn transaction_open_across_checkpoint_survives() {
    let dir = tempfile::TempDir::new().unwrap();

    {
        let engine = persistent_engine(dir.path());
        engine
            .store("a", engine.random_vector(1), Metadata::new())
            .unwrap();
        let tx = engine.wal_begin("long").unwrap();
        engine
            .wal_append(&tx, Operation::put("b", engine.random_vector(2), Metadata::new()))
            .unwrap();

        let (_, stats) = engine.checkpoint().unwrap();
        assert!(stats.kept >= 2, "BEGIN and OP of the open tx are kept");

        engine.wal_end(tx).unwrap();
        engine.close().unwrap();
    }

    let engine = persistent_engine(dir.path());
    assert!(engine.contains("a"));
    assert!(engine.contains("b"));
}

#[test]
fn compact_requires_a_snapshot() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = persistent_engine(dir.path());
    engine
        .store("a", engine.random_vector(1), Metadata::new())
        .unwrap();

    assert!(matches!(
        engine.compact(),
        Err(MnemosError::Snapshot(SnapshotError::NoSnapshot))
    ));

    // A snapshot elsewhere is not what recovery loads, so it cannot compact.
    engine.snapshot(&dir.path().join("export.json")).unwrap();
    assert!(engine.compact().is_err());

    engine
        .snapshot(&EngineConfig::persistent(Dimension::TEST, dir.path()).snapshot_path().unwrap())
        .unwrap();
    assert!(engine.compact().is_ok());
}

#[test]
fn snapshot_with_other_dimension_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    {
        let engine = persistent_engine(dir.path());
        engine
            .store("a", engine.random_vector(1), Metadata::new())
            .unwrap();
        engine.checkpoint().unwrap();
    }

    let result = Engine::open(EngineConfig::persistent(Dimension(256), dir.path()));
    assert!(matches!(
        result,
        Err(MnemosError::Snapshot(SnapshotError::Incompatible { .. }))
    ));
}

#[test]
fn automatic_checkpoint_keeps_wal_short() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = EngineConfig {
        snapshot_every: Some(5),
        ..EngineConfig::persistent(Dimension::TEST, dir.path())
    };

    {
        let engine = Engine::open(config.clone()).unwrap();
        for i in 0..12u64 {
            engine
                .store(&format!("c{i}"), engine.random_vector(i), Metadata::new())
                .unwrap();
        }
        engine.close().unwrap();
    }
    assert!(dir.path().join("snapshot.json").exists());

    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.len(), 12);
    assert_eq!(engine.recovery_report().applied, 2);
}

#[test]
fn concurrent_checkpoints_and_snapshots_lose_nothing() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = EngineConfig {
        snapshot_every: Some(3),
        ..EngineConfig::persistent(Dimension::TEST, dir.path())
    };
    let own = config.snapshot_path().unwrap();

    let before = {
        let engine = Engine::open(config.clone()).unwrap();
        std::thread::scope(|s| {
            for t in 0..4u64 {
                let engine = &engine;
                s.spawn(move || {
                    for i in 0..20u64 {
                        engine
                            .store(&format!("t{t}-{i}"), engine.random_vector(t * 100 + i), Metadata::new())
                            .unwrap();
                        engine.checkpoint().unwrap();
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..40 {
                    engine.snapshot(&own).unwrap();
                }
            });
        });
        let dump = engine.dump_bytes().unwrap();
        engine.close().unwrap();
        dump
    };

    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.len(), 80);
    assert_eq!(engine.dump_bytes().unwrap(), before);
    assert!(engine.recovery_report().warnings.is_empty());
    let entries = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(entries, 2, "only wal.log and snapshot.json remain");
}

#[test]
fn snapshots_taken_during_commits_hold_whole_transactions() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = persistent_engine(dir.path());
    let pairs = 30u64;
    let exports = 10;

    std::thread::scope(|s| {
        s.spawn(|| {
            for i in 0..pairs {
                let tx = engine.wal_begin(&format!("pair{i}")).unwrap();
                engine
                    .wal_append(&tx, Operation::put(format!("a{i}"), engine.random_vector(i), Metadata::new()))
                    .unwrap();
                engine
                    .wal_append(&tx, Operation::put(format!("b{i}"), engine.random_vector(i + 1_000), Metadata::new()))
                    .unwrap();
                engine.wal_end(tx).unwrap();
            }
        });
        s.spawn(|| {
            for n in 0..exports {
                engine.snapshot(&dir.path().join(format!("export{n}.json"))).unwrap();
            }
        });
    });

    for n in 0..exports {
        let snap = Snapshot::load(&dir.path().join(format!("export{n}.json"))).unwrap();
        let ids: HashSet<&str> = snap.concepts.iter().map(|c| c.id.as_str()).collect();
        for i in 0..pairs {
            assert_eq!(
                ids.contains(format!("a{i}").as_str()),
                ids.contains(format!("b{i}").as_str()),
                "export {n} holds half of pair {i}"
            );
        }
        assert!(snap.concepts.iter().all(|c| c.revision <= snap.wal_offset));
    }
}

#[test]
fn concurrent_puts_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();

    let before = {
        let engine = persistent_engine(dir.path());
        std::thread::scope(|s| {
            for t in 0..6u64 {
                let engine = &engine;
                s.spawn(move || {
                    for i in 0..15u64 {
                        engine
                            .store(&format!("t{t}-{i}"), engine.random_vector(t * 100 + i), Metadata::new())
                            .unwrap();
                    }
                });
            }
        });
        let dump = engine.dump_bytes().unwrap();
        engine.close().unwrap();
        dump
    };

    let engine = persistent_engine(dir.path());
    assert_eq!(engine.len(), 90);
    assert_eq!(engine.dump_bytes().unwrap(), before);
    assert_eq!(engine.recovery_report().applied, 90);
}

#[test]
fn failed_plans_in_later_sessions_get_fresh_labels() {
    let dir = tempfile::TempDir::new().unwrap();

    for session in 0..2u64 {
        let engine = persistent_engine(dir.path());
        engine
            .store(&format!("a{session}"), engine.random_vector(session), Metadata::new())
            .unwrap();
        let plan = format!("load a{session}; store x{session}; resolve missing");
        assert!(engine.planner_with(&NoResolver).run(&plan).is_err());
        engine.close().unwrap();
    }

    let engine = persistent_engine(dir.path());
    let report = engine.recovery_report();
    assert_eq!(report.discarded.len(), 2);
    assert!(report
        .discarded
        .iter()
        .all(|tx| tx.reason == DiscardReason::Unterminated));
    assert!(report.warnings.is_empty());
    assert!(engine.contains("a0") && engine.contains("a1"));
    assert!(!engine.contains("x0") && !engine.contains("x1"));
}
